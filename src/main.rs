use clap::Parser;
use fedbook::cli::{self, Cli, Commands, OutputMode};
use fedbook::config::AppConfig;
use fedbook::federation::{ConnectionMode, FederationHook};
use fedbook::services::{HealthServer, HealthState};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod main_runtime;

use main_runtime::{build_federation, init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Watch { mode, port } => {
            init_logging(config.logging.json, &config.logging.level);
            let mode = mode.unwrap_or(config.federation.connection_mode);
            run_watch(&config, mode, port.or(config.server.port)).await?;
        }
        Commands::Book {
            mode,
            timeout_secs,
            json,
        } => {
            init_logging_simple();
            let mode = mode.unwrap_or(config.federation.connection_mode);
            run_book(&config, mode, Duration::from_secs(timeout_secs), json).await?;
        }
        Commands::Coordinators { json } => {
            init_logging_simple();
            let federation = build_federation(&config)?;
            cli::print_coordinators(
                &federation.coordinator_statuses().await,
                OutputMode::from_json_flag(json),
            )?;
        }
    }

    Ok(())
}

fn load_config(dir: &str) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load_from(dir)?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("config error: {e}");
        }
        anyhow::bail!("invalid configuration ({} problem(s))", errors.len());
    }
    Ok(config)
}

async fn run_watch(
    config: &AppConfig,
    mode: ConnectionMode,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let federation = build_federation(config)?;

    // Hooks run synchronously; hand updates to a task that can read state.
    let (tx, mut rx) = mpsc::unbounded_channel();
    federation.register_hook(FederationHook::Updated, move || {
        let _ = tx.send(());
    });
    let logger = {
        let federation = federation.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let stats = federation.exchange().await;
                info!(target: "fedbook::watch", "{}", cli::summary_line(&stats));
            }
        })
    };

    if let Some(port) = port {
        let server = HealthServer::new(Arc::new(HealthState::new(federation.clone())), port);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "status server stopped");
            }
        });
    }

    if let Err(e) = federation.update_urls(federation.host_context().await).await {
        warn!(error = %e, "could not persist coordinator urls");
    }
    if let Err(e) = federation.start(mode).await {
        warn!(error = %e, %mode, "federation started with errors");
    }

    let mut reload = tokio::time::interval(Duration::from_secs(60));
    reload.tick().await;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
            _ = reload.tick(), if mode == ConnectionMode::Polling => {
                if let Err(e) = federation.load_book_polling().await {
                    warn!(error = %e, "periodic reload failed");
                }
            }
        }
    }

    federation.shutdown().await;
    logger.abort();
    Ok(())
}

async fn run_book(
    config: &AppConfig,
    mode: ConnectionMode,
    limit: Duration,
    json: bool,
) -> anyhow::Result<()> {
    let federation = build_federation(config)?;
    federation.start(mode).await?;

    if tokio::time::timeout(limit, federation.wait_until_loaded())
        .await
        .is_err()
    {
        eprintln!("some sources did not finish within {}s", limit.as_secs());
    }

    let output = OutputMode::from_json_flag(json);
    cli::print_book(&federation.book().await, output)?;
    if output == OutputMode::Table {
        println!("{}", cli::summary_line(&federation.exchange().await));
    }

    federation.shutdown().await;
    Ok(())
}
