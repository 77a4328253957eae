use fedbook::config::AppConfig;
use fedbook::coordinator::{FederationDirectory, HttpCoordinatorClient, JsonFileUrlStore};
use fedbook::error::Result;
use fedbook::federation::Federation;
use fedbook::relay::RelayPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Build the federation described by `config`.
pub fn build_federation(config: &AppConfig) -> Result<Federation> {
    let directory = FederationDirectory::load(&config.federation.descriptors_path)?;
    info!(
        path = %config.federation.descriptors_path.display(),
        coordinators = directory.len(),
        "loaded federation directory"
    );

    let client = HttpCoordinatorClient::new(
        Duration::from_millis(config.federation.fetch_timeout_ms),
        config.federation.proxy.as_deref(),
    )?;

    let mut builder = Federation::builder(directory, config.host_context())
        .settings(config.federation_settings())
        .coordinator_api(Arc::new(client));

    if !config.relay.urls.is_empty() {
        let pool = RelayPool::new(config.relay.urls.clone())?
            .with_channel_capacity(config.relay.channel_capacity)
            .with_connect_timeout(Duration::from_millis(config.relay.connect_timeout_ms));
        builder = builder.relays(Arc::new(pool));
    }

    let store_path = config
        .federation
        .url_store_path
        .clone()
        .or_else(JsonFileUrlStore::default_location);
    if let Some(path) = store_path {
        builder = builder.url_store(Arc::new(JsonFileUrlStore::new(path)));
    }

    builder.build()
}

pub fn init_logging(json: bool, level: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,fedbook={level}")));

    // Prefer FEDBOOK_LOG_DIR, fall back to LOG_DIR or ./logs.
    let log_dir = std::env::var("FEDBOOK_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .unwrap_or_else(|_| "logs".to_string());

    // `tracing_appender::rolling::daily` panics if it cannot create the
    // initial log file, so check writability first.
    let file_layer = if std::fs::create_dir_all(&log_dir).is_ok() {
        let test_path = std::path::Path::new(&log_dir).join(".fedbook_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(&log_dir, "fedbook.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Keep the guard alive for the life of the process
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    } else {
        eprintln!(
            "Warning: Could not create log directory {}, file logging disabled",
            log_dir
        );
        None
    };

    let (console_layer, json_layer) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    if file_logging_enabled {
        eprintln!("Logging to: {}/fedbook.log", log_dir);
    }
}

pub fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
