use clap::{Parser, Subcommand};
use serde::Serialize;
use tabled::{Table, Tabled};

use crate::domain::{ExchangeStats, PublicOrder};
use crate::federation::{ConnectionMode, CoordinatorStatus, MergedBook};

#[derive(Parser)]
#[command(name = "fedbook")]
#[command(version)]
#[command(about = "Federated order-book aggregator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml, federation.json)
    #[arg(short, long, default_value = "config", env = "FEDBOOK_CONFIG_DIR")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the federation and log every update
    Watch {
        /// Connection mode (polling|subscribed); defaults to the configured mode
        #[arg(short, long)]
        mode: Option<ConnectionMode>,
        /// Serve the status endpoint on this port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Load the merged book once and print it
    Book {
        #[arg(short, long)]
        mode: Option<ConnectionMode>,
        /// Give up waiting for slow sources after this many seconds
        #[arg(long, default_value = "60")]
        timeout_secs: u64,
        #[arg(long)]
        json: bool,
    },
    /// Print the configured coordinators
    Coordinators {
        #[arg(long)]
        json: bool,
    },
}

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

#[derive(Debug, Clone, Tabled, Serialize)]
pub struct BookRow {
    pub key: String,
    pub coordinator: String,
    pub side: String,
    pub currency: String,
    pub amount: String,
    pub premium: String,
    #[tabled(rename = "payment")]
    pub payment_method: String,
}

impl BookRow {
    pub fn new(key: &str, order: &PublicOrder) -> Self {
        let amount = if order.has_range {
            format!(
                "{}-{}",
                order.min_amount.unwrap_or_default(),
                order.max_amount.unwrap_or_default()
            )
        } else {
            order.amount.map(|a| a.to_string()).unwrap_or_default()
        };
        Self {
            key: key.to_string(),
            coordinator: order.coordinator_short_alias.clone().unwrap_or_default(),
            side: order.order_type.to_string(),
            currency: order.currency.to_string(),
            amount,
            premium: format!("{}%", order.premium),
            payment_method: order.payment_method.clone(),
        }
    }
}

#[derive(Debug, Clone, Tabled, Serialize)]
pub struct CoordinatorRow {
    pub alias: String,
    pub name: String,
    pub enabled: bool,
    pub url: String,
    pub book: String,
    pub info: String,
    pub limits: String,
    pub orders: usize,
}

impl From<&CoordinatorStatus> for CoordinatorRow {
    fn from(status: &CoordinatorStatus) -> Self {
        Self {
            alias: status.alias.clone(),
            name: status.long_alias.clone(),
            enabled: status.enabled,
            url: status.url.clone().unwrap_or_else(|| "-".to_string()),
            book: status.book.to_string(),
            info: status.info.to_string(),
            limits: status.limits.to_string(),
            orders: status.orders,
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode.
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                let table = Table::new(items).to_string();
                println!("{table}");
            }
        }
        OutputMode::Json => {
            let json = serde_json::to_string_pretty(items)?;
            println!("{json}");
        }
    }
    Ok(())
}

pub fn print_book(book: &MergedBook, mode: OutputMode) -> anyhow::Result<()> {
    let rows: Vec<BookRow> = book
        .orders()
        .iter()
        .map(|(key, order)| BookRow::new(key, order))
        .collect();
    print_items(&rows, mode)
}

pub fn print_coordinators(statuses: &[CoordinatorStatus], mode: OutputMode) -> anyhow::Result<()> {
    let rows: Vec<CoordinatorRow> = statuses.iter().map(CoordinatorRow::from).collect();
    print_items(&rows, mode)
}

/// One-line summary for the table footer and the watch log
pub fn summary_line(stats: &ExchangeStats) -> String {
    format!(
        "{} coordinators ({} enabled, {} online) | {} buy / {} sell | {} BTC{}",
        stats.total_coordinators,
        stats.enabled_coordinators,
        stats.online_coordinators,
        stats.info.num_public_buy_orders,
        stats.info.num_public_sell_orders,
        stats.info.book_liquidity.round_dp(8),
        if stats.loading { " | loading" } else { "" }
    )
}
