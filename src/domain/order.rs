use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Public order type as published by coordinators (`0` = buy, `1` = sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OrderType {
    Buy,
    Sell,
}

impl TryFrom<u8> for OrderType {
    type Error = String;

    fn try_from(raw: u8) -> std::result::Result<Self, Self::Error> {
        match raw {
            0 => Ok(OrderType::Buy),
            1 => Ok(OrderType::Sell),
            other => Err(format!("unknown order type {other}")),
        }
    }
}

impl From<OrderType> for u8 {
    fn from(kind: OrderType) -> Self {
        match kind {
            OrderType::Buy => 0,
            OrderType::Sell => 1,
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Buy => write!(f, "buy"),
            OrderType::Sell => write!(f, "sell"),
        }
    }
}

/// Maker presence as reported by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MakerStatus {
    #[default]
    Active,
    #[serde(rename = "Seen recently")]
    SeenRecently,
    Inactive,
}

/// Currency reference: coordinators publish numeric ids over HTTP, relays
/// carry ISO codes.
///
/// Orders keep the form their source published. A polling book only holds
/// `Id`s and a subscribed book only holds `Code`s, since the merged book is
/// rebuilt from scratch on every connection mode switch. Consumers that
/// compare currencies across modes must resolve ids against the
/// coordinator's currency table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Currency {
    Id(u32),
    Code(String),
}

impl Default for Currency {
    fn default() -> Self {
        Currency::Id(0)
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Currency::Id(id) => write!(f, "#{id}"),
            Currency::Code(code) => write!(f, "{code}"),
        }
    }
}

/// One public order from a coordinator book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicOrder {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub currency: Currency,
    /// Fixed fiat amount; `None` for range orders
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub has_range: bool,
    #[serde(default)]
    pub min_amount: Option<Decimal>,
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub premium: Decimal,
    #[serde(default)]
    pub satoshis_now: Option<u64>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub bond_size: Decimal,
    #[serde(default)]
    pub escrow_duration: u64,
    #[serde(default)]
    pub maker: Option<u64>,
    #[serde(default)]
    pub maker_nick: String,
    #[serde(default)]
    pub maker_hash_id: String,
    #[serde(default)]
    pub maker_status: MakerStatus,
    /// Alias of the coordinator hosting the order, stamped on ingest
    #[serde(default, rename = "coordinatorShortAlias")]
    pub coordinator_short_alias: Option<String>,
}

impl PublicOrder {
    /// Merge key of an order fetched over HTTP: coordinator alias plus local id
    pub fn polling_key(alias: &str, id: u64) -> String {
        format!("{alias}/{id}")
    }

    /// Upper bound of the fiat amount (the fixed amount, or the range max)
    pub fn max_fiat(&self) -> Option<Decimal> {
        if self.has_range {
            self.max_amount
        } else {
            self.amount
        }
    }

    pub fn is_buy(&self) -> bool {
        self.order_type == OrderType::Buy
    }
}
