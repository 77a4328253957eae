use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coordinator software version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Body of a coordinator's `/api/info/` endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorInfo {
    pub num_public_buy_orders: u64,
    pub num_public_sell_orders: u64,
    pub book_liquidity: Decimal,
    pub active_robots_today: u64,
    pub last_day_nonkyc_btc_premium: Decimal,
    pub last_day_volume: Decimal,
    pub lifetime_volume: Decimal,
    pub version: Version,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub bond_size: Decimal,
    pub notice_severity: Option<String>,
    pub notice_message: Option<String>,
}

/// Trading limits for one currency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limit {
    pub code: String,
    pub price: Decimal,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub max_bondless_amount: Decimal,
}

/// Body of `/api/limits/`: currency id -> limit
pub type LimitList = BTreeMap<String, Limit>;

/// Federation-wide summary of coordinator info
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeInfo {
    pub num_public_buy_orders: u64,
    pub num_public_sell_orders: u64,
    pub book_liquidity: Decimal,
    pub active_robots_today: u64,
    /// Volume-weighted mean of coordinator premiums
    pub last_day_nonkyc_btc_premium: Decimal,
    pub last_day_volume: Decimal,
    pub lifetime_volume: Decimal,
    /// Highest version seen across coordinators
    pub version: Version,
}

impl ExchangeInfo {
    /// Sum counts and volumes across coordinator infos.
    pub fn aggregate<'a>(infos: impl IntoIterator<Item = &'a CoordinatorInfo>) -> Self {
        let mut info = ExchangeInfo::default();
        let mut weighted_premium = Decimal::ZERO;

        for coordinator in infos {
            info.num_public_buy_orders += coordinator.num_public_buy_orders;
            info.num_public_sell_orders += coordinator.num_public_sell_orders;
            info.book_liquidity += coordinator.book_liquidity;
            info.active_robots_today += coordinator.active_robots_today;
            info.last_day_volume += coordinator.last_day_volume;
            info.lifetime_volume += coordinator.lifetime_volume;
            info.version = info.version.max(coordinator.version);
            weighted_premium +=
                coordinator.last_day_nonkyc_btc_premium * coordinator.last_day_volume;
        }

        if !info.last_day_volume.is_zero() {
            info.last_day_nonkyc_btc_premium = weighted_premium / info.last_day_volume;
        }
        info
    }
}

/// Aggregate counters published to consumers after every mutation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeStats {
    pub total_coordinators: usize,
    pub enabled_coordinators: usize,
    pub online_coordinators: usize,
    pub pending_coordinators: usize,
    pub pending_relays: usize,
    pub loading: bool,
    pub info: ExchangeInfo,
}
