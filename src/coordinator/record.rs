//! Per-coordinator runtime record

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::client::CoordinatorEndpoint;
use super::descriptor::CoordinatorDescriptor;
use crate::domain::{CoordinatorInfo, LimitList, PublicOrder};

/// Host serving the development build; the `local` coordinator only exists there.
pub const LOOPBACK_DEV_HOST: &str = "127.0.0.1:8000";

/// Routing scheme used to reach coordinators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Onion,
    #[default]
    Clearnet,
    I2p,
}

impl FromStr for Origin {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "onion" | "tor" => Ok(Self::Onion),
            "clearnet" | "https" => Ok(Self::Clearnet),
            "i2p" => Ok(Self::I2p),
            _ => Err("invalid origin; expected onion|clearnet|i2p"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Network {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            _ => Err("invalid network; expected mainnet|testnet"),
        }
    }
}

/// Where the aggregator is running and how it reaches coordinators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    /// `host:port` the client is served from
    pub host: String,
    /// Full URL the client is served from (scheme + host)
    pub host_url: String,
    pub origin: Origin,
    pub network: Network,
    /// Client bundled with a coordinator; every other coordinator is reached
    /// through that coordinator's proxy paths.
    pub selfhosted: bool,
}

impl HostContext {
    pub fn new(host: impl Into<String>, origin: Origin, network: Network) -> Self {
        let host = host.into();
        let scheme = match origin {
            Origin::Clearnet => "https",
            Origin::Onion | Origin::I2p => "http",
        };
        Self {
            host_url: format!("{scheme}://{host}"),
            host,
            origin,
            network,
            selfhosted: false,
        }
    }

    pub fn is_loopback_dev(&self) -> bool {
        self.host == LOOPBACK_DEV_HOST
    }
}

/// One coordinator participating in the federation
#[derive(Debug, Clone)]
pub struct Coordinator {
    pub descriptor: CoordinatorDescriptor,
    pub enabled: bool,
    /// Resolved base URL for the current host context
    pub url: Option<String>,
    pub base_path: String,
    /// Last fetched book, keyed by merge key
    pub book: BTreeMap<String, PublicOrder>,
    pub info: Option<CoordinatorInfo>,
    pub limits: LimitList,
}

impl Coordinator {
    pub fn new(descriptor: CoordinatorDescriptor, context: &HostContext) -> Self {
        let enabled = descriptor.enabled;
        let mut coordinator = Self {
            descriptor,
            enabled,
            url: None,
            base_path: String::new(),
            book: BTreeMap::new(),
            info: None,
            limits: LimitList::new(),
        };
        coordinator.resolve_url(context);
        coordinator
    }

    pub fn alias(&self) -> &str {
        &self.descriptor.short_alias
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Pick the URL for the current origin and network. A self-hosted client
    /// reaches every non-local coordinator through its own host.
    pub fn resolve_url(&mut self, context: &HostContext) -> Option<&str> {
        if context.selfhosted && !self.descriptor.is_local() {
            self.url = Some(context.host_url.clone());
            self.base_path = format!("/{}/{}", context.network, self.alias());
        } else {
            self.url = self
                .descriptor
                .urls(context.network)
                .get(context.origin)
                .map(str::to_string);
            self.base_path.clear();
        }
        self.url.as_deref()
    }

    pub fn endpoint(&self) -> Option<CoordinatorEndpoint> {
        self.url.as_ref().map(|url| CoordinatorEndpoint {
            alias: self.alias().to_string(),
            url: url.clone(),
            base_path: self.base_path.clone(),
        })
    }

    /// Replace the stored book, stamping each order with this coordinator.
    pub fn store_book(&mut self, orders: Vec<PublicOrder>) {
        let alias = self.alias().to_string();
        self.book = orders
            .into_iter()
            .map(|mut order| {
                order.coordinator_short_alias = Some(alias.clone());
                (PublicOrder::polling_key(&alias, order.id), order)
            })
            .collect();
    }
}
