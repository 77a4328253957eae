//! Static coordinator descriptors
//!
//! The federation ships as a JSON map of alias -> descriptor. Descriptors are
//! validated once at load time; everything downstream can assume a non-empty,
//! well-formed alias and a well-formed nostr key when one is present.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::record::{Network, Origin};
use crate::error::{FedError, Result};

/// Alias reserved for the development coordinator served from loopback.
pub const LOCAL_ALIAS: &str = "local";

/// Default per-order size limit in satoshis
const DEFAULT_SIZE_LIMIT_SATS: u64 = 21 * 100_000_000;

/// Connection URLs for one network, one per routing scheme
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkUrls {
    pub onion: Option<String>,
    pub clearnet: Option<String>,
    pub i2p: Option<String>,
}

impl NetworkUrls {
    pub fn get(&self, origin: Origin) -> Option<&str> {
        let url = match origin {
            Origin::Onion => self.onion.as_deref(),
            Origin::Clearnet => self.clearnet.as_deref(),
            Origin::I2p => self.i2p.as_deref(),
        };
        url.filter(|u| !u.trim().is_empty())
    }

    pub fn contains(&self, url: &str) -> bool {
        let url = url.trim_end_matches('/');
        [&self.onion, &self.clearnet, &self.i2p]
            .into_iter()
            .flatten()
            .any(|u| u.trim_end_matches('/') == url)
    }
}

/// Static description of one coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoordinatorDescriptor {
    pub short_alias: String,
    pub long_alias: String,
    pub identifier: String,
    pub description: String,
    pub motto: String,
    pub color: String,
    pub established: Option<String>,
    /// Hex-encoded x-only public key used to sign relay events
    pub nostr_hex_pubkey: Option<String>,
    pub size_limit: u64,
    pub mainnet: NetworkUrls,
    pub testnet: NetworkUrls,
    pub federated: bool,
    pub enabled: bool,
}

impl Default for CoordinatorDescriptor {
    fn default() -> Self {
        Self {
            short_alias: String::new(),
            long_alias: String::new(),
            identifier: String::new(),
            description: String::new(),
            motto: String::new(),
            color: "#000000".to_string(),
            established: None,
            nostr_hex_pubkey: None,
            size_limit: DEFAULT_SIZE_LIMIT_SATS,
            mainnet: NetworkUrls::default(),
            testnet: NetworkUrls::default(),
            federated: false,
            enabled: true,
        }
    }
}

impl CoordinatorDescriptor {
    pub fn urls(&self, network: Network) -> &NetworkUrls {
        match network {
            Network::Mainnet => &self.mainnet,
            Network::Testnet => &self.testnet,
        }
    }

    pub fn is_local(&self) -> bool {
        self.short_alias == LOCAL_ALIAS
    }

    /// Validate the alias and nostr key.
    pub fn validate(&self) -> Result<()> {
        let alias = &self.short_alias;
        if alias.is_empty() {
            return Err(FedError::Validation(
                "coordinator short alias must not be empty".to_string(),
            ));
        }
        if !alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(FedError::Validation(format!(
                "coordinator alias '{alias}' may only contain ASCII letters, digits, '-' and '_'"
            )));
        }
        if let Some(pubkey) = &self.nostr_hex_pubkey {
            let bytes = hex::decode(pubkey).map_err(|e| {
                FedError::Validation(format!(
                    "coordinator '{alias}' has a malformed nostr key: {e}"
                ))
            })?;
            if bytes.len() != 32 {
                return Err(FedError::Validation(format!(
                    "coordinator '{alias}' nostr key must be 32 bytes, got {}",
                    bytes.len()
                )));
            }
        }
        Ok(())
    }
}

/// Caller-supplied coordinator attributes. Unset fields keep the
/// [`CoordinatorDescriptor::default`] value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoordinatorAttributes {
    pub short_alias: Option<String>,
    pub long_alias: Option<String>,
    pub identifier: Option<String>,
    pub description: Option<String>,
    pub motto: Option<String>,
    pub color: Option<String>,
    pub established: Option<String>,
    pub nostr_hex_pubkey: Option<String>,
    pub size_limit: Option<u64>,
    pub mainnet: Option<NetworkUrls>,
    pub testnet: Option<NetworkUrls>,
    pub federated: Option<bool>,
    pub enabled: Option<bool>,
}

impl CoordinatorAttributes {
    pub fn with_alias(alias: impl Into<String>) -> Self {
        Self {
            short_alias: Some(alias.into()),
            ..Default::default()
        }
    }

    /// Overlay these attributes on the default descriptor and validate.
    pub fn into_descriptor(self) -> Result<CoordinatorDescriptor> {
        let defaults = CoordinatorDescriptor::default();
        let descriptor = CoordinatorDescriptor {
            short_alias: self.short_alias.unwrap_or(defaults.short_alias),
            long_alias: self.long_alias.unwrap_or(defaults.long_alias),
            identifier: self.identifier.unwrap_or(defaults.identifier),
            description: self.description.unwrap_or(defaults.description),
            motto: self.motto.unwrap_or(defaults.motto),
            color: self.color.unwrap_or(defaults.color),
            established: self.established.or(defaults.established),
            nostr_hex_pubkey: self.nostr_hex_pubkey.or(defaults.nostr_hex_pubkey),
            size_limit: self.size_limit.unwrap_or(defaults.size_limit),
            mainnet: self.mainnet.unwrap_or(defaults.mainnet),
            testnet: self.testnet.unwrap_or(defaults.testnet),
            federated: self.federated.unwrap_or(defaults.federated),
            enabled: self.enabled.unwrap_or(defaults.enabled),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// The static federation: every known coordinator descriptor, keyed by alias
#[derive(Debug, Clone, Default)]
pub struct FederationDirectory {
    descriptors: BTreeMap<String, CoordinatorDescriptor>,
}

impl FederationDirectory {
    /// Parse the JSON alias -> descriptor map. A descriptor without a short
    /// alias inherits its map key; a mismatch between the two is rejected.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let entries: BTreeMap<String, CoordinatorDescriptor> = serde_json::from_str(raw)?;
        let mut descriptors = BTreeMap::new();
        for (key, mut descriptor) in entries {
            if descriptor.short_alias.is_empty() {
                descriptor.short_alias = key.clone();
            }
            if descriptor.short_alias != key {
                return Err(FedError::Validation(format!(
                    "federation entry '{key}' declares short alias '{}'",
                    descriptor.short_alias
                )));
            }
            descriptor.validate()?;
            descriptors.insert(key, descriptor);
        }
        Ok(Self { descriptors })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = CoordinatorDescriptor>,
    ) -> Result<Self> {
        let mut directory = Self::default();
        for descriptor in descriptors {
            descriptor.validate()?;
            if directory.descriptors.contains_key(&descriptor.short_alias) {
                return Err(FedError::AliasConflict {
                    alias: descriptor.short_alias,
                });
            }
            directory
                .descriptors
                .insert(descriptor.short_alias.clone(), descriptor);
        }
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoordinatorDescriptor> {
        self.descriptors.values()
    }
}
