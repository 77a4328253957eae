use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::{HostContext, Network, Origin};
use crate::federation::{ConnectionMode, FederationSettings};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub federation: FederationConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// JSON map of coordinator descriptors keyed by short alias
    pub descriptors_path: PathBuf,
    /// `host:port` the aggregator is served from
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub origin: Origin,
    /// Bundled with a coordinator; reach the others through its proxy paths
    #[serde(default)]
    pub selfhosted: bool,
    /// Mode entered on startup
    #[serde(default = "default_mode")]
    pub connection_mode: ConnectionMode,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_eose_timeout_ms")]
    pub eose_timeout_ms: u64,
    /// Count disabled coordinators in the exchange summary
    #[serde(default = "default_true")]
    pub include_disabled_in_info: bool,
    /// Where resolved coordinator URLs are persisted (default: user data dir)
    #[serde(default)]
    pub url_store_path: Option<PathBuf>,
    /// Proxy for coordinator requests, e.g. `socks5h://127.0.0.1:9050`
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_host() -> String {
    "localhost:12596".to_string()
}

fn default_mode() -> ConnectionMode {
    ConnectionMode::Subscribed
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_eose_timeout_ms() -> u64 {
    15_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Explicit relay endpoints; empty means each coordinator's own relay
    #[serde(default)]
    pub urls: Vec<String>,
    /// Only request events from the last N seconds (0 = everything)
    #[serde(default)]
    pub lookback_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            lookback_secs: 0,
            channel_capacity: default_channel_capacity(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerConfig {
    /// Status server port; disabled when unset
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Level for fedbook targets (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "debug".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "debug")?
            .set_default("logging.json", false)?
            .set_default(
                "federation.descriptors_path",
                config_dir.join("federation.json").to_string_lossy().to_string(),
            )?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g. config/testnet.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("FEDBOOK_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // FEDBOOK__FEDERATION__NETWORK=testnet, etc.
            .add_source(
                Environment::with_prefix("FEDBOOK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("relay.urls"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn host_context(&self) -> HostContext {
        let mut context = HostContext::new(
            self.federation.host.clone(),
            self.federation.origin,
            self.federation.network,
        );
        context.selfhosted = self.federation.selfhosted;
        context
    }

    pub fn federation_settings(&self) -> FederationSettings {
        FederationSettings {
            fetch_timeout: Duration::from_millis(self.federation.fetch_timeout_ms),
            eose_timeout: Duration::from_millis(self.federation.eose_timeout_ms),
            include_disabled_in_info: self.federation.include_disabled_in_info,
            relay_lookback: (self.relay.lookback_secs > 0)
                .then(|| Duration::from_secs(self.relay.lookback_secs)),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.federation.host.trim().is_empty() {
            errors.push("federation.host must not be empty".to_string());
        }
        if self.federation.fetch_timeout_ms == 0 {
            errors.push("federation.fetch_timeout_ms must be positive".to_string());
        }
        if self.federation.eose_timeout_ms == 0 {
            errors.push("federation.eose_timeout_ms must be positive".to_string());
        }
        if self.relay.channel_capacity == 0 {
            errors.push("relay.channel_capacity must be positive".to_string());
        }
        for url in &self.relay.urls {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                errors.push(format!("relay url '{url}' must use ws:// or wss://"));
            }
        }
        if self.server.port == Some(0) {
            errors.push("server.port must not be 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
