pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod federation;
pub mod relay;
pub mod services;

pub use config::AppConfig;
pub use coordinator::{
    Coordinator, CoordinatorApi, CoordinatorAttributes, CoordinatorDescriptor,
    FederationDirectory, HostContext, HttpCoordinatorClient, JsonFileUrlStore, Network, Origin,
};
pub use domain::{ExchangeInfo, ExchangeStats, PublicOrder};
pub use error::{FedError, Result};
pub use federation::{
    ConnectionMode, CoordinatorStatus, Federation, FederationHook, FederationSettings,
    HookHandle, MergedBook, SourceStatus,
};
pub use relay::{RelayPool, RelayService};
