//! Coordinators: the independently operated exchange nodes of the federation.
//!
//! Static descriptors, the per-node runtime record, the REST client and the
//! URL persistence sink.

pub mod client;
pub mod descriptor;
pub mod record;
pub mod url_store;

pub use client::{CoordinatorApi, CoordinatorEndpoint, HttpCoordinatorClient};
pub use descriptor::{
    CoordinatorAttributes, CoordinatorDescriptor, FederationDirectory, NetworkUrls, LOCAL_ALIAS,
};
pub use record::{Coordinator, HostContext, Network, Origin, LOOPBACK_DEV_HOST};
pub use url_store::{JsonFileUrlStore, UrlStore};
