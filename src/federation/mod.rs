//! The federation orchestrator and its state machinery.

pub mod book;
#[allow(clippy::module_inception)]
pub mod federation;
pub mod hooks;
pub mod mode;
pub mod tracker;

pub use book::{BookChange, MergedBook};
pub use federation::{Federation, FederationBuilder, FederationSettings};
pub use hooks::{FederationHook, HookHandle, HookRegistry};
pub use mode::{ConnectionMode, Epoch, ModeMachine, Transition};
pub use tracker::{CoordinatorStatus, FetchKind, Generation, SourceStatus, SourceTracker};
