//! Federation data model shared by the coordinator client, the relay decoder
//! and the orchestrator.

pub mod exchange;
pub mod order;

pub use exchange::*;
pub use order::*;
