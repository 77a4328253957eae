//! Publish/subscribe relay network: event types, the pure order decoder and
//! the WebSocket subscription pool.

pub mod decoder;
pub mod event;
pub mod pool;

pub use decoder::{decode_geohash, decode_order, PubkeyDirectory};
pub use event::{BookFilter, RawEvent, RelayMessage, ORDER_EVENT_KIND};
pub use pool::{coordinator_relay_url, RelayPool, RelayService};
