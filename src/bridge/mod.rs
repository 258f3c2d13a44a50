//! Bridge from the host's `tracing` events into fanlog loggers.
//!
//! ```text
//! tracing::error!(..) ──> BridgeLayer ──mpsc──> BridgeWriter task ──> Dispatcher
//! ```

pub mod layer;
pub mod writer;

pub use layer::BridgeLayer;
pub use writer::{BridgeStats, BridgeWriter};
