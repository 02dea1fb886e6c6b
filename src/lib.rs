//! Event sourcing with a gap-tolerant global order.
//!
//! Aggregates append their events to per-aggregate streams with optimistic concurrency. Every
//! event also takes a number in a store-wide global order, unique but not gapless: numbers drawn
//! by transactions that roll back are lost. [`projector::Projector`]s consume the global order,
//! waiting a bounded time for missing numbers before moving past them, and expose a
//! [`projector::ProjectionReader`] to read own writes through
//! [`projector::ProjectionReader::wait_for_version`]. A [`gap::GapMonitor`] audits the global
//! order for numbers that never showed up.

pub use crate::aggregate::Aggregate;
pub use crate::event::Event;
pub use crate::manager::AggregateManager;
pub use crate::state::AggregateState;

mod aggregate;
pub mod config;
mod event;
pub mod gap;
mod manager;
pub mod projector;
pub mod sequencer;
#[cfg(feature = "postgres")]
mod sql;
mod state;
pub mod store;
pub mod types;

pub mod error {
    pub use serde_json::Error as JsonError;
    #[cfg(feature = "postgres")]
    pub use sqlx::Error as SqlxError;

    pub use crate::config::ConfigError;
    pub use crate::projector::{NotYetVisible, ProjectorError};
    pub use crate::store::{Conflict, StoreError};
}
