pub use builder::*;
pub use checkpoint::*;
pub use event_store::*;
pub use sequencer::*;

use crate::store::{Conflict, StoreError};

mod builder;
mod checkpoint;
mod event_store;
mod sequencer;

#[derive(thiserror::Error, Debug)]
pub enum PgStoreError {
    /// Optimistic concurrency violation
    #[error(transparent)]
    Conflict(#[from] Conflict),
    /// Sql error
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    /// Serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoreError for PgStoreError {
    fn conflict(&self) -> Option<&Conflict> {
        match self {
            Self::Conflict(conflict) => Some(conflict),
            Self::Sqlx(_) | Self::Json(_) => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Sqlx(sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed)
        )
    }
}
