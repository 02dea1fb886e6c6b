use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::GlobalOrder;

/// Housekeeping of a projection: how far it got in the global order, and how it got there.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Checkpoint {
    /// Highest global order fully handled. Every event at or below it is never applied again.
    pub watermark: GlobalOrder,
    /// `occurred_on` of the event at the watermark.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Events handed to the projection.
    pub applied_count: i64,
    /// Global orders that never showed up within the lag window and were passed over.
    pub skipped_count: i64,
}

/// Persists [`Checkpoint`]s, so that a restarted projector resumes where it stopped.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Loads the checkpoint of the given projection, if it was ever saved.
    async fn load(&self, projection: &str) -> Result<Option<Checkpoint>, Self::Error>;

    /// Replaces the checkpoint of the given projection.
    async fn save(&self, projection: &str, checkpoint: &Checkpoint) -> Result<(), Self::Error>;
}

/// [`CheckpointStore`] kept in memory. Clones share the same checkpoints.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<Mutex<HashMap<String, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    type Error = Infallible;

    async fn load(&self, projection: &str) -> Result<Option<Checkpoint>, Self::Error> {
        let checkpoints = self.checkpoints.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(checkpoints.get(projection).cloned())
    }

    async fn save(&self, projection: &str, checkpoint: &Checkpoint) -> Result<(), Self::Error> {
        let mut checkpoints = self.checkpoints.lock().unwrap_or_else(PoisonError::into_inner);
        checkpoints.insert(projection.to_string(), checkpoint.clone());
        Ok(())
    }
}
