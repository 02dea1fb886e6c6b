use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::projector::{Checkpoint, CheckpointStore};
use crate::sql::statements::{SELECT_CHECKPOINT, UPSERT_CHECKPOINT};
use crate::types::GlobalOrder;

/// [`CheckpointStore`] persisting on the `projection_checkpoints` table, created by the
/// [`super::PgStoreBuilder`] migrations.
///
/// Saving never moves a watermark backwards, even if two projectors with the same name race.
#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: Pool<Postgres>,
}

impl PgCheckpointStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    type Error = sqlx::Error;

    async fn load(&self, projection: &str) -> Result<Option<Checkpoint>, Self::Error> {
        let row: Option<(GlobalOrder, Option<DateTime<Utc>>, i64, i64)> = sqlx::query_as(SELECT_CHECKPOINT)
            .bind(projection)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(watermark, last_seen_at, applied_count, skipped_count)| Checkpoint {
            watermark,
            last_seen_at,
            applied_count,
            skipped_count,
        }))
    }

    async fn save(&self, projection: &str, checkpoint: &Checkpoint) -> Result<(), Self::Error> {
        let _ = sqlx::query(UPSERT_CHECKPOINT)
            .bind(projection)
            .bind(checkpoint.watermark)
            .bind(checkpoint.last_seen_at)
            .bind(checkpoint.applied_count)
            .bind(checkpoint.skipped_count)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
