use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::projector::ProjectorStatus;
use crate::types::GlobalOrder;

/// What a projector last published about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Highest global order the projection fully handled.
    pub watermark: GlobalOrder,
    pub status: ProjectorStatus,
    /// Highest committed global order the projector knew of when it published this.
    pub latest: GlobalOrder,
}

impl Progress {
    /// Number of global orders between the watermark and the write frontier.
    pub fn lag(&self) -> GlobalOrder {
        (self.latest - self.watermark).max(0)
    }
}

/// The projection reached the requested global order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub as_of_watermark: GlobalOrder,
}

/// The projection did not reach the requested global order in time.
///
/// Not a failure: retry later, or serve the data as of `as_of_watermark` and say it may be stale.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("global order {requested} is not yet visible, projection is at {as_of_watermark}")]
pub struct NotYetVisible {
    pub requested: GlobalOrder,
    pub as_of_watermark: GlobalOrder,
}

/// Data read from a projection, with the watermark it reflects at least.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub data: T,
    pub as_of_watermark: GlobalOrder,
}

/// Read side handle of a projection. Cheap to clone, holds nothing the write side waits on.
pub struct ProjectionReader<P> {
    projection: Arc<P>,
    progress: watch::Receiver<Progress>,
}

impl<P> Clone for ProjectionReader<P> {
    fn clone(&self) -> Self {
        Self {
            projection: Arc::clone(&self.projection),
            progress: self.progress.clone(),
        }
    }
}

impl<P> ProjectionReader<P> {
    pub(crate) fn new(projection: Arc<P>, progress: watch::Receiver<Progress>) -> Self {
        Self { projection, progress }
    }

    pub fn progress(&self) -> Progress {
        *self.progress.borrow()
    }

    pub fn watermark(&self) -> GlobalOrder {
        self.progress.borrow().watermark
    }

    pub fn status(&self) -> ProjectorStatus {
        self.progress.borrow().status
    }

    pub fn projection(&self) -> &Arc<P> {
        &self.projection
    }

    /// Reads the projection. The watermark is taken before reading, so the data reflects at least
    /// every event up to `as_of_watermark`.
    pub fn query<T>(&self, read: impl FnOnce(&P) -> T) -> Versioned<T> {
        let as_of_watermark: GlobalOrder = self.watermark();

        Versioned {
            data: read(&self.projection),
            as_of_watermark,
        }
    }

    /// Waits until the projection handled every event up to `global_order`, or `timeout` elapses.
    ///
    /// Dropping the returned future is always safe.
    pub async fn wait_for_version(&self, global_order: GlobalOrder, timeout: Duration) -> Result<Ready, NotYetVisible> {
        let mut progress = self.progress.clone();

        let reached = tokio::time::timeout(timeout, async move {
            progress
                .wait_for(|progress| progress.watermark >= global_order)
                .await
                .map(|progress| progress.watermark)
        })
        .await;

        match reached {
            Ok(Ok(as_of_watermark)) => Ok(Ready { as_of_watermark }),
            Ok(Err(_)) => {
                tracing::debug!(global_order, "projector is gone, version will never become visible");
                Err(self.not_yet_visible(global_order))
            }
            Err(_) => Err(self.not_yet_visible(global_order)),
        }
    }

    /// [`ProjectionReader::wait_for_version`] followed by [`ProjectionReader::query`].
    pub async fn query_at<T>(
        &self,
        global_order: GlobalOrder,
        timeout: Duration,
        read: impl FnOnce(&P) -> T,
    ) -> Result<Versioned<T>, NotYetVisible> {
        self.wait_for_version(global_order, timeout).await?;
        Ok(self.query(read))
    }

    fn not_yet_visible(&self, requested: GlobalOrder) -> NotYetVisible {
        NotYetVisible {
            requested,
            as_of_watermark: self.watermark(),
        }
    }
}
