use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::Instant;

pub use checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
pub use reader::{NotYetVisible, ProjectionReader, Progress, Ready, Versioned};

use crate::config::ProjectorConfig;
use crate::projector::hole::HoleTracker;
use crate::store::{EventStore, StoreError, StoreEvent};
use crate::types::GlobalOrder;
use crate::Aggregate;

mod checkpoint;
mod hole;
mod reader;

type BoxDynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A read model built from the global order of a store.
///
/// Events reach `apply` one at a time, by strictly increasing global order, and at most once per
/// checkpoint: an event at or below the persisted watermark is never applied again.
#[async_trait]
pub trait Projection<A>: Send + Sync
where
    A: Aggregate,
{
    type Error: std::error::Error + Send + Sync + 'static;

    /// Applies the event onto the read model. If an error is returned the projector stops right
    /// before this event and tries it again on the next cycle.
    async fn apply(&self, event: &StoreEvent<A::Event>) -> Result<(), Self::Error>;

    /// The event types this projection handles. Other events only move the watermark forward.
    /// Empty means every event.
    fn event_types(&self) -> &[&'static str] {
        &[]
    }

    /// The name of the projection. By default, this is the type name of the projection, but it
    /// can be overridden. It keys the checkpoint and shows in tracing spans.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Where a projector stands relative to the write frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectorStatus {
    /// The watermark reached the highest committed global order.
    CaughtUp,
    /// Behind the frontier, and moved within the stall timeout.
    Lagging,
    /// Behind the frontier, and did not move for longer than the stall timeout.
    Stalled,
}

impl std::fmt::Display for ProjectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CaughtUp => write!(f, "caught up"),
            Self::Lagging => write!(f, "lagging"),
            Self::Stalled => write!(f, "stalled"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProjectorError {
    #[error("event store failure: {source}")]
    Store {
        retryable: bool,
        #[source]
        source: BoxDynError,
    },
    #[error("projection {projection} failed on global order {global_order}: {source}")]
    Projection {
        projection: &'static str,
        global_order: GlobalOrder,
        #[source]
        source: BoxDynError,
    },
    #[error("checkpoint store failure: {0}")]
    Checkpoint(#[source] BoxDynError),
}

impl ProjectorError {
    fn store(error: impl StoreError) -> Self {
        Self::Store {
            retryable: error.is_retryable(),
            source: Box::new(error),
        }
    }

    /// Whether the cycle may succeed if run again unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { retryable, .. } => *retryable,
            Self::Projection { .. } | Self::Checkpoint(_) => false,
        }
    }
}

/// Summary of a single [`Projector::run_once`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Events handed to the projection.
    pub applied: u64,
    /// Events passed over because the projection does not handle their type.
    pub filtered: u64,
    /// Missing global orders given up on.
    pub skipped: u64,
    /// First missing global order the cycle stopped at, still within the lag window.
    pub blocked_on: Option<GlobalOrder>,
    /// Watermark at the end of the cycle.
    pub watermark: GlobalOrder,
}

impl CycleOutcome {
    pub fn advanced(&self) -> bool {
        self.applied + self.filtered > 0
    }
}

/// Struct used to build a brand new [`Projector`].
pub struct ProjectorBuilder<S, P, C = InMemoryCheckpointStore> {
    store: S,
    projection: Arc<P>,
    checkpoints: C,
    config: ProjectorConfig,
}

impl<S, P> ProjectorBuilder<S, P, InMemoryCheckpointStore> {
    /// Creates a new instance of a [`ProjectorBuilder`]. Without a checkpoint store of its own the
    /// projector starts from scratch on every build.
    pub fn new(store: S, projection: P) -> Self {
        Self::shared(store, Arc::new(projection))
    }

    /// Same as [`ProjectorBuilder::new`], for a projection the caller keeps a handle on.
    pub fn shared(store: S, projection: Arc<P>) -> Self {
        Self {
            store,
            projection,
            checkpoints: InMemoryCheckpointStore::new(),
            config: ProjectorConfig::default(),
        }
    }
}

impl<S, P, C> ProjectorBuilder<S, P, C> {
    pub fn with_config(self, config: ProjectorConfig) -> Self {
        Self { config, ..self }
    }

    /// Set the store the watermark is loaded from and saved to.
    pub fn with_checkpoint_store<N>(self, checkpoints: N) -> ProjectorBuilder<S, P, N>
    where
        N: CheckpointStore,
    {
        ProjectorBuilder {
            store: self.store,
            projection: self.projection,
            checkpoints,
            config: self.config,
        }
    }

    /// Loads the last checkpoint of the projection, if any, and returns a projector resuming from it.
    ///
    /// # Errors
    ///
    /// Will return an `Err` if the checkpoint or the write frontier cannot be read.
    pub async fn try_build(self) -> Result<Projector<S, P, C>, ProjectorError>
    where
        S: EventStore,
        P: Projection<S::Aggregate>,
        C: CheckpointStore,
    {
        let checkpoint: Checkpoint = self
            .checkpoints
            .load(self.projection.name())
            .await
            .map_err(|error| ProjectorError::Checkpoint(Box::new(error)))?
            .unwrap_or_default();

        let latest: GlobalOrder = self
            .store
            .latest_global_order()
            .await
            .map_err(ProjectorError::store)?;

        let status = if checkpoint.watermark >= latest {
            ProjectorStatus::CaughtUp
        } else {
            ProjectorStatus::Lagging
        };

        tracing::info!(
            projection = self.projection.name(),
            watermark = checkpoint.watermark,
            latest,
            "projector resuming"
        );

        let (progress, _) = watch::channel(Progress {
            watermark: checkpoint.watermark,
            status,
            latest,
        });

        Ok(Projector {
            store: self.store,
            projection: self.projection,
            checkpoints: self.checkpoints,
            config: self.config,
            persisted: checkpoint.watermark,
            checkpoint,
            hole: HoleTracker::default(),
            last_progress: Instant::now(),
            progress,
        })
    }
}

/// Lagging consumer of the global order of a store, keeping a [`Projection`] up to date.
///
/// The projector applies events by increasing global order. When it meets a missing order it waits
/// for it up to the configured lag window, as it may belong to a transaction still in flight.
/// Past the lag window the order is deemed aborted and skipped, so a single missing number never
/// blocks the projection forever.
pub struct Projector<S, P, C = InMemoryCheckpointStore> {
    store: S,
    projection: Arc<P>,
    checkpoints: C,
    config: ProjectorConfig,
    checkpoint: Checkpoint,
    /// Watermark of the checkpoint last saved to the checkpoint store.
    persisted: GlobalOrder,
    hole: HoleTracker,
    last_progress: Instant,
    progress: watch::Sender<Progress>,
}

impl<S, P, C> Projector<S, P, C>
where
    S: EventStore,
    P: Projection<S::Aggregate>,
    C: CheckpointStore,
{
    /// Returns a read side handle on the projection.
    pub fn reader(&self) -> ProjectionReader<P> {
        ProjectionReader::new(Arc::clone(&self.projection), self.progress.subscribe())
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn status(&self) -> ProjectorStatus {
        self.progress.borrow().status
    }

    /// Fetches the next batch of events, applies what can be applied, saves the checkpoint and
    /// refreshes the status.
    ///
    /// # Errors
    ///
    /// Events applied before the failure stay applied. A checkpoint that could not be saved is saved
    /// again by the next cycle.
    #[tracing::instrument(skip_all, fields(projection = self.projection.name(), from = self.checkpoint.watermark))]
    pub async fn run_once(&mut self) -> Result<CycleOutcome, ProjectorError> {
        let started_from: GlobalOrder = self.checkpoint.watermark;
        let mut outcome = CycleOutcome::default();

        let advanced = self.advance(&mut outcome).await;
        outcome.watermark = self.checkpoint.watermark;

        if self.checkpoint.watermark != self.persisted {
            self.checkpoints
                .save(self.projection.name(), &self.checkpoint)
                .await
                .map_err(|error| ProjectorError::Checkpoint(Box::new(error)))?;
            self.persisted = self.checkpoint.watermark;

            tracing::debug!(
                applied = outcome.applied,
                filtered = outcome.filtered,
                skipped = outcome.skipped,
                watermark = self.checkpoint.watermark,
                "projector advanced"
            );
        }

        let watermark: GlobalOrder = self.checkpoint.watermark;
        self.progress.send_modify(|progress| progress.watermark = watermark);

        let refreshed = self.refresh_status(watermark != started_from).await;
        advanced?;
        refreshed?;

        Ok(outcome)
    }

    /// Runs cycles until `shutdown` completes, sleeping the poll interval whenever a cycle had
    /// nothing to apply. Failed cycles are logged and retried: a projector that keeps failing
    /// ends up reported as stalled. Returns the last checkpoint.
    pub async fn run_until<F>(mut self, shutdown: F) -> Checkpoint
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let idle: bool = match self.run_once().await {
                Ok(outcome) => !outcome.advanced(),
                Err(error) => {
                    tracing::error!(
                        projection = self.projection.name(),
                        retryable = error.is_retryable(),
                        error = %error,
                        "projector cycle failed"
                    );
                    true
                }
            };

            let pause: Duration = if idle { self.config.poll_interval } else { Duration::ZERO };

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!(
            projection = self.projection.name(),
            watermark = self.checkpoint.watermark,
            "projector stopped"
        );

        self.checkpoint
    }

    /// Runs cycles forever. See [`Projector::run_until`].
    pub async fn run(self) -> Checkpoint {
        self.run_until(std::future::pending()).await
    }

    async fn advance(&mut self, outcome: &mut CycleOutcome) -> Result<(), ProjectorError> {
        let events: Vec<Result<StoreEvent<<S::Aggregate as Aggregate>::Event>, S::Error>> = self
            .store
            .read_since(self.checkpoint.watermark, self.config.batch_size)
            .collect()
            .await;

        let now: Instant = Instant::now();

        for event in events {
            let store_event = event.map_err(ProjectorError::store)?;
            let global_order: GlobalOrder = store_event.global_order;

            if global_order <= self.checkpoint.watermark {
                tracing::debug!(global_order, "ignoring already handled event");
                continue;
            }

            let next_expected: GlobalOrder = self.checkpoint.watermark + 1;
            let mut skipped: u64 = 0;

            if global_order > next_expected {
                let missing_for: Duration = self.hole.observe(next_expected, global_order - 1, now);

                if missing_for < self.config.lag_window {
                    tracing::debug!(
                        from = next_expected,
                        to = global_order - 1,
                        ?missing_for,
                        "waiting for in-flight global orders"
                    );
                    outcome.blocked_on = Some(next_expected);
                    break;
                }

                skipped = (global_order - next_expected) as u64;
                tracing::warn!(
                    projection = self.projection.name(),
                    from = next_expected,
                    to = global_order - 1,
                    ?missing_for,
                    "global orders still missing past the lag window, treating them as aborted"
                );
            }

            if self.handles(&store_event.event_type) {
                self.projection
                    .apply(&store_event)
                    .await
                    .map_err(|error| ProjectorError::Projection {
                        projection: self.projection.name(),
                        global_order,
                        source: Box::new(error),
                    })?;

                self.checkpoint.applied_count += 1;
                outcome.applied += 1;
            } else {
                outcome.filtered += 1;
            }

            self.hole.release(global_order);
            self.checkpoint.skipped_count += skipped as i64;
            outcome.skipped += skipped;
            self.checkpoint.watermark = global_order;
            self.checkpoint.last_seen_at = Some(store_event.occurred_on);
        }

        Ok(())
    }

    fn handles(&self, event_type: &str) -> bool {
        let event_types: &[&'static str] = self.projection.event_types();
        event_types.is_empty() || event_types.iter().any(|handled| *handled == event_type)
    }

    async fn refresh_status(&mut self, advanced: bool) -> Result<ProjectorStatus, ProjectorError> {
        let latest: GlobalOrder = self
            .store
            .latest_global_order()
            .await
            .map_err(ProjectorError::store)?;

        let now: Instant = Instant::now();
        let previous: ProjectorStatus = self.progress.borrow().status;

        let status = if self.checkpoint.watermark >= latest {
            self.last_progress = now;
            ProjectorStatus::CaughtUp
        } else {
            if advanced || previous == ProjectorStatus::CaughtUp {
                self.last_progress = now;
            }

            if now.saturating_duration_since(self.last_progress) > self.config.stall_timeout {
                ProjectorStatus::Stalled
            } else {
                ProjectorStatus::Lagging
            }
        };

        if status != previous {
            match (previous, status) {
                (_, ProjectorStatus::Stalled) => tracing::error!(
                    projection = self.projection.name(),
                    watermark = self.checkpoint.watermark,
                    latest,
                    stalled_for = ?now.saturating_duration_since(self.last_progress),
                    "projector stalled"
                ),
                (ProjectorStatus::Stalled, _) => tracing::info!(
                    projection = self.projection.name(),
                    watermark = self.checkpoint.watermark,
                    "projector recovered"
                ),
                _ => tracing::debug!(
                    projection = self.projection.name(),
                    %status,
                    "projector status changed"
                ),
            }
        }

        self.progress.send_replace(Progress {
            watermark: self.checkpoint.watermark,
            status,
            latest,
        });

        Ok(status)
    }
}
