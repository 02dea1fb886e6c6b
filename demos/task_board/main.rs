//! A task board: commands open and close tasks, a projector keeps a board of the open ones, and
//! the caller reads its own writes through `wait_for_version`. One writer takes a global order and
//! rolls back, leaving a gap the projector waits for, then skips, and the gap monitor reports.
//!
//! Run with `RUST_LOG=debug cargo run --example task_board` to see the projector at work. The
//! projector and gap monitor tuning is read from `EVENTLINE_*` variables.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use eventline::config::Settings;
use eventline::gap::GapMonitor;
use eventline::projector::{Projection, ProjectorBuilder};
use eventline::store::{InMemoryStore, InMemoryStoreError, StoreEvent};
use eventline::{Aggregate, AggregateManager, AggregateState, Event};

pub struct Task;

#[derive(Default, Clone, Debug)]
pub struct TaskState {
    title: Option<String>,
    done: bool,
}

pub enum TaskCommand {
    Open { title: String },
    Close,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum TaskEvent {
    Opened { title: String },
    Closed,
}

impl Event for TaskEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TaskEvent::Opened { .. } => "TaskOpened",
            TaskEvent::Closed => "TaskClosed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task is already open")]
    AlreadyOpen,
    #[error("task is not open")]
    NotOpen,
}

impl Aggregate for Task {
    const NAME: &'static str = "task";
    type State = TaskState;
    type Command = TaskCommand;
    type Event = TaskEvent;
    type Error = TaskError;

    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TaskCommand::Open { .. } if state.title.is_some() => Err(TaskError::AlreadyOpen),
            TaskCommand::Open { title } => Ok(vec![TaskEvent::Opened { title }]),
            TaskCommand::Close if state.title.is_none() || state.done => Err(TaskError::NotOpen),
            TaskCommand::Close => Ok(vec![TaskEvent::Closed]),
        }
    }

    fn apply_event(state: Self::State, payload: Self::Event) -> Self::State {
        match payload {
            TaskEvent::Opened { title } => TaskState {
                title: Some(title),
                done: false,
            },
            TaskEvent::Closed => TaskState { done: true, ..state },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Aggregate(#[from] TaskError),
    #[error(transparent)]
    Store(#[from] InMemoryStoreError),
}

/// Open tasks by id.
#[derive(Default)]
pub struct Board {
    open: Mutex<BTreeMap<Uuid, String>>,
}

impl Board {
    fn open_titles(&self) -> Vec<String> {
        self.open.lock().map(|open| open.values().cloned().collect()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Projection<Task> for Board {
    type Error = std::convert::Infallible;

    async fn apply(&self, event: &StoreEvent<TaskEvent>) -> Result<(), Self::Error> {
        let mut open = self.open.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match &event.payload {
            TaskEvent::Opened { title } => {
                open.insert(event.aggregate_id, title.clone());
            }
            TaskEvent::Closed => {
                open.remove(&event.aggregate_id);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "task_board"
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings: Settings = Settings::from_env().expect("invalid EVENTLINE_* settings");
    let projector_config = settings
        .projector
        .with_lag_window(Duration::from_millis(300))
        .with_poll_interval(Duration::from_millis(20));

    let store: InMemoryStore<Task> = InMemoryStore::new();
    let manager = AggregateManager::new(store.clone());

    let projector = ProjectorBuilder::new(store.clone(), Board::default())
        .with_config(projector_config)
        .try_build()
        .await
        .expect("failed to build projector");
    let board = projector.reader();
    let (shutdown, stop) = tokio::sync::oneshot::channel::<()>();
    let projector = tokio::spawn(projector.run_until(async move {
        let _ = stop.await;
    }));

    let mut last_write = 0;
    for title in ["write docs", "fix the build", "release"] {
        let state: AggregateState<TaskState> = AggregateState::new();
        let store_events = manager
            .handle_command::<Error>(state, TaskCommand::Open { title: title.to_string() })
            .await
            .expect("failed to open task");
        last_write = store_events.last().map_or(last_write, |event| event.global_order);
    }

    // A writer that takes a global order and then gives up.
    {
        let mut transaction = store.begin();
        let _ = transaction.append(
            Uuid::new_v4(),
            0,
            vec![TaskEvent::Opened {
                title: "never committed".to_string(),
            }],
        );
        transaction.rollback();
    }

    let state: AggregateState<TaskState> = AggregateState::new();
    let first: Uuid = *state.id();
    manager
        .handle_command::<Error>(state, TaskCommand::Open { title: "close me".to_string() })
        .await
        .expect("failed to open task");

    let state = manager.load(first).await.expect("failed to load task").expect("task exists");
    let store_events = manager
        .handle_command::<Error>(state, TaskCommand::Close)
        .await
        .expect("failed to close task");
    let closed_at = store_events.last().map_or(last_write, |event| event.global_order);

    match board.wait_for_version(closed_at, Duration::from_secs(5)).await {
        Ok(ready) => {
            let versioned = board.query(Board::open_titles);
            tracing::info!(as_of = ready.as_of_watermark, open = ?versioned.data, "board is up to date");
        }
        Err(not_yet_visible) => {
            let stale = board.query(Board::open_titles);
            tracing::warn!(%not_yet_visible, open = ?stale.data, "serving a stale board");
        }
    }

    let mut monitor = GapMonitor::new(
        store.clone(),
        settings.gap_monitor.with_grace_period(Duration::from_millis(100)),
    );
    tokio::time::sleep(Duration::from_millis(150)).await;
    let _ = monitor.check(100).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    if let Ok(report) = monitor.check(100).await {
        tracing::info!(gaps = ?report.confirmed().collect::<Vec<_>>(), "gap audit");
    }

    let _ = shutdown.send(());
    if let Ok(checkpoint) = projector.await {
        tracing::info!(
            watermark = checkpoint.watermark,
            skipped = checkpoint.skipped_count,
            "projector stopped"
        );
    }
}
