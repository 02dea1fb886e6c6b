use serde::{Deserialize, Serialize};

use eventline::error::StoreError;
use eventline::store::InMemoryStoreError;
use eventline::Event;

pub enum TestCommand {
    Single,
    Multi,
    Reset,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum TestEvent {
    Added { add: i32 },
    Reset,
}

impl Event for TestEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TestEvent::Added { .. } => "TestAdded",
            TestEvent::Reset => "TestReset",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TestError {
    #[error("counter is already at zero")]
    AlreadyReset,
}

#[derive(thiserror::Error, Debug)]
pub enum TestManagerError {
    #[error(transparent)]
    Store(#[from] InMemoryStoreError),
    #[error(transparent)]
    Aggregate(#[from] TestError),
}

impl TestManagerError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, TestManagerError::Store(error) if error.conflict().is_some())
    }
}
