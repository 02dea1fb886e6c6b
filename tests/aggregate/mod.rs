use eventline::Aggregate;
pub use projection::*;
pub use structs::*;

mod structs;

pub struct TestAggregate;

#[derive(Clone)]
pub struct TestAggregateState {
    pub count: i32,
}

impl Default for TestAggregateState {
    fn default() -> Self {
        Self { count: 1 }
    }
}

impl Aggregate for TestAggregate {
    const NAME: &'static str = "test";
    type State = TestAggregateState;
    type Command = TestCommand;
    type Event = TestEvent;
    type Error = TestError;

    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TestCommand::Single => Ok(vec![TestEvent::Added { add: 1 }]),
            TestCommand::Multi => Ok(vec![TestEvent::Added { add: 1 }, TestEvent::Added { add: 1 }]),
            TestCommand::Reset if state.count == 0 => Err(TestError::AlreadyReset),
            TestCommand::Reset => Ok(vec![TestEvent::Reset]),
        }
    }

    fn apply_event(state: Self::State, payload: Self::Event) -> Self::State {
        match payload {
            TestEvent::Added { add } => Self::State {
                count: state.count + add,
            },
            TestEvent::Reset => Self::State { count: 0 },
        }
    }
}
