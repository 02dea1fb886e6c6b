use crate::event::Event;

/// The Aggregate trait is responsible for validating commands, mapping commands to events, and
/// applying events onto the state.
///
/// An Aggregate should be able to derive its own state from nothing but its initial configuration
/// and its own event stream, read back in sequence number order.
pub trait Aggregate {
    /// Name of the aggregate. It is used as prefix of the event store table name.
    const NAME: &'static str;
    type State: Default + Send;
    type Command: Send;
    type Event: Event + Send + Sync;
    type Error: std::error::Error;

    /// Handles, validates a command and emits events.
    ///
    /// If the command is not valid for the current state, an error is returned and no event is
    /// persisted.
    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Updates the aggregate state using the new event. This assumes that the event can be
    /// correctly applied to the state.
    fn apply_event(state: Self::State, payload: Self::Event) -> Self::State;
}
