/// Position of an event inside its own aggregate stream. Starts at 1 and never skips a value.
pub type SequenceNumber = i64;

/// Position of an event among every event of a store.
///
/// Unique and increasing, but not gapless: a number handed out to a transaction that later aborts
/// is never reused.
pub type GlobalOrder = i64;
