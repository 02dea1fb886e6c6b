pub mod migrations;
pub mod statements;

/// Reads a sql file at compile time and formats the event table name of the given aggregate into it.
#[macro_export]
#[doc(hidden)]
macro_rules! statement {
    ($file:expr, $ty:ty $(,)?) => {{
        format!(include_str!($file), format!("{}_events", <$ty>::NAME))
    }};
}
