use crate::{statement, Aggregate};

/// Queries of a [`crate::store::postgres::PgStore`], with the event table name of its aggregate
/// already formatted in.
#[derive(Clone, Debug)]
pub struct Statements {
    table_name: String,
    select_head: String,
    next_order: String,
    insert: String,
    select_by_aggregate_id: String,
    select_since: String,
    select_latest: String,
    select_recent: String,
}

impl Statements {
    pub fn new<A: Aggregate>() -> Self {
        Self {
            table_name: format!("{}_events", A::NAME),
            select_head: statement!("postgres/statements/select_head.sql", A),
            next_order: statement!("postgres/statements/next_order.sql", A),
            insert: statement!("postgres/statements/insert.sql", A),
            select_by_aggregate_id: statement!("postgres/statements/select_by_aggregate_id.sql", A),
            select_since: statement!("postgres/statements/select_since.sql", A),
            select_latest: statement!("postgres/statements/select_latest.sql", A),
            select_recent: statement!("postgres/statements/select_recent.sql", A),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn select_head(&self) -> &str {
        &self.select_head
    }

    pub fn next_order(&self) -> &str {
        &self.next_order
    }

    pub fn insert(&self) -> &str {
        &self.insert
    }

    pub fn by_aggregate_id(&self) -> &str {
        &self.select_by_aggregate_id
    }

    pub fn select_since(&self) -> &str {
        &self.select_since
    }

    pub fn select_latest(&self) -> &str {
        &self.select_latest
    }

    pub fn select_recent(&self) -> &str {
        &self.select_recent
    }
}

/// Checkpoint queries, shared by every projection.
pub const SELECT_CHECKPOINT: &str = include_str!("postgres/statements/select_checkpoint.sql");
pub const UPSERT_CHECKPOINT: &str = include_str!("postgres/statements/upsert_checkpoint.sql");
