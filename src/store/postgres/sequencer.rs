use sqlx::PgConnection;

use crate::sql::statements::Statements;
use crate::types::GlobalOrder;

/// Draws global orders from the Postgres sequence of an event table.
///
/// Sequences are not transactional: a number drawn by a transaction that rolls back is never handed
/// out again, and drawing one never waits on other writers.
#[derive(Debug, Clone)]
pub struct PgSequencer {
    next_order: String,
}

impl PgSequencer {
    pub(crate) fn new(statements: &Statements) -> Self {
        Self {
            next_order: statements.next_order().to_string(),
        }
    }

    /// Issues the next global order on the given connection, usually the one of the append transaction.
    pub async fn next_order(&self, connection: &mut PgConnection) -> Result<GlobalOrder, sqlx::Error> {
        sqlx::query_scalar::<_, GlobalOrder>(&self.next_order)
            .fetch_one(connection)
            .await
    }
}
