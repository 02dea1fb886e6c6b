use std::marker::PhantomData;
use std::sync::Arc;

use sqlx::{Pool, Postgres};

use crate::sql::migrations::{Migrations, MigrationsHandler};
use crate::sql::statements::Statements;
use crate::store::postgres::{InnerPgStore, PgSequencer};
use crate::Aggregate;

use super::PgStore;

/// Struct used to build a brand new [`PgStore`].
pub struct PgStoreBuilder<A>
where
    A: Aggregate,
{
    pool: Pool<Postgres>,
    statements: Statements,
    run_migrations: bool,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> PgStoreBuilder<A>
where
    A: Aggregate,
{
    /// Creates a new instance of a [`PgStoreBuilder`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        PgStoreBuilder {
            pool,
            statements: Statements::new::<A>(),
            run_migrations: true,
            _aggregate: PhantomData,
        }
    }

    /// Calling this function the caller avoid running migrations. It is recommend to run migrations
    /// at least once per store per startup.
    pub fn without_running_migrations(mut self) -> Self {
        self.run_migrations = false;
        self
    }

    /// This function runs all the needed [`Migrations`], atomically setting up the database if
    /// `run_migrations` isn't explicitly set to false. [`Migrations`] should be run only at application
    /// startup due to avoid performance issues.
    ///
    /// Eventually returns an instance of PgStore.
    ///
    /// # Errors
    ///
    /// Will return an `Err` if there's an error running [`Migrations`].
    pub async fn try_build(self) -> Result<PgStore<A>, sqlx::Error> {
        if self.run_migrations {
            Migrations::run::<A>(&self.pool).await?;
        }

        tracing::debug!(table_name = self.statements.table_name(), "postgres store ready");

        Ok(PgStore {
            inner: Arc::new(InnerPgStore {
                pool: self.pool,
                sequencer: PgSequencer::new(&self.statements),
                statements: self.statements,
            }),
            _aggregate: PhantomData,
        })
    }
}
