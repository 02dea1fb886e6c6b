use async_trait::async_trait;
use sqlx::postgres::PgQueryResult;
use sqlx::{Database, Error, Pool, Postgres, Transaction};

use crate::{statement, Aggregate};

/// Trait used to set up the tables, sequences and indexes an event store needs.
#[async_trait]
pub trait MigrationsHandler<D>
where
    D: Database,
{
    async fn run<A>(pool: &Pool<D>) -> Result<(), Error>
    where
        A: Aggregate;
}

pub struct Migrations;

#[async_trait]
impl MigrationsHandler<Postgres> for Migrations {
    async fn run<A>(pool: &Pool<Postgres>) -> Result<(), Error>
    where
        A: Aggregate,
    {
        let mut transaction: Transaction<Postgres> = pool.begin().await?;

        let migrations: Vec<String> = vec![
            statement!("postgres/migrations/01_create_sequence.sql", A),
            statement!("postgres/migrations/02_create_table.sql", A),
            statement!("postgres/migrations/03_create_unique_constraint.sql", A),
            statement!("postgres/migrations/04_create_global_order_constraint.sql", A),
            statement!("postgres/migrations/05_create_index.sql", A),
            include_str!("postgres/migrations/06_create_checkpoints_table.sql").to_string(),
        ];

        for migration in migrations {
            let _: PgQueryResult = sqlx::query(migration.as_str()).execute(&mut *transaction).await?;
        }

        transaction.commit().await
    }
}
