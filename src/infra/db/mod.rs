//! Postgres-backed repository implementations.

mod bindings;
mod uris;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use apalis_sql::postgres::PostgresStorage;
use sqlx::{
    Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};

use crate::infra::error::InfraError;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    /// Apply the job queue's schema, then the crate's own. Both share the
    /// migrations table, so each migrator ignores the other's versions.
    pub async fn run_migrations(pool: &PgPool) -> Result<(), InfraError> {
        let mut jobs = PostgresStorage::migrations();
        jobs.set_ignore_missing(true);
        jobs.run(pool).await?;

        let mut schema = sqlx::migrate!("./migrations");
        schema.set_ignore_missing(true);
        schema.run(pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}
