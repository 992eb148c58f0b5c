//! PostgreSQL storage backend: connection pool, migrations, and the
//! [`PgStore`] implementation of every storage contract.

mod counters;
mod environments;
mod products;
mod render_sets;
mod services;
mod workloads;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::errors::AppError;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Storage backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Failed writes surface as persistence errors rather than raw database errors.
fn persistence(e: sqlx::Error) -> AppError {
    AppError::Persistence(e.to_string())
}

/// A stored value that no longer parses into its model type.
fn corrupt(what: &str, detail: String) -> AppError {
    AppError::Persistence(format!("corrupt {what} row: {detail}"))
}
