use async_trait::async_trait;

use super::PgStore;
use crate::errors::AppError;
use crate::store::CounterStore;

#[async_trait]
impl CounterStore for PgStore {
    async fn next_seq(&self, key: &str) -> Result<i64, AppError> {
        // The upsert serializes concurrent increments on the row lock.
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO counters (name, seq) VALUES ($1, 1)
            ON CONFLICT (name) DO UPDATE SET seq = counters.seq + 1
            RETURNING seq
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Sequence(format!("counter {key}: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM counters WHERE name = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
