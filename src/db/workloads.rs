use async_trait::async_trait;

use super::{persistence, PgStore};
use crate::errors::AppError;
use crate::store::WorkloadStore;

#[async_trait]
impl WorkloadStore for PgStore {
    async fn remove_product(&self, product_name: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM workloads WHERE product_name = $1")
            .bind(product_name)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        tracing::debug!(
            product = %product_name,
            removed = result.rows_affected(),
            "Removed workload entries"
        );
        Ok(())
    }
}
