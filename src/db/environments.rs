use async_trait::async_trait;

use super::{persistence, PgStore};
use crate::errors::AppError;
use crate::models::environment::Environment;
use crate::store::EnvironmentStore;

#[derive(Debug, sqlx::FromRow)]
struct EnvironmentRow {
    product_name: String,
    env_name: String,
    status: String,
}

impl From<EnvironmentRow> for Environment {
    fn from(row: EnvironmentRow) -> Self {
        Self {
            product_name: row.product_name,
            env_name: row.env_name,
            status: row.status,
        }
    }
}

#[async_trait]
impl EnvironmentStore for PgStore {
    async fn list_by_product(&self, product_name: &str) -> Result<Vec<Environment>, AppError> {
        let rows = sqlx::query_as::<_, EnvironmentRow>(
            r#"
            SELECT product_name, env_name, status FROM environments
            WHERE product_name = $1 ORDER BY env_name
            "#,
        )
        .bind(product_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Environment::from).collect())
    }

    async fn update_status(
        &self,
        env_name: &str,
        product_name: &str,
        status: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE environments SET status = $3 WHERE env_name = $1 AND product_name = $2",
        )
        .bind(env_name)
        .bind(product_name)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "environment {env_name} of project {product_name}"
            )));
        }
        Ok(())
    }

    async fn count(&self, product_name: &str) -> Result<i64, AppError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM environments WHERE product_name = $1")
                .bind(product_name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn delete(&self, env_name: &str, product_name: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM environments WHERE env_name = $1 AND product_name = $2")
            .bind(env_name)
            .bind(product_name)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }

    async fn purge_external_services(&self, product_name: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM external_env_services WHERE product_name = $1")
            .bind(product_name)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }
}
