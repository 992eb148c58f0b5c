use async_trait::async_trait;
use sqlx::types::Json;

use super::{persistence, PgStore};
use crate::errors::AppError;
use crate::models::environment::RenderSet;
use crate::models::product::RenderKv;
use crate::store::RenderSetStore;

/// `env_name` is stored as `''` for the project-wide set so it can take part
/// in the primary key.
#[derive(Debug, sqlx::FromRow)]
struct RenderSetRow {
    name: String,
    product_tmpl: String,
    env_name: String,
    update_by: String,
    is_default: bool,
    kvs: Json<Vec<RenderKv>>,
}

impl From<RenderSetRow> for RenderSet {
    fn from(row: RenderSetRow) -> Self {
        Self {
            name: row.name,
            product_tmpl: row.product_tmpl,
            env_name: (!row.env_name.is_empty()).then_some(row.env_name),
            update_by: row.update_by,
            is_default: row.is_default,
            kvs: row.kvs.0,
        }
    }
}

#[async_trait]
impl RenderSetStore for PgStore {
    async fn upsert(&self, set: &RenderSet) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO render_sets (name, product_tmpl, env_name, update_by, is_default, kvs)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (product_tmpl, env_name) DO UPDATE SET
                name = EXCLUDED.name,
                update_by = EXCLUDED.update_by,
                is_default = EXCLUDED.is_default,
                kvs = EXCLUDED.kvs,
                updated_at = NOW()
            "#,
        )
        .bind(&set.name)
        .bind(&set.product_tmpl)
        .bind(set.env_name.as_deref().unwrap_or_default())
        .bind(&set.update_by)
        .bind(set.is_default)
        .bind(Json(&set.kvs))
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn find_default(&self, product_name: &str) -> Result<Option<RenderSet>, AppError> {
        let row = sqlx::query_as::<_, RenderSetRow>(
            r#"
            SELECT name, product_tmpl, env_name, update_by, is_default, kvs
            FROM render_sets WHERE product_tmpl = $1 AND is_default
            "#,
        )
        .bind(product_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RenderSet::from))
    }

    async fn list_by_product(&self, product_name: &str) -> Result<Vec<RenderSet>, AppError> {
        let rows = sqlx::query_as::<_, RenderSetRow>(
            r#"
            SELECT name, product_tmpl, env_name, update_by, is_default, kvs
            FROM render_sets WHERE product_tmpl = $1 ORDER BY env_name
            "#,
        )
        .bind(product_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RenderSet::from).collect())
    }

    async fn delete_by_product(&self, product_name: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM render_sets WHERE product_tmpl = $1")
            .bind(product_name)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }
}
