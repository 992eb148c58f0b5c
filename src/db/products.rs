use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use super::{corrupt, persistence, PgStore};
use crate::errors::AppError;
use crate::models::product::{CustomRule, EnvRenderKvs, MatchRule, ProductTemplate, ServiceInfo};
use crate::models::service::DeployType;
use crate::store::ProductStore;

const COLUMNS: &str = r#"
    product_name, project_name, description, revision, team_id, user_ids,
    services, shared_services, env_vars, deploy_type, is_opensource,
    onboarding_status, custom_image_rule, custom_tar_rule,
    image_searching_rules, update_by, update_time
"#;

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    product_name: String,
    project_name: String,
    description: String,
    revision: i64,
    team_id: Option<i64>,
    user_ids: Json<Vec<i64>>,
    services: Json<Vec<Vec<String>>>,
    shared_services: Json<Vec<ServiceInfo>>,
    env_vars: Json<Vec<EnvRenderKvs>>,
    deploy_type: String,
    is_opensource: bool,
    onboarding_status: i32,
    custom_image_rule: Option<Json<CustomRule>>,
    custom_tar_rule: Option<Json<CustomRule>>,
    image_searching_rules: Json<Vec<MatchRule>>,
    update_by: String,
    update_time: Option<DateTime<Utc>>,
}

impl TryFrom<ProductRow> for ProductTemplate {
    type Error = AppError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Self {
            deploy_type: row
                .deploy_type
                .parse::<DeployType>()
                .map_err(|e| corrupt("project", e))?,
            product_name: row.product_name,
            project_name: row.project_name,
            description: row.description,
            revision: row.revision,
            team_id: row.team_id,
            user_ids: row.user_ids.0,
            services: row.services.0,
            shared_services: row.shared_services.0,
            vars: Vec::new(),
            env_vars: row.env_vars.0,
            is_opensource: row.is_opensource,
            onboarding_status: row.onboarding_status,
            custom_image_rule: row.custom_image_rule.map(|r| r.0),
            custom_tar_rule: row.custom_tar_rule.map(|r| r.0),
            image_searching_rules: row.image_searching_rules.0,
            update_by: row.update_by,
            update_time: row.update_time,
        })
    }
}

fn not_found(product_name: &str) -> AppError {
    AppError::NotFound(format!("project {product_name}"))
}

async fn fetch_all(store: &PgStore, sql: &str) -> Result<Vec<ProductTemplate>, AppError> {
    sqlx::query_as::<_, ProductRow>(sql)
        .fetch_all(&store.pool)
        .await?
        .into_iter()
        .map(ProductTemplate::try_from)
        .collect()
}

#[async_trait]
impl ProductStore for PgStore {
    async fn find(&self, product_name: &str) -> Result<ProductTemplate, AppError> {
        let sql = format!("SELECT {COLUMNS} FROM product_templates WHERE product_name = $1");
        sqlx::query_as::<_, ProductRow>(&sql)
            .bind(product_name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found(product_name))?
            .try_into()
    }

    async fn list(&self) -> Result<Vec<ProductTemplate>, AppError> {
        fetch_all(
            self,
            &format!("SELECT {COLUMNS} FROM product_templates ORDER BY product_name"),
        )
        .await
    }

    async fn list_open_source(&self) -> Result<Vec<ProductTemplate>, AppError> {
        fetch_all(
            self,
            &format!(
                "SELECT {COLUMNS} FROM product_templates WHERE is_opensource ORDER BY product_name"
            ),
        )
        .await
    }

    async fn create(&self, template: &ProductTemplate) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO product_templates ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             COALESCE($17, NOW()))"
        );
        bind_template(sqlx::query(&sql), template)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(format!(
                        "project {} already exists",
                        template.product_name
                    ))
                }
                _ => persistence(e),
            })?;
        Ok(())
    }

    async fn update(
        &self,
        product_name: &str,
        template: &ProductTemplate,
    ) -> Result<(), AppError> {
        let sql = r#"
            UPDATE product_templates SET
                product_name = $1, project_name = $2, description = $3, revision = $4,
                team_id = $5, user_ids = $6, services = $7, shared_services = $8,
                env_vars = $9, deploy_type = $10, is_opensource = $11,
                onboarding_status = $12, custom_image_rule = $13, custom_tar_rule = $14,
                image_searching_rules = $15, update_by = $16,
                update_time = COALESCE($17, NOW())
            WHERE product_name = $18
        "#;
        let result = bind_template(sqlx::query(sql), template)
            .bind(product_name)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        if result.rows_affected() == 0 {
            return Err(not_found(product_name));
        }
        Ok(())
    }

    async fn update_onboarding_status(
        &self,
        product_name: &str,
        status: i32,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE product_templates SET onboarding_status = $2 WHERE product_name = $1",
        )
        .bind(product_name)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        if result.rows_affected() == 0 {
            return Err(not_found(product_name));
        }
        Ok(())
    }

    async fn update_service_order(
        &self,
        product_name: &str,
        services: &[Vec<String>],
        update_by: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE product_templates
            SET services = $2, update_by = $3, update_time = NOW()
            WHERE product_name = $1
            "#,
        )
        .bind(product_name)
        .bind(Json(services))
        .bind(update_by)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        if result.rows_affected() == 0 {
            return Err(not_found(product_name));
        }
        Ok(())
    }

    async fn delete(&self, product_name: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM product_templates WHERE product_name = $1")
            .bind(product_name)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

/// Bind the template columns as `$1..$17`, in [`COLUMNS`] order.
fn bind_template<'q>(query: PgQuery<'q>, t: &'q ProductTemplate) -> PgQuery<'q> {
    query
        .bind(&t.product_name)
        .bind(&t.project_name)
        .bind(&t.description)
        .bind(t.revision)
        .bind(t.team_id)
        .bind(Json(&t.user_ids))
        .bind(Json(&t.services))
        .bind(Json(&t.shared_services))
        .bind(Json(&t.env_vars))
        .bind(t.deploy_type.as_str())
        .bind(t.is_opensource)
        .bind(t.onboarding_status)
        .bind(t.custom_image_rule.as_ref().map(Json))
        .bind(t.custom_tar_rule.as_ref().map(Json))
        .bind(Json(&t.image_searching_rules))
        .bind(&t.update_by)
        .bind(t.update_time)
}
