use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use super::{corrupt, persistence, PgStore};
use crate::errors::AppError;
use crate::models::product::ServiceInfo;
use crate::models::service::{
    Container, DeployType, HelmChart, ServiceRecord, ServiceStatus, Visibility,
};
use crate::store::ServiceStore;

/// Latest live revision per service key, restricted by the caller's WHERE clause.
const CURRENT_REVISIONS: &str = r#"
    SELECT DISTINCT ON (service_name, product_name, deploy_type)
        service_name, product_name, deploy_type, revision, visibility, status,
        helm_chart, containers, create_by, create_time
    FROM services
    WHERE COALESCE(status, '') <> 'deleting' AND
"#;

const CURRENT_ORDER: &str =
    " ORDER BY service_name, product_name, deploy_type, revision DESC";

#[derive(Debug, sqlx::FromRow)]
struct ServiceRow {
    service_name: String,
    product_name: String,
    deploy_type: String,
    revision: i64,
    visibility: String,
    status: Option<String>,
    helm_chart: Option<Json<HelmChart>>,
    containers: Json<Vec<Container>>,
    create_by: String,
    create_time: DateTime<Utc>,
}

impl TryFrom<ServiceRow> for ServiceRecord {
    type Error = AppError;

    fn try_from(row: ServiceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            deploy_type: row
                .deploy_type
                .parse::<DeployType>()
                .map_err(|e| corrupt("service", e))?,
            visibility: row
                .visibility
                .parse::<Visibility>()
                .map_err(|e| corrupt("service", e))?,
            status: row
                .status
                .as_deref()
                .map(str::parse::<ServiceStatus>)
                .transpose()
                .map_err(|e| corrupt("service", e))?,
            service_name: row.service_name,
            product_name: row.product_name,
            revision: row.revision,
            helm_chart: row.helm_chart.map(|c| c.0),
            containers: row.containers.0,
            create_by: row.create_by,
            create_time: row.create_time,
        })
    }
}

fn into_records(rows: Vec<ServiceRow>) -> Result<Vec<ServiceRecord>, AppError> {
    rows.into_iter().map(ServiceRecord::try_from).collect()
}

#[async_trait]
impl ServiceStore for PgStore {
    async fn list_current_by_product(
        &self,
        product_name: &str,
    ) -> Result<Vec<ServiceRecord>, AppError> {
        let sql = format!("{CURRENT_REVISIONS} product_name = $1 {CURRENT_ORDER}");
        let rows = sqlx::query_as::<_, ServiceRow>(&sql)
            .bind(product_name)
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }

    async fn list_current_for(
        &self,
        infos: &[ServiceInfo],
    ) -> Result<Vec<ServiceRecord>, AppError> {
        if infos.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        let owners: Vec<&str> = infos.iter().map(|i| i.owner.as_str()).collect();

        let sql = format!(
            "{CURRENT_REVISIONS} (service_name, product_name) IN \
             (SELECT * FROM UNNEST($1::text[], $2::text[])) {CURRENT_ORDER}"
        );
        let rows = sqlx::query_as::<_, ServiceRow>(&sql)
            .bind(&names)
            .bind(&owners)
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }

    async fn list_public_by_product(
        &self,
        product_name: &str,
    ) -> Result<Vec<ServiceRecord>, AppError> {
        let sql = format!(
            "{CURRENT_REVISIONS} product_name = $1 AND visibility = 'public' {CURRENT_ORDER}"
        );
        let rows = sqlx::query_as::<_, ServiceRow>(&sql)
            .bind(product_name)
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }

    async fn count(&self, product_name: &str) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM (
                SELECT DISTINCT service_name, deploy_type FROM services
                WHERE product_name = $1 AND COALESCE(status, '') <> 'deleting'
            ) current
            "#,
        )
        .bind(product_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn create(&self, record: &ServiceRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO services (service_name, product_name, deploy_type, revision,
                visibility, status, helm_chart, containers, create_by, create_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&record.service_name)
        .bind(&record.product_name)
        .bind(record.deploy_type.as_str())
        .bind(record.revision)
        .bind(record.visibility.as_str())
        .bind(record.status.map(|s| s.as_str()))
        .bind(record.helm_chart.as_ref().map(Json))
        .bind(Json(&record.containers))
        .bind(&record.create_by)
        .bind(record.create_time)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn delete(
        &self,
        service_name: &str,
        deploy_type: DeployType,
        product_name: &str,
        status: Option<ServiceStatus>,
        revision: i64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            DELETE FROM services
            WHERE service_name = $1 AND deploy_type = $2 AND product_name = $3
              AND revision = $4 AND ($5::text IS NULL OR status = $5)
            "#,
        )
        .bind(service_name)
        .bind(deploy_type.as_str())
        .bind(product_name)
        .bind(revision)
        .bind(status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn delete_all_for_product(&self, product_name: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM services WHERE product_name = $1")
            .bind(product_name)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        Ok(())
    }
}
