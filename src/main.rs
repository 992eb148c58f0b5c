use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mimalloc::MiMalloc;
use projhub::clients::authz::HttpAuthorizationClient;
use projhub::clients::workflow::HttpWorkflowClient;
use projhub::config::{AppConfig, StoreBackend};
use projhub::context::{ProjectContext, ProjectSettings};
use projhub::db::{self, PgStore};
use projhub::store::memory::MemoryStore;
use projhub::AppState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "projhub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let timeout = Duration::from_secs(config.http_timeout_secs);

    let authz = Arc::new(HttpAuthorizationClient::new(
        &config.authz_api_url,
        &config.authz_root_key,
        timeout,
    )?);
    let workflows = Arc::new(HttpWorkflowClient::new(&config.workflow_api_url, timeout)?);
    let settings = ProjectSettings {
        max_concurrent_lookups: config.max_concurrent_lookups,
        freestyle_pipelines_enabled: config.freestyle_pipelines_enabled,
    };

    let ctx = match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres backend")?;
            let pool = db::create_pool(url, config.database_max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Using PostgreSQL storage");
            ProjectContext::new(Arc::new(PgStore::new(pool)), authz, workflows, settings)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory storage, data is lost on restart");
            ProjectContext::new(Arc::new(MemoryStore::new()), authz, workflows, settings)
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid BACKEND_HOST/BACKEND_PORT")?;
    tracing::info!(host = %addr, "Starting ProjHub API server");

    let app = projhub::routes::router(AppState {
        ctx: Arc::new(ctx),
        config,
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
