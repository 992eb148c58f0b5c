use std::env;

/// Which implementation backs the storage contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Self::Memory,
            _ => Self::Postgres,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub authz_api_url: String,
    pub authz_root_key: String,
    pub workflow_api_url: String,
    pub freestyle_pipelines_enabled: bool,
    pub max_concurrent_lookups: usize,
    pub http_timeout_secs: u64,
    pub frontend_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        let store_backend = StoreBackend::parse(
            &env::var("STORE_BACKEND").unwrap_or_else(|_| "postgres".to_string()),
        );
        let database_url = match store_backend {
            StoreBackend::Postgres => Some(env::var("DATABASE_URL")?),
            StoreBackend::Memory => env::var("DATABASE_URL").ok(),
        };

        Ok(Self {
            store_backend,
            database_url,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            host: env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("BACKEND_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            jwt_secret: env::var("JWT_SECRET")?,
            authz_api_url: env::var("AUTHZ_API_URL")
                .unwrap_or_else(|_| "http://localhost:34001".to_string()),
            authz_root_key: env::var("AUTHZ_ROOT_KEY").unwrap_or_default(),
            workflow_api_url: env::var("WORKFLOW_API_URL")
                .unwrap_or_else(|_| "http://localhost:25000".to_string()),
            freestyle_pipelines_enabled: env::var("FREESTYLE_PIPELINES_ENABLED")
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"))
                .unwrap_or(false),
            max_concurrent_lookups: env::var("MAX_CONCURRENT_LOOKUPS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),
            http_timeout_secs: env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "https://localhost:5173".to_string()),
        })
    }
}
