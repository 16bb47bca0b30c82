//! Server configuration loaded from the environment.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::routes::caller::{ROLE_HEADER, USER_HEADER};

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "snapcloud_server=info,snapcloud_storage=info,tower_http=info";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// PostgreSQL connection URL. Without one the in-memory catalog is used.
    pub database_url: Option<String>,

    /// Socket address to listen on.
    pub bind_addr: String,

    /// Root directory of the blob store.
    pub storage_root: PathBuf,

    /// Maximum database connections in pool
    pub max_connections: u32,

    /// Origins allowed to make cross-origin requests.
    pub allowed_origins: Vec<String>,

    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            storage_root: PathBuf::from("./store"),
            max_connections: 10,
            allowed_origins: Vec::new(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    /// Reads `DATABASE_URL`, `BIND_ADDR`, `STORAGE_ROOT`, `MAX_CONNECTIONS`,
    /// `ALLOWED_ORIGINS` (comma separated) and `LOG_FORMAT`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        config.database_url = get("DATABASE_URL");
        if let Some(addr) = get("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(root) = get("STORAGE_ROOT") {
            config.storage_root = PathBuf::from(root);
        }
        if let Some(max) = get("MAX_CONNECTIONS") {
            config.max_connections = max
                .parse()
                .with_context(|| format!("MAX_CONNECTIONS must be a number, got '{}'", max))?;
        }
        if let Some(origins) = get("ALLOWED_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(format) = get("LOG_FORMAT") {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                other => return Err(anyhow!("LOG_FORMAT must be 'text' or 'json', got '{}'", other)),
            };
        }

        Ok(config)
    }

    /// CORS layer admitting only the configured origins, or `None` when no
    /// origin is configured.
    pub fn cors_layer(&self) -> Result<Option<CorsLayer>> {
        if self.allowed_origins.is_empty() {
            return Ok(None);
        }

        let origins = self
            .allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("Invalid allowed origin '{}'", origin))
            })
            .collect::<Result<Vec<_>>>()?;

        let layer = CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([
                header::CONTENT_TYPE,
                HeaderName::from_static(USER_HEADER),
                HeaderName::from_static(ROLE_HEADER),
            ])
            .allow_credentials(true);

        Ok(Some(layer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn test_reads_all_variables() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/snapcloud"),
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("STORAGE_ROOT", "/var/lib/snapcloud"),
            ("MAX_CONNECTIONS", "25"),
            ("ALLOWED_ORIGINS", "https://snap.berkeley.edu, https://extensions.snap.berkeley.edu,"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/snapcloud"));
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.storage_root, PathBuf::from("/var/lib/snapcloud"));
        assert_eq!(config.max_connections, 25);
        assert_eq!(
            config.allowed_origins,
            vec![
                "https://snap.berkeley.edu".to_string(),
                "https://extensions.snap.berkeley.edu".to_string()
            ]
        );
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_blank_database_url_means_none() {
        let config = ServerConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap();
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(ServerConfig::from_lookup(lookup(&[("MAX_CONNECTIONS", "many")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("LOG_FORMAT", "xml")])).is_err());
    }

    #[test]
    fn test_default_log_filter_covers_storage_events() {
        assert!(DEFAULT_LOG_FILTER.contains("snapcloud_storage=info"));
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_cors_layer_only_with_origins() {
        assert!(ServerConfig::default().cors_layer().unwrap().is_none());

        let config = ServerConfig {
            allowed_origins: vec!["https://snap.berkeley.edu".to_string()],
            ..ServerConfig::default()
        };
        assert!(config.cors_layer().unwrap().is_some());
    }
}
