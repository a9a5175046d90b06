use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Which implementation backs the queue, the record store and the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportBackend {
    Postgres,
    /// In-process queue and store; nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_backend")]
    pub backend: ExportBackend,

    /// Directory artifacts are written to.
    #[serde(default = "default_exports_dir")]
    pub exports_dir: PathBuf,

    /// Lifetime of a download link (default: 3600 = 1 hour)
    #[serde(default = "default_download_ttl")]
    pub download_ttl_secs: i64,

    /// Number of concurrent export workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Deliveries of one job before it is marked failed for good
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    /// Seconds an unacknowledged delivery stays hidden before redelivery
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Upper bound on how long an idle worker waits before re-polling the queue
    #[serde(default = "default_queue_poll_interval")]
    pub queue_poll_interval_ms: u64,

    /// Records read from the data source per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Submissions allowed per requester per hour; 0 disables the limit
    #[serde(default = "default_submit_rate_limit")]
    pub submit_rate_limit_per_hour: u32,
}

impl ExportConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    pub fn download_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.download_ttl_secs)
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    2
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_backend() -> ExportBackend {
    ExportBackend::Postgres
}
fn default_exports_dir() -> PathBuf {
    PathBuf::from("exports")
}
fn default_download_ttl() -> i64 {
    domain::models::DEFAULT_DOWNLOAD_TTL_SECS
}
fn default_workers() -> usize {
    2
}
fn default_max_delivery_attempts() -> u32 {
    3
}
fn default_visibility_timeout() -> u64 {
    300
}
fn default_queue_poll_interval() -> u64 {
    5000
}
fn default_page_size() -> usize {
    500
}
fn default_cleanup_interval() -> u64 {
    3600
}
fn default_submit_rate_limit() -> u32 {
    10
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

const TEST_DEFAULTS: &str = r#"
    [server]
    host = "127.0.0.1"
    port = 8080
    request_timeout_secs = 30

    [database]
    url = ""

    [logging]
    level = "info"
    format = "pretty"

    [security]
    cors_origins = []

    [export]
    backend = "memory"
    exports_dir = "exports"
    download_ttl_secs = 3600
    workers = 2
    max_delivery_attempts = 3
    visibility_timeout_secs = 300
    queue_poll_interval_ms = 5000
    page_size = 500
    cleanup_interval_secs = 3600
    submit_rate_limit_per_hour = 10
"#;

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with BX__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("BX")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("security.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Build a configuration from embedded defaults plus overrides, without
    /// touching config files or the environment. Uses the memory backend.
    ///
    /// Validation is skipped so tests can build partial configs.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(TEST_DEFAULTS, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.export.backend == ExportBackend::Postgres && self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "BX__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.export.workers == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "export.workers must be at least 1".to_string(),
            ));
        }

        if self.export.page_size == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "export.page_size must be at least 1".to_string(),
            ));
        }

        if self.export.max_delivery_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "export.max_delivery_attempts must be at least 1".to_string(),
            ));
        }

        if self.export.download_ttl_secs <= 0 {
            return Err(ConfigValidationError::InvalidValue(
                "export.download_ttl_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigValidationError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| {
                ConfigValidationError::InvalidValue(format!("Invalid socket address: {}", e))
            })
    }
}
