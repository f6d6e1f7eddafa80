//! Configuration management for DeckForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// LLM analysis configuration
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Text extraction tool configuration
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Completion email configuration
    #[serde(default)]
    pub email: EmailConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds; covers the whole synchronous pipeline
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Directory for staged uploads and rendered reports (system temp if unset)
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes); `memory` selects the in-process store
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Create the jobs table on startup if it does not exist
    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Storage backend: s3, local
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Bucket name (s3)
    pub bucket: Option<String>,

    /// AWS region (s3)
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible stores
    pub endpoint: Option<String>,

    /// Root directory (local)
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,

    /// Externally reachable base URL used in local signed links
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Secret used to sign local download links
    pub signing_secret: Option<String>,

    /// Signed URL lifetime for interactive downloads
    #[serde(default = "default_download_url_ttl")]
    pub download_url_ttl_secs: u64,

    /// Signed URL lifetime for links sent by email
    #[serde(default = "default_email_url_ttl")]
    pub email_url_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// LLM provider: openai, mock
    #[serde(default = "default_analysis_provider")]
    pub provider: String,

    /// API key for the LLM service
    pub api_key: Option<String>,

    /// API base URL (for OpenAI-compatible endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_analysis_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_analysis_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt
    #[serde(default = "default_analysis_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles for each following retry
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractorConfig {
    /// Interpreter or binary to launch
    #[serde(default = "default_extractor_program")]
    pub program: String,

    /// Script passed as the first argument (omitted when unset)
    pub script: Option<PathBuf>,

    /// Working directory for the child process
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables for the child process
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Timeout in seconds for a full extraction
    #[serde(default = "default_extractor_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    /// Send completion emails
    #[serde(default = "default_email_enabled")]
    pub enabled: bool,

    /// Email API base URL
    #[serde(default = "default_email_api_base")]
    pub api_base: String,

    /// Email API key
    pub api_key: Option<String>,

    /// Sender address
    pub from_address: Option<String>,

    /// Subject line
    #[serde(default = "default_email_subject")]
    pub subject: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or a full EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Deck submissions per user per rolling hour
    #[serde(default = "default_uploads_per_hour")]
    pub uploads_per_hour: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 300 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_database_url() -> String { "memory".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_auto_migrate() -> bool { true }
fn default_storage_backend() -> String { "local".to_string() }
fn default_local_root() -> PathBuf { PathBuf::from("data/objects") }
fn default_public_base_url() -> String { "http://localhost:8080".to_string() }
fn default_download_url_ttl() -> u64 { 600 }
fn default_email_url_ttl() -> u64 { 3600 }
fn default_analysis_provider() -> String { "openai".to_string() }
fn default_analysis_model() -> String { "gpt-4o-mini".to_string() }
fn default_analysis_timeout() -> u64 { 120 }
fn default_analysis_retries() -> u32 { 2 }
fn default_initial_backoff() -> u64 { 1500 }
fn default_temperature() -> f32 { 0.2 }
fn default_max_tokens() -> u32 { 4000 }
fn default_extractor_program() -> String { "python3".to_string() }
fn default_extractor_timeout() -> u64 { 180 }
fn default_email_enabled() -> bool { true }
fn default_email_api_base() -> String { "https://api.resend.com".to_string() }
fn default_email_subject() -> String { "Your pitch deck analysis is ready".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "deckforge".to_string() }
fn default_uploads_per_hour() -> u32 { 10 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    /// Whether jobs live in process memory instead of Postgres
    pub fn uses_memory_store(&self) -> bool {
        self.database.url == "memory"
    }

    /// Directory for temporary files
    pub fn temp_dir(&self) -> PathBuf {
        self.server.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl StorageConfig {
    pub fn download_url_ttl(&self) -> Duration {
        Duration::from_secs(self.download_url_ttl_secs)
    }

    pub fn email_url_ttl(&self) -> Duration {
        Duration::from_secs(self.email_url_ttl_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            temp_dir: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            auto_migrate: default_auto_migrate(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            bucket: None,
            region: None,
            endpoint: None,
            local_root: default_local_root(),
            public_base_url: default_public_base_url(),
            signing_secret: None,
            download_url_ttl_secs: default_download_url_ttl(),
            email_url_ttl_secs: default_email_url_ttl(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: default_analysis_provider(),
            api_key: None,
            api_base: None,
            model: default_analysis_model(),
            timeout_secs: default_analysis_timeout(),
            max_retries: default_analysis_retries(),
            initial_backoff_ms: default_initial_backoff(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: default_extractor_program(),
            script: None,
            working_dir: None,
            env: HashMap::new(),
            timeout_secs: default_extractor_timeout(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: default_email_enabled(),
            api_base: default_email_api_base(),
            api_key: None,
            from_address: None,
            subject: default_email_subject(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            uploads_per_hour: default_uploads_per_hour(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            analysis: AnalysisConfig::default(),
            extractor: ExtractorConfig::default(),
            email: EmailConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.analysis.max_retries, 2);
        assert_eq!(config.analysis.initial_backoff_ms, 1500);
        assert!(config.uses_memory_store());
    }

    #[test]
    fn test_signed_url_lifetimes() {
        let config = AppConfig::default();
        assert_eq!(config.storage.download_url_ttl(), Duration::from_secs(600));
        assert_eq!(config.storage.email_url_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_read_database_fallback() {
        let mut config = AppConfig::default();
        config.database.url = "postgres://localhost/deckforge".to_string();
        assert_eq!(config.read_database_url(), "postgres://localhost/deckforge");
        assert!(!config.uses_memory_store());
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deckforge.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9000\n\n[storage]\nbackend = \"s3\"\nbucket = \"decks\"\n",
        )
        .unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.backend, "s3");
        assert_eq!(config.storage.bucket.as_deref(), Some("decks"));
        assert_eq!(config.rate_limit.uploads_per_hour, 10);
    }
}
