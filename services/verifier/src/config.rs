use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised when the loaded configuration is unusable
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}

/// Main configuration for the verifier service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Artifact staging configuration
    #[serde(default)]
    pub staging: StagingConfig,
    /// External classifier configuration
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Enable the Prometheus exporter
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// API configuration for the prediction endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port (also settable through `PORT`)
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body in bytes
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

/// Staging area for uploaded artifacts
#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    /// Directory holding staged uploads
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
    /// Run the background sweeper
    #[serde(default = "default_true")]
    pub sweep_enabled: bool,
    /// Interval between sweeps in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Staged files older than this are considered leaked
    #[serde(default = "default_max_artifact_age_secs")]
    pub max_artifact_age_secs: u64,
}

/// External classifier invocation
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Program to launch
    #[serde(default = "default_classifier_program")]
    pub program: String,
    /// Arguments placed before the two artifact paths
    #[serde(default = "default_classifier_args")]
    pub args: Vec<String>,
    /// Wall-clock budget for one invocation in seconds
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
    /// Working directory for the child process
    pub working_dir: Option<PathBuf>,
}

// Default value functions
fn default_service_name() -> String {
    "signature-verifier".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    5001
}

fn default_body_limit_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("backend/uploads")
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_artifact_age_secs() -> u64 {
    600 // 10 minutes
}

fn default_classifier_program() -> String {
    "python3".to_string()
}

fn default_classifier_args() -> Vec<String> {
    vec!["-u".to_string(), "backend/python/predict.py".to_string()]
}

fn default_classifier_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from config files and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/verifier").required(false))
            .add_source(config::File::with_name("/etc/sigverify/verifier").required(false))
            // Override with environment variables
            // VERIFIER__CLASSIFIER__TIMEOUT_SECS -> classifier.timeout_secs
            .add_source(
                config::Environment::with_prefix("VERIFIER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("classifier.args")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            // PORT wins over everything else
            .set_override_option("api.port", std::env::var("PORT").ok())?
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.classifier.program.trim().is_empty() {
            return Err(ConfigError::MissingRequired("classifier.program".to_string()));
        }
        if self.classifier.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "classifier.timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.api.body_limit_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.body_limit_bytes".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.staging.sweep_enabled && self.staging.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "staging.sweep_interval_secs".to_string(),
                message: "must be greater than zero when sweeping is enabled".to_string(),
            });
        }
        // A staged artifact lives at most as long as its classifier run
        if self.staging.sweep_enabled
            && self.staging.max_artifact_age_secs <= self.classifier.timeout_secs
        {
            return Err(ConfigError::InvalidValue {
                key: "staging.max_artifact_age_secs".to_string(),
                message: format!(
                    "must exceed classifier.timeout_secs ({}) when sweeping is enabled",
                    self.classifier.timeout_secs
                ),
            });
        }
        Ok(())
    }

    /// Get classifier timeout as Duration
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier.timeout_secs)
    }

    /// Get sweep interval as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.staging.sweep_interval_secs)
    }

    /// Get maximum staged artifact age as Duration
    pub fn max_artifact_age(&self) -> Duration {
        Duration::from_secs(self.staging.max_artifact_age_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_enabled: true,
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            body_limit_bytes: default_body_limit_bytes(),
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
            sweep_enabled: true,
            sweep_interval_secs: default_sweep_interval_secs(),
            max_artifact_age_secs: default_max_artifact_age_secs(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            program: default_classifier_program(),
            args: default_classifier_args(),
            timeout_secs: default_classifier_timeout_secs(),
            working_dir: None,
        }
    }
}
