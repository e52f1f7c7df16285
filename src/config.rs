/// Configuration management for Veilgate
use crate::error::{VeilError, VeilResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub operator: OperatorConfig,
    pub publish: PublishConfig,
    pub audit: AuditConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

/// HTTP adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub account_db: PathBuf,
}

/// Operator settings, persisted once into the settings table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Public domain of the proxy host
    pub domain: String,
    /// Transport identity allowed to operate the bot
    pub admin_id: i64,
    #[serde(skip_serializing)]
    pub bot_token: String,
}

/// Config document locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub xray_config_path: PathBuf,
    pub hysteria_config_path: PathBuf,
}

/// Auth-failure audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub auth_log_path: PathBuf,
}

/// Background job timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub sweep_interval_secs: u64,
    /// Deadline for store and publish operations
    pub operation_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> VeilResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> VeilResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let hostname = var("VEILGATE_HOSTNAME", "127.0.0.1");
        let port = var("VEILGATE_PORT", "8087")
            .parse()
            .map_err(|_| VeilError::Config("Invalid port number".to_string()))?;
        let version = var("VEILGATE_VERSION", env!("CARGO_PKG_VERSION"));

        let data_directory: PathBuf = var("VEILGATE_DATA_DIRECTORY", "./data").into();
        let account_db = lookup("VEILGATE_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_directory.join("veilgate.sqlite"));

        let domain = lookup("VEILGATE_DOMAIN")
            .ok_or_else(|| VeilError::Config("VEILGATE_DOMAIN is required".to_string()))?;
        let admin_id = lookup("VEILGATE_ADMIN_ID")
            .ok_or_else(|| VeilError::Config("VEILGATE_ADMIN_ID is required".to_string()))?
            .trim()
            .parse()
            .map_err(|_| VeilError::Config("VEILGATE_ADMIN_ID must be an integer".to_string()))?;
        let bot_token = lookup("VEILGATE_BOT_TOKEN")
            .ok_or_else(|| VeilError::Config("VEILGATE_BOT_TOKEN is required".to_string()))?;

        let sweep_interval_secs = var("VEILGATE_SWEEP_INTERVAL_SECS", "60")
            .parse()
            .map_err(|_| VeilError::Config("Invalid sweep interval".to_string()))?;
        let operation_timeout_secs = var("VEILGATE_OPERATION_TIMEOUT_SECS", "10")
            .parse()
            .map_err(|_| VeilError::Config("Invalid operation timeout".to_string()))?;

        Ok(Self {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                account_db,
            },
            operator: OperatorConfig {
                domain: domain.trim().to_string(),
                admin_id,
                bot_token,
            },
            publish: PublishConfig {
                xray_config_path: var("VEILGATE_XRAY_CONFIG_PATH", "/etc/xray/config.json").into(),
                hysteria_config_path: var(
                    "VEILGATE_HYSTERIA_CONFIG_PATH",
                    "/etc/hysteria/config.yaml",
                )
                .into(),
            },
            audit: AuditConfig {
                auth_log_path: var("VEILGATE_AUTH_LOG_PATH", "/var/log/veilgate-auth.log").into(),
            },
            jobs: JobsConfig {
                sweep_interval_secs,
                operation_timeout_secs,
            },
            logging: LoggingConfig {
                level: var("VEILGATE_LOG_LEVEL", "info"),
                format: var("VEILGATE_LOG_FORMAT", "text").to_lowercase(),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> VeilResult<()> {
        if self.service.hostname.is_empty() {
            return Err(VeilError::Config("Hostname cannot be empty".to_string()));
        }

        if self.operator.domain.is_empty() {
            return Err(VeilError::Config("Domain cannot be empty".to_string()));
        }

        if self.operator.admin_id == 0 {
            return Err(VeilError::Config("Admin id cannot be zero".to_string()));
        }

        if self.operator.bot_token.trim().is_empty() {
            return Err(VeilError::Config("Bot token cannot be empty".to_string()));
        }

        if self.jobs.sweep_interval_secs == 0 {
            return Err(VeilError::Config(
                "Sweep interval must be at least one second".to_string(),
            ));
        }

        if self.jobs.operation_timeout_secs == 0 {
            return Err(VeilError::Config(
                "Operation timeout must be at least one second".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(VeilError::Config(format!(
                "Unknown log format: {}",
                self.logging.format
            )));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service.hostname, self.service.port)
    }
}
