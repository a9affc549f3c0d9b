use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::workflow::DEFAULT_FALLBACK_STATUS;

/// Main configuration structure for the workflow admin tool
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CorePmConfig {
    /// Database settings
    pub database: DatabaseConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Workflow engine settings
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level, or any `EnvFilter` directive
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkflowConfig {
    /// Status given to entities landing in a type whose workflow is empty
    pub fallback_status: String,
}

impl Default for CorePmConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:corepm.db".to_string(),
                max_connections: 5,
                auto_migrate: true,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
            },
            workflow: WorkflowConfig {
                fallback_status: DEFAULT_FALLBACK_STATUS.to_string(),
            },
        }
    }
}

impl CorePmConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (corepm.toml, .corepm-rc)
    /// 3. Environment variables (COREPM_DATABASE__URL and so on)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`CorePmConfig::load`] with configuration files looked up in `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&CorePmConfig::default())?);

        let toml_file = dir.join("corepm.toml");
        if toml_file.exists() {
            builder = builder.add_source(File::from(toml_file));
        }

        let rc_file = dir.join(".corepm-rc");
        if rc_file.exists() {
            builder = builder.add_source(File::from(rc_file).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("COREPM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut corepm_config: CorePmConfig = builder.build()?.try_deserialize()?;

        // sqlx tooling convention, only when nothing more specific was given
        if std::env::var("COREPM_DATABASE__URL").is_err() {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                corepm_config.database.url = url;
            }
        }

        Ok(corepm_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists. Returns whether one was found.
    ///
    /// Runs before logging is set up, so reporting is left to the caller.
    pub fn load_env_file() -> Result<bool> {
        Self::load_env_file_from(Path::new("."))
    }

    pub fn load_env_file_from(dir: &Path) -> Result<bool> {
        let env_file = dir.join(".env");
        if !env_file.exists() {
            return Ok(false);
        }
        dotenvy::from_path(&env_file)?;
        Ok(true)
    }
}

/// Global configuration instance. Call [`CorePmConfig::load_env_file`]
/// before first use so `.env` values take part.
static CONFIG: std::sync::LazyLock<Result<CorePmConfig, anyhow::Error>> =
    std::sync::LazyLock::new(CorePmConfig::load);

/// Get the global configuration
pub fn config() -> Result<&'static CorePmConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}
