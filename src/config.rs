//! Configuration loaded from YAML.
//!
//! Search order:
//! 1. Explicit path if provided
//! 2. .runctl.yml in current directory
//! 3. ~/.config/runctl/runctl.yml
//! 4. Defaults

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RunctlError;
use crate::exec::EngineConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub execution: ExecutionConfig,
    pub scripts: ScriptsConfig,
    pub git: GitConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the run store
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("runctl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub default_timeout_ms: u64,
    pub grace_period_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 600000,
            grace_period_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Shell command run by `verify`
    pub verify: Option<String>,
    /// Shell command run first during `teardown`
    pub teardown: Option<String>,
    /// Extra environment for both scripts, layered over the process environment
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub base_branch: String,
    pub branch_prefix: String,
    pub binary: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            branch_prefix: "run/".to_string(),
            binary: "git".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub binary: String,
    pub prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            binary: "tmux".to_string(),
            prefix: "run-".to_string(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // Explicit path takes precedence
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try project config
        let project_config = PathBuf::from(format!(".{}.yml", project_name));
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load {}: {}", project_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject values that would make every operation fail later.
    pub fn validate(&self) -> std::result::Result<(), RunctlError> {
        let invalid = |msg: &str| Err(RunctlError::Config(msg.to_string()));
        if self.execution.default_timeout_ms == 0 {
            return invalid("execution.default_timeout_ms must be greater than zero");
        }
        if self.execution.grace_period_ms == 0 {
            return invalid("execution.grace_period_ms must be greater than zero");
        }
        if self.git.binary.trim().is_empty() {
            return invalid("git.binary must not be empty");
        }
        if self.git.base_branch.trim().is_empty() {
            return invalid("git.base_branch must not be empty");
        }
        if self.session.binary.trim().is_empty() {
            return invalid("session.binary must not be empty");
        }
        if self.session.prefix.trim().is_empty() {
            return invalid("session.prefix must not be empty");
        }
        if self.storage.root.as_os_str().is_empty() {
            return invalid("storage.root must not be empty");
        }
        Ok(())
    }

    /// Timing values for the script engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_default_timeout(Duration::from_millis(self.execution.default_timeout_ms))
            .with_grace_period(Duration::from_millis(self.execution.grace_period_ms))
    }
}
