//! ---
//! sim_section: "01-core-functionality"
//! sim_subsection: "module"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Shared primitives and utilities for the simulation runtime."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_app_name() -> String {
    "plc-sim".to_owned()
}

fn default_simulation_id() -> String {
    "sim-000".to_owned()
}

fn default_cluster() -> String {
    "standalone".to_owned()
}

fn default_max_sessions() -> usize {
    100
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_shutdown_reason() -> String {
    "shutdown requested".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9898"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object for the PLC-SIM runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_simulation_id")]
    pub simulation_id: String,
    #[serde(default = "default_cluster")]
    pub cluster: String,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub node_set: NodeSetConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "PLCSIM_CONFIG";

    /// Load configuration from disk, respecting the `PLCSIM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(anyhow!("app_name must not be empty"));
        }
        if self.max_sessions == 0 {
            return Err(anyhow!("max_sessions must be at least 1"));
        }
        self.shutdown.validate()?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            simulation_id: default_simulation_id(),
            cluster: default_cluster(),
            max_sessions: default_max_sessions(),
            features: FeatureFlags::default(),
            node_set: NodeSetConfig::default(),
            shutdown: ShutdownConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Optional address-space features toggled at startup.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureFlags {
    #[serde(default)]
    pub simple_events: bool,
    #[serde(default)]
    pub alarms: bool,
    #[serde(default)]
    pub reference_test: bool,
    #[serde(default)]
    pub deterministic_alarms: bool,
}

/// Resources consumed by address-space providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSetConfig {
    /// Script driving the deterministic-alarms provider. Required, and must
    /// exist on disk, whenever `features.deterministic_alarms` is set.
    #[serde(default)]
    pub deterministic_alarms_script: Option<PathBuf>,
}

/// Graceful-drain parameters applied when the daemon is asked to stop.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_shutdown_grace")]
    pub grace: Duration,
    #[serde(default = "default_shutdown_reason")]
    pub reason: String,
}

impl ShutdownConfig {
    fn validate(&self) -> Result<()> {
        if self.grace.as_secs() == 0 {
            return Err(anyhow!("shutdown.grace must be at least one second"));
        }
        Ok(())
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace: default_shutdown_grace(),
            reason: default_shutdown_reason(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().expect("default config validates");
        assert_eq!(config.shutdown.grace, Duration::from_secs(10));
        assert!(!config.features.deterministic_alarms);
    }

    #[test]
    fn parses_minimal_toml() {
        let config: AppConfig = r#"
            app_name = "bench-plc"
            simulation_id = "sim-042"

            [features]
            alarms = true

            [shutdown]
            grace = 3
        "#
        .parse()
        .expect("minimal config parses");
        assert_eq!(config.app_name, "bench-plc");
        assert!(config.features.alarms);
        assert!(!config.features.simple_events);
        assert_eq!(config.shutdown.grace, Duration::from_secs(3));
    }

    #[test]
    fn rejects_zero_grace() {
        let parsed = "[shutdown]\ngrace = 0\n".parse::<AppConfig>();
        assert!(parsed.is_err());
    }

    #[test]
    fn load_prefers_first_existing_candidate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plcsim.toml");
        let mut file = fs::File::create(&path).expect("create config");
        writeln!(file, "app_name = \"from-disk\"").expect("write config");

        let missing = dir.path().join("missing.toml");
        let loaded =
            AppConfig::load_with_source(&[missing, path.clone()]).expect("candidate load");
        assert_eq!(loaded.config.app_name, "from-disk");
        assert_eq!(loaded.source, path);
    }
}
