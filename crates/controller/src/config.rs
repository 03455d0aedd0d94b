//! Controller configuration file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_dispatch::DispatchConfig;
use strata_lock::LockDefaults;
use strata_primitives::ServiceName;
use strata_state::LivenessConfig;
use strata_version::{SupportRange, Version};

/// Allowed bounds of the per-attempt dispatch timeout.
pub const MIN_DISPATCH_TIMEOUT_SECS: u64 = 10;
pub const MAX_DISPATCH_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration of the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub liveness: LivenessSection,
    #[serde(default)]
    pub lock: LockSection,
    #[serde(default)]
    pub compatibility: CompatibilitySection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSection {
    /// Per-attempt timeout
    #[serde(default = "default_dispatch_timeout")]
    pub timeout_secs: u64,
    /// Total attempts of retryable commands
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Extra holding time of the node lock
    #[serde(default = "default_lock_grace")]
    pub lock_grace_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_dispatch_timeout(),
            attempts: default_attempts(),
            lock_grace_secs: default_lock_grace(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessSection {
    /// Silence after which an online node goes offline
    #[serde(default = "default_liveness_window")]
    pub window_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            window_secs: default_liveness_window(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSection {
    #[serde(default = "default_lock_waiting")]
    pub waiting_secs: u64,
    /// Unset: locks are held until released
    #[serde(default)]
    pub holding_secs: Option<u64>,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            waiting_secs: default_lock_waiting(),
            holding_secs: None,
        }
    }
}

/// Accepted service plugin versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilitySection {
    #[serde(default = "default_support_range")]
    pub default: SupportRange,
    /// Per-service ranges, overriding the default.
    #[serde(default)]
    pub services: BTreeMap<ServiceName, SupportRange>,
}

impl Default for CompatibilitySection {
    fn default() -> Self {
        Self {
            default: default_support_range(),
            services: BTreeMap::new(),
        }
    }
}

impl CompatibilitySection {
    pub fn range_for(&self, service: &str) -> SupportRange {
        self.services.get(service).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSection {
    /// Topology file. Unset: the topology lives in memory only.
    #[serde(default)]
    pub topology_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Base level when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Extra filter directives, comma separated
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub timestamps: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            filter: None,
            json: false,
            timestamps: false,
        }
    }
}

impl ControllerConfig {
    /// Load and validate the configuration at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration at `path`, or write the defaults there if it
    /// doesn't exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeout = self.dispatch.timeout_secs;
        if !(MIN_DISPATCH_TIMEOUT_SECS..=MAX_DISPATCH_TIMEOUT_SECS).contains(&timeout) {
            return Err(ConfigError::Invalid(format!(
                "dispatch.timeout_secs must be within {MIN_DISPATCH_TIMEOUT_SECS}..={MAX_DISPATCH_TIMEOUT_SECS}, got {timeout}"
            )));
        }
        if self.dispatch.attempts == 0 {
            return Err(ConfigError::Invalid("dispatch.attempts must be at least 1".into()));
        }
        if self.liveness.window_secs == 0 || self.liveness.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "liveness window and sweep interval must be positive".into(),
            ));
        }
        if !self.compatibility.default.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "compatibility.default: min above max in {}",
                self.compatibility.default
            )));
        }
        if let Some((service, range)) = self
            .compatibility
            .services
            .iter()
            .find(|(_, range)| !range.is_valid())
        {
            return Err(ConfigError::Invalid(format!(
                "compatibility.services.{service}: min above max in {range}"
            )));
        }
        Ok(())
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            timeout: Duration::from_secs(self.dispatch.timeout_secs),
            attempts: self.dispatch.attempts,
            lock_grace: Duration::from_secs(self.dispatch.lock_grace_secs),
        }
    }

    pub fn liveness_config(&self) -> LivenessConfig {
        LivenessConfig {
            window: Duration::from_secs(self.liveness.window_secs),
            sweep_interval: Duration::from_secs(self.liveness.sweep_interval_secs),
        }
    }

    pub fn lock_defaults(&self) -> LockDefaults {
        LockDefaults {
            waiting: Duration::from_secs(self.lock.waiting_secs),
            holding: self.lock.holding_secs.map(Duration::from_secs),
        }
    }
}

fn default_dispatch_timeout() -> u64 {
    20
}

fn default_attempts() -> u32 {
    3
}

fn default_lock_grace() -> u64 {
    5
}

fn default_liveness_window() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_lock_waiting() -> u64 {
    30
}

fn default_support_range() -> SupportRange {
    SupportRange::new(Version::new(1, 0), Version::new(25, 999))
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: ControllerConfig = toml::from_str(
            r#"
            [dispatch]
            timeout_secs = 15

            [compatibility.services.fw]
            min = "v2.0"
            max = "v2.5.1"
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.dispatch.timeout_secs, 15);
        assert_eq!(config.dispatch.attempts, 3);
        assert_eq!(config.liveness, LivenessSection::default());
        assert_eq!(
            config.compatibility.range_for("fw").max,
            Version::new(2, 5).with_build(1, None)
        );
        assert_eq!(config.compatibility.range_for("dns"), default_support_range());
        assert_eq!(config.dispatch_config().timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_validation() {
        let mut config = ControllerConfig::default();
        config.validate().unwrap();

        config.dispatch.timeout_secs = 25;
        assert_matches!(config.validate(), Err(ConfigError::Invalid(_)));
        config.dispatch.timeout_secs = 10;
        config.dispatch.attempts = 0;
        assert_matches!(config.validate(), Err(ConfigError::Invalid(_)));
        config.dispatch.attempts = 1;
        config.compatibility.services.insert(
            "fw".into(),
            SupportRange::new(Version::new(3, 0), Version::new(2, 0)),
        );
        assert_matches!(config.validate(), Err(ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_or_create_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("controller.toml");

        let created = ControllerConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(ControllerConfig::load(&path).unwrap(), created);

        std::fs::write(&path, "[dispatch]\ntimeout_secs = 5\n").unwrap();
        assert_matches!(ControllerConfig::load(&path), Err(ConfigError::Invalid(_)));
        std::fs::write(&path, "[dispatch\n").unwrap();
        assert_matches!(ControllerConfig::load(&path), Err(ConfigError::Parse(_)));
    }
}
