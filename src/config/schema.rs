use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Lifetime of a read-cache entry.
    pub cache_ttl_ms: u64,
    /// Age after which an unconfirmed optimistic update is dropped.
    pub pending_max_age_ms: u64,
    pub housekeeping_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 300_000,
            pending_max_age_ms: 30_000,
            housekeeping_interval_ms: 10_000,
        }
    }
}

impl SyncConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn pending_max_age(&self) -> Duration {
        Duration::from_millis(self.pending_max_age_ms)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        // A zero tick interval would spin the worker.
        Duration::from_millis(self.housekeeping_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Tree,
    Pretty,
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tree" => Ok(LogFormat::Tree),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Compact,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfigOverride {
    pub cache_ttl_ms: Option<u64>,
    pub pending_max_age_ms: Option<u64>,
    pub housekeeping_interval_ms: Option<u64>,
}

impl SyncConfigOverride {
    pub fn apply_to(&self, target: &mut SyncConfig) {
        if let Some(ttl) = self.cache_ttl_ms {
            target.cache_ttl_ms = ttl;
        }
        if let Some(age) = self.pending_max_age_ms {
            target.pending_max_age_ms = age;
        }
        if let Some(interval) = self.housekeeping_interval_ms {
            target.housekeeping_interval_ms = interval;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfigOverride {
    pub stdout: Option<bool>,
    pub stdout_format: Option<LogFormat>,
    pub filter: Option<String>,
}

impl LoggingConfigOverride {
    pub fn apply_to(&self, target: &mut LoggingConfig) {
        if let Some(stdout) = self.stdout {
            target.stdout = stdout;
        }
        if let Some(format) = self.stdout_format {
            target.stdout_format = format;
        }
        if let Some(filter) = self.filter.as_ref() {
            target.filter = Some(filter.clone());
        }
    }
}

/// One config file's worth of overrides; absent fields leave lower layers
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    pub sync: SyncConfigOverride,
    pub logging: LoggingConfigOverride,
}

impl ConfigLayer {
    pub fn apply_to(&self, target: &mut Config) {
        self.sync.apply_to(&mut target.sync);
        self.logging.apply_to(&mut target.logging);
    }
}
