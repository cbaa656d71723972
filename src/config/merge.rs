use super::{Config, ConfigLayer, LogFormat};

pub const ENV_CACHE_TTL_MS: &str = "HABIT_SYNC_CACHE_TTL_MS";
pub const ENV_PENDING_MAX_AGE_MS: &str = "HABIT_SYNC_PENDING_MAX_AGE_MS";
pub const ENV_HOUSEKEEPING_INTERVAL_MS: &str = "HABIT_SYNC_HOUSEKEEPING_INTERVAL_MS";
pub const ENV_LOG_FORMAT: &str = "HABIT_SYNC_LOG_FORMAT";

/// Defaults, then the user layer, then the project layer.
pub fn merge_layers(user: Option<ConfigLayer>, project: Option<ConfigLayer>) -> Config {
    let mut config = Config::default();
    if let Some(layer) = user {
        layer.apply_to(&mut config);
    }
    if let Some(layer) = project {
        layer.apply_to(&mut config);
    }
    config
}

pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides_from(config, |var| std::env::var(var).ok());
}

/// Applies overrides read through `lookup`, keyed by the `ENV_*` names.
pub fn apply_overrides_from<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = millis(&lookup, ENV_CACHE_TTL_MS) {
        config.sync.cache_ttl_ms = value;
    }
    if let Some(value) = millis(&lookup, ENV_PENDING_MAX_AGE_MS) {
        config.sync.pending_max_age_ms = value;
    }
    if let Some(value) = millis(&lookup, ENV_HOUSEKEEPING_INTERVAL_MS) {
        config.sync.housekeeping_interval_ms = value;
    }

    if let Some(raw) = lookup(ENV_LOG_FORMAT) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            match trimmed.parse::<LogFormat>() {
                Ok(format) => config.logging.stdout_format = format,
                Err(err) => tracing::warn!("invalid {ENV_LOG_FORMAT}, ignoring: {err}"),
            }
        }
    }
}

fn millis<F>(lookup: &F, var: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(var)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<u64>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!("invalid {var}, ignoring: {err}");
            None
        }
    }
}
