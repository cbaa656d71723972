//! Config loading and persistence.

mod load;
mod merge;
mod schema;

pub use load::{
    ConfigError, config_path, load, load_for_project, load_or_default, load_project_config,
    load_user_config, project_config_path, write_config,
};
pub use merge::{
    ENV_CACHE_TTL_MS, ENV_HOUSEKEEPING_INTERVAL_MS, ENV_LOG_FORMAT, ENV_PENDING_MAX_AGE_MS,
    apply_env_overrides, apply_overrides_from, merge_layers,
};
pub use schema::{
    Config, ConfigLayer, LogFormat, LoggingConfig, LoggingConfigOverride, SyncConfig,
    SyncConfigOverride,
};
