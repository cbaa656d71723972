//! XDG directory helpers for config locations.

use std::path::PathBuf;

/// Base directory for configuration files.
///
/// Uses `HABIT_SYNC_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/habit-sync`
/// or `~/.config/habit-sync`.
pub(crate) fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HABIT_SYNC_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("habit-sync")
}
