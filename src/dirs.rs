//! Centralized filesystem paths for the orchestration core.
//!
//! # Environment overrides
//!
//! - `BLACKBOX_DATA_DIR` — overrides [`data_dir`]
//! - `BLACKBOX_CONFIG_DIR` — overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root: the embedded database and logs live under here.
///
/// Resolves to `dirs::data_dir()/blackbox/` by default.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("BLACKBOX_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("blackbox"))
        .unwrap_or_else(|| PathBuf::from("/tmp/blackbox-data"))
}

/// Application config directory: `config.toml` lives here.
///
/// Resolves to `dirs::config_dir()/blackbox/` by default.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("BLACKBOX_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("blackbox"))
        .unwrap_or_else(|| PathBuf::from("/tmp/blackbox-config"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Default embedded-database path (`data_dir()/blackbox.db`).
#[must_use]
pub fn default_db_path() -> PathBuf {
    data_dir().join("blackbox.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_ends_with_config_toml() {
        assert!(config_file().to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn logs_dir_is_subpath_of_data_dir() {
        assert!(logs_dir().starts_with(data_dir()));
    }

    #[test]
    fn data_dir_override_via_env() {
        let key = "BLACKBOX_DATA_DIR";
        let original = std::env::var_os(key);
        // SAFETY: tests run single-threaded per module.
        unsafe { std::env::set_var(key, "/custom/data") };
        assert_eq!(data_dir(), PathBuf::from("/custom/data"));
        match original {
            Some(v) => unsafe { std::env::set_var(key, v) },
            None => unsafe { std::env::remove_var(key) },
        }
    }
}
