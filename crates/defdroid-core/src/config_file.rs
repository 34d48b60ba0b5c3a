use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Config;

/// `.defdroid.toml` as written by the user. Every section and key may be
/// left out; missing values fall back to [`Config::default`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub whitelist: Option<WhitelistConfig>,
    pub storage: Option<StorageConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhitelistConfig {
    pub show_system_apps: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: Option<String>,
}

/// `<config_dir>/defdroid/config.toml`, if the platform has a config dir.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("defdroid").join("config.toml"))
}

/// Default settings database: `<data_dir>/defdroid/settings.db`.
pub fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("defdroid").join("settings.db"))
}

/// Read the per-user file and `./.defdroid.toml`; keys set in the working
/// directory's file win.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".defdroid.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// `None` when `path` is missing or is not valid TOML for [`ConfigFile`].
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
            None
        }
    }
}

/// Key-by-key union of two files, preferring `overlay`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        whitelist: Some(WhitelistConfig {
            show_system_apps: overlay
                .whitelist
                .as_ref()
                .and_then(|w| w.show_system_apps)
                .or_else(|| base.whitelist.as_ref().and_then(|w| w.show_system_apps)),
        }),
        storage: Some(StorageConfig {
            db_path: overlay
                .storage
                .as_ref()
                .and_then(|s| s.db_path.clone())
                .or_else(|| base.storage.as_ref().and_then(|s| s.db_path.clone())),
        }),
        logging: Some(LoggingConfig {
            filter: overlay
                .logging
                .as_ref()
                .and_then(|l| l.filter.clone())
                .or_else(|| base.logging.as_ref().and_then(|l| l.filter.clone())),
        }),
    }
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        let defaults = Config::default();
        Config {
            show_system_apps: file
                .whitelist
                .and_then(|w| w.show_system_apps)
                .unwrap_or(defaults.show_system_apps),
            db_path: file
                .storage
                .and_then(|s| s.db_path)
                .map(PathBuf::from)
                .or(defaults.db_path),
            log_filter: file.logging.and_then(|l| l.filter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let parsed: ConfigFile = toml::from_str("[whitelist]\nshow_system_apps = true\n").unwrap();
        assert_eq!(parsed.whitelist.unwrap().show_system_apps, Some(true));
        assert!(parsed.storage.is_none());
    }

    #[test]
    fn merge_overlay_wins() {
        let base = ConfigFile {
            storage: Some(StorageConfig {
                db_path: Some("/base/settings.db".to_string()),
            }),
            logging: Some(LoggingConfig {
                filter: Some("info".to_string()),
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            storage: Some(StorageConfig {
                db_path: Some("/overlay/settings.db".to_string()),
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        assert_eq!(
            merged.storage.unwrap().db_path.unwrap(),
            "/overlay/settings.db"
        );
        assert_eq!(merged.logging.unwrap().filter.unwrap(), "info");
    }

    #[test]
    fn resolves_into_config() {
        let file = ConfigFile {
            whitelist: Some(WhitelistConfig {
                show_system_apps: Some(true),
            }),
            storage: Some(StorageConfig {
                db_path: Some("/tmp/defdroid.db".to_string()),
            }),
            ..Default::default()
        };
        let config = Config::from(file);
        assert!(config.show_system_apps);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/defdroid.db")));
        assert_eq!(config.log_filter, None);
    }

    #[test]
    fn empty_file_keeps_defaults() {
        let config = Config::from(ConfigFile::default());
        assert!(!config.show_system_apps);
        assert_eq!(config.db_path, default_db_path());
    }

    #[test]
    fn unparsable_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "whitelist = [[[").unwrap();
        assert!(load_from_path(&path).is_none());
        assert!(load_from_path(&dir.path().join("missing.toml")).is_none());
    }
}
