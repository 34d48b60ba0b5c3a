use std::path::PathBuf;

use thiserror::Error;

pub mod action_log;
pub mod apps;
pub mod config_file;
pub mod engine;
pub mod icons;
pub mod inventory;
pub mod mock;
pub mod sections;
pub mod settings;
pub mod store;
pub mod survey;
pub mod whitelist;
pub mod whitelist_screen;

pub use apps::{AppListOptions, AppRecord, build_app_list};
pub use engine::{DefenseEngine, DefenseSettings, EngineError, GlobalSettingsEngine, Guardian};
pub use icons::{IconCache, RedrawSignal};
pub use inventory::{InventoryError, PackageInfo, PackageInventory};
pub use sections::SectionIndex;
pub use settings::{SettingsError, SettingsScreen};
pub use store::{GlobalSettings, SqliteStore, StoreError, WhitelistStore};
pub use survey::SurveyScreen;
pub use whitelist::{WhitelistMutator, decode_whitelist, encode_whitelist};
pub use whitelist_screen::{ListState, WhitelistScreen};

/// Errors from DefDroid operations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("no row at position {0}")]
    NoSuchRow(usize),
    /// The whitelist was updated in memory and in the local store, but the
    /// engine did not accept it.
    #[error("whitelist change for {package} not applied by engine: {source}")]
    InconsistentWrite {
        package: String,
        #[source]
        source: EngineError,
    },
}

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// List system packages on the whitelist screen.
    pub show_system_apps: bool,
    /// Settings database; `None` if no data directory could be determined.
    pub db_path: Option<PathBuf>,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            show_system_apps: false,
            db_path: config_file::default_db_path(),
            log_filter: None,
        }
    }
}

impl Config {
    /// Configuration from the cascaded config files.
    pub fn load() -> Self {
        config_file::load_config().into()
    }

    /// Configuration from one file, falling back to defaults if it is
    /// missing or unparsable.
    pub fn from_file(path: &std::path::Path) -> Self {
        config_file::load_from_path(path)
            .unwrap_or_default()
            .into()
    }

    pub fn app_list_options(&self) -> AppListOptions {
        AppListOptions {
            show_system_apps: self.show_system_apps,
        }
    }
}
