//! Desktop stand-ins for the platform collaborators, read from dump files.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use defdroid_core::action_log::{ActionEvent, ActionLogSource, LogReader};
use defdroid_core::inventory::{Certificate, Icon, InventoryError, PackageInfo, PackageInventory};

/// Package-manager dump:
///
/// ```json
/// {
///   "platform_certificate": [1, 2, 3],
///   "packages": [{ "package_name": "org.example", "title": "Example", "uid": 10061 }],
///   "icons": { "org.example": "icons/org.example.png" }
/// }
/// ```
///
/// Icon paths are relative to the dump file.
#[derive(Debug, Default, Deserialize)]
struct InventoryDump {
    #[serde(default)]
    platform_certificate: Option<Certificate>,
    #[serde(default)]
    packages: Vec<PackageInfo>,
    #[serde(default)]
    icons: HashMap<String, PathBuf>,
}

#[derive(Debug, Default)]
pub struct JsonInventory {
    dump: InventoryDump,
    base_dir: PathBuf,
}

impl JsonInventory {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read inventory {}", path.display()))?;
        let dump: InventoryDump = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse inventory {}", path.display()))?;
        tracing::debug!(packages = dump.packages.len(), "inventory loaded");
        Ok(Self {
            dump,
            base_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        })
    }
}

impl PackageInventory for JsonInventory {
    fn list_installed_packages(&self) -> Result<Vec<PackageInfo>, InventoryError> {
        Ok(self.dump.packages.clone())
    }

    fn platform_certificate(&self) -> Option<Certificate> {
        self.dump.platform_certificate.clone()
    }

    fn icon(&self, package_name: &str) -> Result<Icon, InventoryError> {
        let path = self
            .dump
            .icons
            .get(package_name)
            .ok_or_else(|| InventoryError::NotFound(package_name.to_string()))?;
        std::fs::read(self.base_dir.join(path))
            .map(Icon::from_bytes)
            .map_err(|e| InventoryError::NotFound(format!("{package_name}: {e}")))
    }

    fn label(&self, package_name: &str) -> Result<String, InventoryError> {
        self.dump
            .packages
            .iter()
            .find(|p| p.package_name == package_name && !p.title.is_empty())
            .map(|p| p.title.clone())
            .ok_or_else(|| InventoryError::NotFound(package_name.to_string()))
    }
}

/// Action log stored as one JSON [`ActionEvent`] per line.
pub struct JsonlLogSource {
    path: PathBuf,
}

impl JsonlLogSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ActionLogSource for JsonlLogSource {
    fn open_reader(&self) -> Option<Box<dyn LogReader>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "cannot open action log");
                return None;
            }
        };
        let events = BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<ActionEvent>(&line) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed action log line");
                    None
                }
            });
        Some(Box::new(events))
    }
}
