//! In-memory collaborators for tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::action_log::{ActionEvent, ActionLogSource, LogReader};
use crate::engine::{DefenseEngine, DefenseSettings, EngineError, SettingUpdate};
use crate::inventory::{Certificate, Icon, InventoryError, PackageInfo, PackageInventory};
use crate::store::{GlobalSettings, StoreError, WhitelistStore};

/// A hand-rolled [`PackageInventory`] with configurable packages and icons.
///
/// Packages without a configured icon fail icon loads with
/// [`InventoryError::NotFound`]. Icon calls are counted per package.
#[derive(Default)]
pub struct MockInventory {
    packages: Vec<PackageInfo>,
    platform: Option<Certificate>,
    icons: HashMap<String, Icon>,
    icon_calls: Mutex<HashMap<String, usize>>,
}

impl MockInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, package: PackageInfo) -> Self {
        self.packages.push(package);
        self
    }

    /// Shorthand for an enabled, non-system, user-signed package.
    pub fn with_app(self, name: &str, title: &str, enabled: bool) -> Self {
        let uid = 10_000 + self.packages.len() as u32;
        self.with_package(PackageInfo {
            package_name: name.to_string(),
            title: title.to_string(),
            enabled,
            uid,
            is_system: false,
            signing_certificate: Some(Certificate::new(b"user".to_vec())),
        })
    }

    pub fn with_platform_certificate(mut self, cert: Certificate) -> Self {
        self.platform = Some(cert);
        self
    }

    pub fn with_icon(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.icons.insert(name.to_string(), Icon::from_bytes(bytes));
        self
    }

    /// How many times `icon()` has been called for `name`.
    pub fn icon_calls(&self, name: &str) -> usize {
        self.icon_calls
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl PackageInventory for MockInventory {
    fn list_installed_packages(&self) -> Result<Vec<PackageInfo>, InventoryError> {
        Ok(self.packages.clone())
    }

    fn platform_certificate(&self) -> Option<Certificate> {
        self.platform.clone()
    }

    fn icon(&self, package_name: &str) -> Result<Icon, InventoryError> {
        *self
            .icon_calls
            .lock()
            .unwrap()
            .entry(package_name.to_string())
            .or_insert(0) += 1;
        self.icons
            .get(package_name)
            .cloned()
            .ok_or_else(|| InventoryError::NotFound(package_name.to_string()))
    }

    fn label(&self, package_name: &str) -> Result<String, InventoryError> {
        self.packages
            .iter()
            .find(|p| p.package_name == package_name)
            .map(|p| p.title.clone())
            .ok_or_else(|| InventoryError::NotFound(package_name.to_string()))
    }
}

/// In-memory [`WhitelistStore`] + [`GlobalSettings`] that records every
/// whitelist write.
#[derive(Default)]
pub struct MemoryStore {
    whitelist: Mutex<BTreeSet<String>>,
    whitelist_writes: Mutex<Vec<BTreeSet<String>>>,
    globals: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_whitelist(packages: BTreeSet<String>) -> Self {
        Self {
            whitelist: Mutex::new(packages),
            ..Self::default()
        }
    }

    pub fn whitelist(&self) -> BTreeSet<String> {
        self.whitelist.lock().unwrap().clone()
    }

    /// Every set passed to `write_whitelist`, oldest first.
    pub fn whitelist_writes(&self) -> Vec<BTreeSet<String>> {
        self.whitelist_writes.lock().unwrap().clone()
    }
}

impl WhitelistStore for MemoryStore {
    fn read_whitelist(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.whitelist())
    }

    fn write_whitelist(&self, packages: &BTreeSet<String>) -> Result<(), StoreError> {
        *self.whitelist.lock().unwrap() = packages.clone();
        self.whitelist_writes.lock().unwrap().push(packages.clone());
        Ok(())
    }
}

impl GlobalSettings for MemoryStore {
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.globals.lock().unwrap().get(key).cloned())
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.globals
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// [`DefenseEngine`] that keeps a settings snapshot and a write log, and can
/// be told to reject writes.
#[derive(Default)]
pub struct MockEngine {
    settings: Mutex<DefenseSettings>,
    writes: Mutex<Vec<SettingUpdate>>,
    fail: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: DefenseSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            ..Self::default()
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every accepted write, oldest first.
    pub fn writes(&self) -> Vec<SettingUpdate> {
        self.writes.lock().unwrap().clone()
    }
}

impl DefenseEngine for MockEngine {
    fn read_settings(&self) -> Result<DefenseSettings, EngineError> {
        Ok(self.settings.lock().unwrap().clone())
    }

    fn write(&self, update: &SettingUpdate) -> Result<(), EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Rejected("mock engine offline".into()));
        }
        self.settings.lock().unwrap().apply(update);
        self.writes.lock().unwrap().push(update.clone());
        Ok(())
    }
}

/// [`ActionLogSource`] replaying a fixed list of events.
#[derive(Default)]
pub struct MockLogSource {
    events: Vec<ActionEvent>,
}

impl MockLogSource {
    pub fn new(events: Vec<ActionEvent>) -> Self {
        Self { events }
    }
}

impl ActionLogSource for MockLogSource {
    fn open_reader(&self) -> Option<Box<dyn LogReader>> {
        Some(Box::new(self.events.clone().into_iter()))
    }
}
