//! Integration tests for the [`WhitelistScreen`].
//!
//! All collaborators are the in-memory mocks, so nothing touches disk except
//! the SQLite-backed round trip at the end.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, mpsc};

use defdroid_core::engine::SettingUpdate;
use defdroid_core::inventory::{Certificate, Icon, InventoryError, PackageInfo};
use defdroid_core::mock::{MemoryStore, MockEngine, MockInventory};
use defdroid_core::whitelist_screen::RowIcon;
use defdroid_core::{
    AppListOptions, DefenseEngine, GlobalSettingsEngine, ListState, PackageInventory, SqliteStore,
    WhitelistScreen, WhitelistStore,
};

/// Three apps: two enabled with mixed-case titles, one disabled.
fn fruit_inventory() -> MockInventory {
    MockInventory::new()
        .with_app("A", "Banana", true)
        .with_app("B", "apple", true)
        .with_app("C", "Cherry", false)
        .with_icon("A", vec![0xA])
        .with_icon("C", vec![0xC])
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn snapshot_is_sorted_and_sectioned() {
    let mut screen = WhitelistScreen::new(
        Arc::new(fruit_inventory()),
        MemoryStore::new(),
        MockEngine::new(),
        AppListOptions::default(),
    );
    assert_eq!(screen.load().unwrap(), ListState::Populated);

    let titles: Vec<_> = screen.apps().iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["apple", "Banana", "Cherry"]);
    assert_eq!(screen.sections().sections(), &["A", "B", "--"]);
    assert_eq!(screen.sections().positions(), &[0, 1, 2]);
    assert_eq!(screen.section_for_position(2), Some(2));
    assert_eq!(screen.position_for_section(1), Some(1));
}

#[tokio::test]
async fn failed_icon_keeps_default_and_is_not_retried() {
    let inventory = Arc::new(fruit_inventory());
    let mut screen = WhitelistScreen::new(
        Arc::clone(&inventory),
        MemoryStore::new(),
        MockEngine::new(),
        AppListOptions::default(),
    );
    let mut redraw = screen.redraw_receiver();
    screen.load().unwrap();
    let stats = screen.wait_for_icons().await.unwrap();
    assert_eq!(stats.loaded, 2);
    assert_eq!(stats.missing, 1);
    assert!(!stats.cancelled);
    assert!(redraw.has_changed().unwrap());
    assert_eq!(*redraw.borrow_and_update(), 2);

    // "apple" (B) has no icon
    assert_eq!(screen.bind(0).unwrap().icon, RowIcon::Default);
    assert_eq!(
        screen.bind(1).unwrap().icon,
        RowIcon::Loaded(Icon::from_bytes(vec![0xA]))
    );
    for _ in 0..3 {
        assert_eq!(screen.bind(0).unwrap().icon, RowIcon::Default);
    }
    assert_eq!(inventory.icon_calls("B"), 1);
}

/// Inventory whose icon load for one package blocks until released.
struct GatedInventory {
    inner: MockInventory,
    gated: String,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl PackageInventory for GatedInventory {
    fn list_installed_packages(&self) -> Result<Vec<PackageInfo>, InventoryError> {
        self.inner.list_installed_packages()
    }

    fn platform_certificate(&self) -> Option<Certificate> {
        self.inner.platform_certificate()
    }

    fn icon(&self, package_name: &str) -> Result<Icon, InventoryError> {
        if package_name == self.gated {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        self.inner.icon(package_name)
    }

    fn label(&self, package_name: &str) -> Result<String, InventoryError> {
        self.inner.label(package_name)
    }
}

#[tokio::test]
async fn teardown_during_icon_load_suppresses_redraw() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let inventory = Arc::new(GatedInventory {
        inner: MockInventory::new()
            .with_app("A", "Alpha", true)
            .with_app("B", "Bravo", true)
            .with_icon("A", vec![0xA])
            .with_icon("B", vec![0xB]),
        gated: "A".to_string(),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let mut screen = WhitelistScreen::new(
        Arc::clone(&inventory),
        MemoryStore::new(),
        MockEngine::new(),
        AppListOptions::default(),
    );
    let redraw = screen.redraw_receiver();
    screen.load().unwrap();

    // Loader is now blocked inside the icon load for "Alpha"
    tokio::task::spawn_blocking(move || entered_rx.recv())
        .await
        .unwrap()
        .unwrap();
    screen.teardown();
    release_tx.send(()).unwrap();

    let stats = screen.wait_for_icons().await.unwrap();
    assert!(stats.cancelled);
    assert_eq!(stats.loaded, 1);
    assert_eq!(*redraw.borrow(), 0);
    assert!(!redraw.has_changed().unwrap());
    assert_eq!(inventory.inner.icon_calls("B"), 0);

    // A torn-down screen starts no new loader
    assert!(screen.is_torn_down());
    screen.load().unwrap();
    assert!(screen.wait_for_icons().await.is_none());
}

#[tokio::test]
async fn double_toggle_restores_initial_set() {
    let store = MemoryStore::with_whitelist(set(&["com.keep"]));
    let mut screen = WhitelistScreen::new(
        Arc::new(fruit_inventory()),
        store,
        MockEngine::new(),
        AppListOptions::default(),
    );
    screen.load().unwrap();
    // Banana (A) is at position 1
    screen.set_whitelisted(1, true).unwrap();
    assert!(screen.bind(1).unwrap().whitelisted);
    screen.set_whitelisted(1, false).unwrap();
    assert!(!screen.bind(1).unwrap().whitelisted);

    let mutator = screen.mutator();
    assert_eq!(mutator.store().whitelist(), set(&["com.keep"]));
    assert_eq!(
        mutator.store().whitelist_writes(),
        vec![set(&["A", "com.keep"]), set(&["com.keep"])]
    );
    assert_eq!(
        mutator.engine().writes(),
        vec![
            SettingUpdate::WhiteList("A,com.keep".into()),
            SettingUpdate::WhiteList("com.keep".into()),
        ]
    );
}

#[tokio::test]
async fn platform_signed_and_system_apps_hidden() {
    let platform = Certificate::new(b"platform".to_vec());
    let inventory = fruit_inventory()
        .with_platform_certificate(platform.clone())
        .with_package(PackageInfo {
            package_name: "android.settings".into(),
            title: "Settings".into(),
            enabled: true,
            uid: 1000,
            is_system: false,
            signing_certificate: Some(platform),
        })
        .with_package(PackageInfo {
            package_name: "com.vendor.sys".into(),
            title: "Vendor".into(),
            enabled: true,
            uid: 1001,
            is_system: true,
            signing_certificate: None,
        });

    let inventory = Arc::new(inventory);
    let mut screen = WhitelistScreen::new(
        Arc::clone(&inventory),
        MemoryStore::new(),
        MockEngine::new(),
        AppListOptions::default(),
    );
    screen.load().unwrap();
    assert_eq!(screen.len(), 3);

    let mut with_system = WhitelistScreen::new(
        inventory,
        MemoryStore::new(),
        MockEngine::new(),
        AppListOptions {
            show_system_apps: true,
        },
    );
    with_system.load().unwrap();
    assert_eq!(with_system.len(), 4);
    assert!(with_system.apps().iter().all(|a| a.package_name != "android.settings"));
}

#[tokio::test]
async fn whitelist_persists_through_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.db");

    {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let engine = GlobalSettingsEngine::new(Arc::clone(&store));
        let mut screen = WhitelistScreen::new(
            Arc::new(fruit_inventory()),
            Arc::clone(&store),
            engine,
            AppListOptions::default(),
        );
        screen.load().unwrap();
        screen.set_whitelisted(2, true).unwrap();
    }

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    assert_eq!(store.read_whitelist().unwrap(), set(&["C"]));
    let engine = GlobalSettingsEngine::new(Arc::clone(&store));
    assert_eq!(engine.read_settings().unwrap().white_list, "C");

    let mut screen = WhitelistScreen::new(
        Arc::new(fruit_inventory()),
        store,
        engine,
        AppListOptions::default(),
    );
    screen.load().unwrap();
    assert!(screen.bind(2).unwrap().whitelisted);
}
