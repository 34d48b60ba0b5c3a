//! Per-package icon cache with background population.
//!
//! [`IconCache`] is a [`DashMap`] keyed by package name: lookups never block
//! and concurrent inserts for different keys are safe. Entries are never
//! evicted; a package uninstalled after caching keeps a stale entry that is
//! simply never looked up again.
//!
//! [`spawn_icon_loader`] walks one snapshot's records exactly once on a
//! blocking worker, inserts every icon it can load, and bumps a
//! [`RedrawSignal`] generation. The signal is a `watch` channel, so a burst
//! of inserts coalesces into whatever generation the renderer observes next.
//! Once the list's [`CancellationToken`] fires the loader stops and never
//! signals again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::apps::AppRecord;
use crate::inventory::{Icon, PackageInventory};

/// Thread-safe, append-only icon cache.
#[derive(Default)]
pub struct IconCache {
    icons: DashMap<String, Icon>,
    misses: AtomicU64,
}

impl IconCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking lookup. `None` means "not yet available": render the
    /// default image.
    pub fn resolve(&self, package_name: &str) -> Option<Icon> {
        self.icons.get(package_name).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, package_name: &str, icon: Icon) {
        self.icons.insert(package_name.to_string(), icon);
    }

    pub fn len(&self) -> usize {
        self.icons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.icons.is_empty()
    }

    /// Number of icon loads that failed since the cache was created.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Coalescing "list should re-render" notification.
///
/// Each notify bumps a generation counter; receivers only ever see the
/// latest value, however many bumps happened in between. Once closed, the
/// generation never moves again.
#[derive(Debug)]
pub struct RedrawSignal {
    tx: watch::Sender<u64>,
    closed: AtomicBool,
}

impl Default for RedrawSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl RedrawSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Bump the generation. No-op after [`RedrawSignal::close`].
    pub fn notify(&self) {
        // Checked under the channel's write lock, which `close` also takes
        self.tx.send_if_modified(|generation| {
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            *generation += 1;
            true
        });
    }

    /// Suppress every later notify. When this returns, no notify is in
    /// flight.
    pub fn close(&self) {
        self.tx.send_if_modified(|_| {
            self.closed.store(true, Ordering::SeqCst);
            false
        });
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

/// Outcome of one loader run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IconLoadStats {
    pub loaded: usize,
    pub missing: usize,
    /// True if the list was torn down before every record was visited.
    pub cancelled: bool,
}

/// Load icons for `apps` in the background.
///
/// Failed loads are skipped silently (the row keeps the default image) and
/// never retried. Must be called from within a Tokio runtime.
pub fn spawn_icon_loader<I>(
    inventory: Arc<I>,
    cache: Arc<IconCache>,
    apps: Vec<AppRecord>,
    redraw: Arc<RedrawSignal>,
    cancel: CancellationToken,
) -> JoinHandle<IconLoadStats>
where
    I: PackageInventory + ?Sized + 'static,
{
    tokio::task::spawn_blocking(move || {
        load_icons(inventory.as_ref(), &cache, &apps, &redraw, &cancel)
    })
}

fn load_icons<I>(
    inventory: &I,
    cache: &IconCache,
    apps: &[AppRecord],
    redraw: &RedrawSignal,
    cancel: &CancellationToken,
) -> IconLoadStats
where
    I: PackageInventory + ?Sized,
{
    let mut stats = IconLoadStats::default();

    for app in apps {
        if cancel.is_cancelled() {
            tracing::debug!(loaded = stats.loaded, "icon loader stopped: list torn down");
            stats.cancelled = true;
            return stats;
        }
        match inventory.icon(&app.package_name) {
            Ok(icon) => {
                cache.insert(&app.package_name, icon);
                stats.loaded += 1;
                // The view may have gone away while the icon was loading.
                // A teardown landing after this check is caught by the
                // closed signal.
                if !cancel.is_cancelled() {
                    redraw.notify();
                }
            }
            Err(e) => {
                cache.misses.fetch_add(1, Ordering::Relaxed);
                stats.missing += 1;
                tracing::trace!(package = %app.package_name, error = %e, "icon unavailable");
            }
        }
    }

    tracing::debug!(
        loaded = stats.loaded,
        missing = stats.missing,
        "icon loader finished"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockInventory;

    fn app(name: &str) -> AppRecord {
        AppRecord {
            title: name.to_string(),
            package_name: name.to_string(),
            enabled: true,
            whitelisted: false,
            uid: 0,
        }
    }

    #[test]
    fn resolve_miss_then_hit() {
        let cache = IconCache::new();
        assert!(cache.resolve("a").is_none());
        cache.insert("a", Icon::from_bytes(vec![1, 2, 3]));
        assert_eq!(cache.resolve("a").unwrap().bytes(), &[1, 2, 3]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn redraw_signal_coalesces() {
        let signal = RedrawSignal::new();
        let mut rx = signal.subscribe();
        signal.notify();
        signal.notify();
        signal.notify();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 3);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn failed_icon_skipped_without_retry() {
        let inventory = MockInventory::new()
            .with_icon("a", vec![1])
            .with_icon("c", vec![3]);
        let cache = IconCache::new();
        let redraw = RedrawSignal::new();
        let stats = load_icons(
            &inventory,
            &cache,
            &[app("a"), app("b"), app("c")],
            &redraw,
            &CancellationToken::new(),
        );
        assert_eq!(stats.loaded, 2);
        assert_eq!(stats.missing, 1);
        assert!(cache.resolve("b").is_none());
        assert_eq!(cache.misses(), 1);
        assert_eq!(inventory.icon_calls("b"), 1);
        assert_eq!(redraw.generation(), 2);
    }

    #[test]
    fn cancelled_loader_does_not_signal() {
        let inventory = MockInventory::new().with_icon("a", vec![1]);
        let cache = IconCache::new();
        let redraw = RedrawSignal::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = load_icons(&inventory, &cache, &[app("a")], &redraw, &cancel);
        assert!(stats.cancelled);
        assert_eq!(stats.loaded, 0);
        assert_eq!(redraw.generation(), 0);
        assert_eq!(inventory.icon_calls("a"), 0);
    }

    #[test]
    fn closed_signal_ignores_notify() {
        let signal = RedrawSignal::new();
        signal.notify();
        signal.close();
        signal.notify();
        assert!(signal.is_closed());
        assert_eq!(signal.generation(), 1);
    }

    #[tokio::test]
    async fn spawned_loader_populates_cache() {
        let inventory = Arc::new(MockInventory::new().with_icon("a", vec![7]));
        let cache = Arc::new(IconCache::new());
        let redraw = Arc::new(RedrawSignal::new());

        let stats = spawn_icon_loader(
            inventory,
            cache.clone(),
            vec![app("a")],
            redraw.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(stats.loaded, 1);
        assert_eq!(cache.resolve("a").unwrap().bytes(), &[7]);
        assert_eq!(redraw.generation(), 1);
    }
}
