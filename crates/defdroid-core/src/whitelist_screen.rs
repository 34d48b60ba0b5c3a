//! The whitelist screen: one sectioned, sorted list of installed apps with a
//! whitelist checkbox per row.
//!
//! Every [`WhitelistScreen::load`] takes a fresh inventory snapshot and
//! rebuilds the records and the section index. Icons are loaded by a
//! background task bound to a child of the screen's cancellation token, so
//! a reload cancels the previous loader and [`WhitelistScreen::teardown`]
//! cancels all of them.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::CoreError;
use crate::apps::{AppListOptions, AppRecord, build_app_list};
use crate::engine::DefenseEngine;
use crate::icons::{IconCache, IconLoadStats, RedrawSignal, spawn_icon_loader};
use crate::inventory::{Icon, PackageInventory};
use crate::sections::SectionIndex;
use crate::store::WhitelistStore;
use crate::whitelist::{WhitelistChange, WhitelistMutator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    /// Nothing to show: render the placeholder instead of the list.
    Empty,
    Populated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowIcon {
    /// Icon not cached (yet): the generic app image.
    Default,
    Loaded(Icon),
}

/// Everything a row needs to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRow {
    pub title: String,
    pub icon: RowIcon,
    pub whitelisted: bool,
}

/// First visible row and its pixel offset from the top of the list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollPosition {
    pub index: usize,
    pub offset: i32,
}

pub struct WhitelistScreen<I: ?Sized, S, E> {
    inventory: Arc<I>,
    mutator: WhitelistMutator<S, E>,
    options: AppListOptions,
    cache: Arc<IconCache>,
    redraw: Arc<RedrawSignal>,
    cancel: CancellationToken,
    load_cancel: Option<CancellationToken>,
    icon_task: Option<JoinHandle<IconLoadStats>>,
    apps: Vec<AppRecord>,
    sections: SectionIndex,
    state: ListState,
    saved_scroll: Option<ScrollPosition>,
}

impl<I, S, E> WhitelistScreen<I, S, E>
where
    I: PackageInventory + ?Sized + 'static,
    S: WhitelistStore,
    E: DefenseEngine,
{
    pub fn new(inventory: Arc<I>, store: S, engine: E, options: AppListOptions) -> Self {
        Self::with_cache(inventory, store, engine, options, Arc::new(IconCache::new()))
    }

    /// Like [`WhitelistScreen::new`] but sharing an existing icon cache.
    pub fn with_cache(
        inventory: Arc<I>,
        store: S,
        engine: E,
        options: AppListOptions,
        cache: Arc<IconCache>,
    ) -> Self {
        Self {
            inventory,
            mutator: WhitelistMutator::new(store, engine),
            options,
            cache,
            redraw: Arc::new(RedrawSignal::new()),
            cancel: CancellationToken::new(),
            load_cancel: None,
            icon_task: None,
            apps: Vec::new(),
            sections: SectionIndex::default(),
            state: ListState::Empty,
            saved_scroll: None,
        }
    }

    /// Rebuild the list from a fresh snapshot and start loading icons.
    /// Must be called from within a Tokio runtime.
    pub fn load(&mut self) -> Result<ListState, CoreError> {
        if self.cancel.is_cancelled() {
            tracing::debug!("load after teardown ignored");
            return Ok(self.state);
        }
        if let Some(previous) = self.load_cancel.take() {
            previous.cancel();
        }

        let packages = self.inventory.list_installed_packages()?;
        let platform = self.inventory.platform_certificate();
        if platform.is_none() {
            tracing::warn!("platform certificate unknown; platform-signed apps will be listed");
        }
        let whitelist = self.mutator.store().read_whitelist()?;

        self.apps = build_app_list(packages, platform.as_ref(), &whitelist, self.options);
        self.sections = SectionIndex::build(&self.apps);
        self.state = if self.apps.is_empty() {
            ListState::Empty
        } else {
            ListState::Populated
        };
        tracing::debug!(
            apps = self.apps.len(),
            sections = self.sections.len(),
            "whitelist list loaded"
        );

        let token = self.cancel.child_token();
        self.icon_task = Some(spawn_icon_loader(
            Arc::clone(&self.inventory),
            Arc::clone(&self.cache),
            self.apps.clone(),
            Arc::clone(&self.redraw),
            token.clone(),
        ));
        self.load_cancel = Some(token);
        Ok(self.state)
    }

    pub fn state(&self) -> ListState {
        self.state
    }

    pub fn apps(&self) -> &[AppRecord] {
        &self.apps
    }

    pub fn sections(&self) -> &SectionIndex {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn position_for_section(&self, section: usize) -> Option<usize> {
        self.sections.position_for_section(section)
    }

    pub fn section_for_position(&self, position: usize) -> Option<usize> {
        self.sections.section_for_position(position, self.apps.len())
    }

    /// Row contents for `position`. The icon lookup never blocks.
    pub fn bind(&self, position: usize) -> Option<AppRow> {
        let app = self.apps.get(position)?;
        let icon = match self.cache.resolve(&app.package_name) {
            Some(icon) => RowIcon::Loaded(icon),
            None => RowIcon::Default,
        };
        Some(AppRow {
            title: app.title.clone(),
            icon,
            whitelisted: app.whitelisted,
        })
    }

    /// Checkbox handler for row `position`.
    pub fn set_whitelisted(
        &mut self,
        position: usize,
        whitelisted: bool,
    ) -> Result<WhitelistChange, CoreError> {
        let record = self
            .apps
            .get_mut(position)
            .ok_or(CoreError::NoSuchRow(position))?;
        self.mutator.set_whitelisted(record, whitelisted)
    }

    /// Subscribe to redraw requests from the icon loader.
    pub fn redraw_receiver(&self) -> watch::Receiver<u64> {
        self.redraw.subscribe()
    }

    pub fn icon_cache(&self) -> &Arc<IconCache> {
        &self.cache
    }

    pub fn mutator(&self) -> &WhitelistMutator<S, E> {
        &self.mutator
    }

    /// Wait for the current icon loader, if any, to finish.
    pub async fn wait_for_icons(&mut self) -> Option<IconLoadStats> {
        let task = self.icon_task.take()?;
        match task.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::warn!(error = %e, "icon loader panicked");
                None
            }
        }
    }

    /// Remember where the list was scrolled to.
    pub fn pause(&mut self, scroll: ScrollPosition) {
        tracing::trace!(index = scroll.index, offset = scroll.offset, "whitelist paused");
        self.saved_scroll = Some(scroll);
    }

    /// Reload and hand back the position saved by the last `pause`, once.
    pub fn resume(&mut self) -> Result<Option<ScrollPosition>, CoreError> {
        self.load()?;
        Ok(self.saved_scroll.take())
    }

    /// Stop all background work. No redraw is requested afterwards.
    pub fn teardown(&mut self) {
        self.cancel.cancel();
        self.redraw.close();
        self.load_cancel = None;
    }

    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<I: ?Sized, S, E> Drop for WhitelistScreen<I, S, E> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.redraw.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MemoryStore, MockEngine, MockInventory};

    type Screen = WhitelistScreen<MockInventory, MemoryStore, MockEngine>;

    fn screen(inventory: MockInventory) -> Screen {
        WhitelistScreen::new(
            Arc::new(inventory),
            MemoryStore::new(),
            MockEngine::new(),
            AppListOptions::default(),
        )
    }

    #[tokio::test]
    async fn empty_inventory_renders_placeholder() {
        let mut screen = screen(MockInventory::new());
        assert_eq!(screen.load().unwrap(), ListState::Empty);
        assert!(screen.bind(0).is_none());
        assert_eq!(screen.wait_for_icons().await.unwrap().loaded, 0);
    }

    #[tokio::test]
    async fn bind_shows_default_until_icon_cached() {
        let inventory = MockInventory::new()
            .with_app("org.alpha", "Alpha", true)
            .with_icon("org.alpha", vec![7]);
        let mut screen = screen(inventory);
        screen.load().unwrap();
        screen.wait_for_icons().await.unwrap();

        let row = screen.bind(0).unwrap();
        assert_eq!(row.title, "Alpha");
        assert_eq!(row.icon, RowIcon::Loaded(Icon::from_bytes(vec![7])));
        assert!(!row.whitelisted);
    }

    #[tokio::test]
    async fn row_toggle_out_of_range() {
        let mut screen = screen(MockInventory::new().with_app("a", "A", true));
        screen.load().unwrap();
        assert!(matches!(
            screen.set_whitelisted(3, true),
            Err(CoreError::NoSuchRow(3))
        ));
    }

    #[tokio::test]
    async fn resume_returns_saved_scroll_once() {
        let mut screen = screen(MockInventory::new().with_app("a", "A", true));
        screen.load().unwrap();
        let pos = ScrollPosition {
            index: 4,
            offset: -12,
        };
        screen.pause(pos);
        assert_eq!(screen.resume().unwrap(), Some(pos));
        assert_eq!(screen.resume().unwrap(), None);
    }

    #[tokio::test]
    async fn load_after_teardown_does_nothing() {
        let inventory = Arc::new(MockInventory::new().with_app("a", "A", true));
        let mut screen: WhitelistScreen<MockInventory, _, _> = WhitelistScreen::new(
            Arc::clone(&inventory),
            MemoryStore::new(),
            MockEngine::new(),
            AppListOptions::default(),
        );
        screen.teardown();
        assert_eq!(screen.load().unwrap(), ListState::Empty);
        assert!(screen.wait_for_icons().await.is_none());
        assert_eq!(inventory.icon_calls("a"), 0);
    }
}
