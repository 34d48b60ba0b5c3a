//! Action-log viewer: streams guardian actions from the engine's log.
//!
//! One blocking task per load reads the log front to back, resolves each
//! target package's label and sends [`ActionLogItem`]s over an
//! [`async_channel`] in log order. The view appends them as they arrive.
//! When the list's token is cancelled the task stops reading and sends
//! nothing further.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::inventory::PackageInventory;

/// Timestamp format of a row's detail line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One action taken by a guardian, as recorded by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub action_type: String,
    pub target_package: String,
    pub target_uid: u32,
    #[serde(default)]
    pub extra: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

/// Sequential reader over the engine's action log. Dropping it closes it.
pub trait LogReader: Iterator<Item = ActionEvent> + Send {}

impl<T: Iterator<Item = ActionEvent> + Send> LogReader for T {}

/// Opens readers over the engine's action log.
pub trait ActionLogSource: Send + Sync {
    /// `None` if the log cannot be opened.
    fn open_reader(&self) -> Option<Box<dyn LogReader>>;
}

/// A log entry paired with the display label of its target app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionLogItem {
    pub app_label: String,
    pub event: ActionEvent,
}

impl ActionLogItem {
    /// Row detail line: the event time in local time.
    pub fn detail(&self) -> String {
        format_timestamp(self.event.timestamp_ms)
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms).single() {
        Some(t) => t.format(TIMESTAMP_FORMAT).to_string(),
        None => String::new(),
    }
}

/// Label for a package, or `U<uid>` when it cannot be resolved.
pub fn resolve_label<I>(inventory: &I, event: &ActionEvent) -> String
where
    I: PackageInventory + ?Sized,
{
    inventory
        .label(&event.target_package)
        .unwrap_or_else(|_| format!("U{}", event.target_uid))
}

/// Start streaming the log. Returns the item receiver and a handle yielding
/// the number of items sent. Must be called from within a Tokio runtime.
pub fn spawn_log_reader<S, I>(
    source: Arc<S>,
    inventory: Arc<I>,
    cancel: CancellationToken,
) -> (async_channel::Receiver<ActionLogItem>, JoinHandle<usize>)
where
    S: ActionLogSource + ?Sized + 'static,
    I: PackageInventory + ?Sized + 'static,
{
    let (tx, rx) = async_channel::unbounded();
    let handle = tokio::task::spawn_blocking(move || {
        let Some(reader) = source.open_reader() else {
            tracing::debug!("action log unavailable");
            return 0;
        };
        let mut sent = 0;
        for event in reader {
            if cancel.is_cancelled() {
                tracing::debug!(sent, "action log reader stopped: view torn down");
                break;
            }
            let item = ActionLogItem {
                app_label: resolve_label(inventory.as_ref(), &event),
                event,
            };
            if tx.send_blocking(item).is_err() {
                break;
            }
            sent += 1;
        }
        sent
    });
    (rx, handle)
}

/// Final state of a log list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogListState {
    Loading,
    /// Nothing was logged: show the "no action logs" message.
    Empty,
    Populated,
}

/// List model of the action-log screen.
#[derive(Debug)]
pub struct ActionLogView {
    items: Vec<ActionLogItem>,
    expanded: BTreeSet<usize>,
    state: LogListState,
    selection: Option<usize>,
}

impl Default for ActionLogView {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            expanded: BTreeSet::new(),
            state: LogListState::Loading,
            selection: None,
        }
    }
}

impl ActionLogView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: ActionLogItem) {
        self.items.push(item);
    }

    /// Mark the stream complete. Selects the newest entry if any arrived.
    pub fn finish(&mut self) {
        if self.items.is_empty() {
            self.state = LogListState::Empty;
            self.selection = None;
        } else {
            self.state = LogListState::Populated;
            self.selection = Some(self.items.len() - 1);
        }
    }

    /// Show or hide the detail line of row `position`. Returns the new
    /// visibility, or `None` for an out-of-range row.
    pub fn toggle_detail(&mut self, position: usize) -> Option<bool> {
        if position >= self.items.len() {
            return None;
        }
        if self.expanded.remove(&position) {
            Some(false)
        } else {
            self.expanded.insert(position);
            Some(true)
        }
    }

    pub fn is_expanded(&self, position: usize) -> bool {
        self.expanded.contains(&position)
    }

    pub fn items(&self) -> &[ActionLogItem] {
        &self.items
    }

    pub fn state(&self) -> LogListState {
        self.state
    }

    pub fn selection(&self) -> Option<usize> {
        self.selection
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Load the whole log into a fresh view, stopping early on `cancel`.
pub async fn load_action_log<S, I>(
    source: Arc<S>,
    inventory: Arc<I>,
    cancel: CancellationToken,
) -> ActionLogView
where
    S: ActionLogSource + ?Sized + 'static,
    I: PackageInventory + ?Sized + 'static,
{
    let (rx, handle) = spawn_log_reader(source, inventory, cancel.clone());
    let mut view = ActionLogView::new();
    while let Ok(item) = rx.recv().await {
        if cancel.is_cancelled() {
            break;
        }
        view.push(item);
    }
    if let Err(e) = handle.await {
        tracing::warn!(error = %e, "action log reader panicked");
    }
    view.finish();
    view
}
