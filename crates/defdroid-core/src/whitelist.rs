//! Whitelist mutation: the path from a row's checkbox to the engine.

use std::collections::BTreeSet;

use crate::CoreError;
use crate::apps::AppRecord;
use crate::engine::DefenseEngine;
use crate::store::WhitelistStore;

/// Separator of the serialized whitelist handed to the engine.
pub const WHITELIST_SEPARATOR: &str = ",";

/// Serialize a whitelist deterministically: identifiers in sorted order,
/// comma-joined.
pub fn encode_whitelist(packages: &BTreeSet<String>) -> String {
    packages
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(WHITELIST_SEPARATOR)
}

/// Parse a serialized whitelist. Blank entries are dropped.
pub fn decode_whitelist(serialized: &str) -> BTreeSet<String> {
    serialized
        .split(WHITELIST_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// What a call to [`WhitelistMutator::set_whitelisted`] did to the stored set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistChange {
    /// True if the persisted set was rewritten.
    pub store_written: bool,
    /// The set as handed to the engine.
    pub packages: BTreeSet<String>,
}

/// Applies whitelist toggles to the in-memory record, the local store and
/// the defense engine, in that order.
///
/// The three steps are not transactional. The record flips first so the UI
/// reacts immediately; if the engine write then fails, the local store and
/// the engine disagree until the next successful write, and the caller gets
/// [`CoreError::InconsistentWrite`].
pub struct WhitelistMutator<S, E> {
    store: S,
    engine: E,
}

impl<S: WhitelistStore, E: DefenseEngine> WhitelistMutator<S, E> {
    pub fn new(store: S, engine: E) -> Self {
        Self { store, engine }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn set_whitelisted(
        &self,
        record: &mut AppRecord,
        whitelisted: bool,
    ) -> Result<WhitelistChange, CoreError> {
        record.whitelisted = whitelisted;

        let mut packages = self.store.read_whitelist()?;
        let changed = if whitelisted {
            tracing::debug!(package = %record.package_name, "add to whitelist");
            packages.insert(record.package_name.clone())
        } else {
            tracing::debug!(package = %record.package_name, "remove from whitelist");
            packages.remove(&record.package_name)
        };
        if changed {
            self.store.write_whitelist(&packages)?;
        }

        let serialized = encode_whitelist(&packages);
        tracing::debug!(whitelist = %serialized, "new whitelist");
        if let Err(source) = self.engine.write_white_list(&serialized) {
            tracing::warn!(
                package = %record.package_name,
                error = %source,
                "engine rejected whitelist; local state is ahead of the engine"
            );
            return Err(CoreError::InconsistentWrite {
                package: record.package_name.clone(),
                source,
            });
        }

        Ok(WhitelistChange {
            store_written: changed,
            packages,
        })
    }
}
