//! Persisted key/value stores behind the settings screens.
//!
//! Two narrow traits:
//! - [`WhitelistStore`]: the screen-local whitelist set (store name
//!   [`WHITELIST_STORE`], key [`WHITELIST_KEY`]), independent of the
//!   defense engine's own settings.
//! - [`GlobalSettings`]: a flat string table standing in for the
//!   platform's global settings provider.
//!
//! [`SqliteStore`] implements both on one SQLite file.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use thiserror::Error;

/// Name of the preference store holding the whitelist.
pub const WHITELIST_STORE: &str = "whitelist";

/// Key of the whitelisted-package set inside [`WHITELIST_STORE`].
pub const WHITELIST_KEY: &str = "whitelist_packages";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed stored value for {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Persisted whitelist set.
pub trait WhitelistStore: Send + Sync {
    /// Current set; empty if never written.
    fn read_whitelist(&self) -> Result<BTreeSet<String>, StoreError>;

    fn write_whitelist(&self, packages: &BTreeSet<String>) -> Result<(), StoreError>;
}

/// Flat string settings table.
pub trait GlobalSettings: Send + Sync {
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

impl<T: WhitelistStore + ?Sized> WhitelistStore for std::sync::Arc<T> {
    fn read_whitelist(&self) -> Result<BTreeSet<String>, StoreError> {
        (**self).read_whitelist()
    }

    fn write_whitelist(&self, packages: &BTreeSet<String>) -> Result<(), StoreError> {
        (**self).write_whitelist(packages)
    }
}

impl<T: GlobalSettings + ?Sized> GlobalSettings for std::sync::Arc<T> {
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get_string(key)
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).put_string(key, value)
    }
}

/// Open a SQLite connection with WAL mode and standard pragmas.
fn open_sqlite(path: &Path) -> Result<Connection, rusqlite::Error> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS preferences (
             store TEXT NOT NULL,
             key   TEXT NOT NULL,
             value TEXT NOT NULL,
             PRIMARY KEY (store, key)
         );
         CREATE TABLE IF NOT EXISTS global_settings (
             key   TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );",
    )
}

/// SQLite-backed preference and global-settings store.
///
/// A single connection behind a [`Mutex`]; every call is one short statement.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = open_sqlite(path)?;
        init_schema(&conn)?;
        tracing::debug!(path = %path.display(), "opened settings store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn get_preference(&self, store: &str, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let value = conn
            .query_row(
                "SELECT value FROM preferences WHERE store = ?1 AND key = ?2",
                params![store, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put_preference(&self, store: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO preferences (store, key, value) VALUES (?1, ?2, ?3) \
             ON CONFLICT(store, key) DO UPDATE SET value = excluded.value",
            params![store, key, value],
        )?;
        Ok(())
    }
}

impl WhitelistStore for SqliteStore {
    fn read_whitelist(&self) -> Result<BTreeSet<String>, StoreError> {
        match self.get_preference(WHITELIST_STORE, WHITELIST_KEY)? {
            Some(json) => serde_json::from_str(&json).map_err(|source| StoreError::Malformed {
                key: WHITELIST_KEY.to_string(),
                source,
            }),
            None => Ok(BTreeSet::new()),
        }
    }

    fn write_whitelist(&self, packages: &BTreeSet<String>) -> Result<(), StoreError> {
        let json = serde_json::to_string(packages).map_err(|source| StoreError::Malformed {
            key: WHITELIST_KEY.to_string(),
            source,
        })?;
        self.put_preference(WHITELIST_STORE, WHITELIST_KEY, &json)
    }
}

impl GlobalSettings for SqliteStore {
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let value = conn
            .query_row(
                "SELECT value FROM global_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO global_settings (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn whitelist_defaults_to_empty() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.read_whitelist().unwrap().is_empty());
    }

    #[test]
    fn whitelist_write_then_read() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.write_whitelist(&set(&["b.pkg", "a.pkg"])).unwrap();
        assert_eq!(store.read_whitelist().unwrap(), set(&["a.pkg", "b.pkg"]));

        store.write_whitelist(&set(&[])).unwrap();
        assert!(store.read_whitelist().unwrap().is_empty());
    }

    #[test]
    fn global_settings_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get_string("phonelab_age").unwrap(), None);
        store.put_string("phonelab_age", "25-34").unwrap();
        store.put_string("phonelab_age", "35-44").unwrap();
        assert_eq!(
            store.get_string("phonelab_age").unwrap().as_deref(),
            Some("35-44")
        );
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.db");

        let store = SqliteStore::open(&path).unwrap();
        store.write_whitelist(&set(&["org.example"])).unwrap();
        store.put_string("defense_service_enabled", "true").unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.read_whitelist().unwrap(), set(&["org.example"]));
        assert_eq!(
            reopened
                .get_string("defense_service_enabled")
                .unwrap()
                .as_deref(),
            Some("true")
        );
    }

    #[test]
    fn malformed_whitelist_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .put_preference(WHITELIST_STORE, WHITELIST_KEY, "not json")
            .unwrap();
        assert!(matches!(
            store.read_whitelist(),
            Err(StoreError::Malformed { .. })
        ));
    }
}
