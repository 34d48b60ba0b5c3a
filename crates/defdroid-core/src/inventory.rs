//! Installed-package inventory: the package manager as seen by the screens.
//!
//! The inventory is an opaque collaborator. Implementations wrap the platform
//! package manager (or, on desktop, a JSON dump of it) and are queried from
//! both the UI thread and the background icon/label loaders, so they must be
//! `Send + Sync`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// The package is not installed, or its resource could not be read.
    #[error("package not found: {0}")]
    NotFound(String),
    #[error("package inventory unavailable: {0}")]
    Unavailable(String),
}

/// A signing certificate, compared byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Certificate(pub Vec<u8>);

impl Certificate {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
}

/// Metadata for one installed package, as reported by the package manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub package_name: String,
    /// Display label; may be empty.
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub uid: u32,
    #[serde(default)]
    pub is_system: bool,
    /// First signing certificate, if the package is signed.
    #[serde(default)]
    pub signing_certificate: Option<Certificate>,
}

fn default_true() -> bool {
    true
}

/// Opaque icon image handle. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon(Arc<[u8]>);

impl Icon {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Read access to the installed-package inventory.
pub trait PackageInventory: Send + Sync {
    /// Every installed package, in no particular order.
    fn list_installed_packages(&self) -> Result<Vec<PackageInfo>, InventoryError>;

    /// The platform's own signing certificate, or `None` if it cannot be
    /// determined.
    fn platform_certificate(&self) -> Option<Certificate>;

    /// Load the launcher icon of `package_name`.
    fn icon(&self, package_name: &str) -> Result<Icon, InventoryError>;

    /// Resolve the display label of `package_name`.
    fn label(&self, package_name: &str) -> Result<String, InventoryError>;
}

impl<T: PackageInventory + ?Sized> PackageInventory for Arc<T> {
    fn list_installed_packages(&self) -> Result<Vec<PackageInfo>, InventoryError> {
        (**self).list_installed_packages()
    }

    fn platform_certificate(&self) -> Option<Certificate> {
        (**self).platform_certificate()
    }

    fn icon(&self, package_name: &str) -> Result<Icon, InventoryError> {
        (**self).icon(package_name)
    }

    fn label(&self, package_name: &str) -> Result<String, InventoryError> {
        (**self).label(package_name)
    }
}
