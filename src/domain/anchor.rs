//! Store Identity and Anchors
//!
//! Value types naming a peer and a point in its history. Anchors are
//! immutable and compared by value.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable 128-bit identity of a participating store.
///
/// Generated once on first provisioning and stored in the store itself.
/// The nil uuid is reserved and never names a valid peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId(Uuid);

impl StoreId {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The reserved zero identity.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Whether this is the reserved zero identity.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Parse from the canonical hyphenated text form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// The underlying uuid.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for StoreId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically non-decreasing per-store version counter.
pub type Version = u64;

/// A point in a store's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAnchor {
    /// The store whose history this anchor points into
    pub store_id: StoreId,
    /// The version within that store's history
    pub version: Version,
}

impl SyncAnchor {
    /// Create an anchor.
    pub fn new(store_id: StoreId, version: Version) -> Self {
        Self { store_id, version }
    }

    /// The anchor at the very beginning of a store's history.
    pub fn zero(store_id: StoreId) -> Self {
        Self::new(store_id, 0)
    }
}

impl std::fmt::Display for SyncAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.store_id, self.version)
    }
}
