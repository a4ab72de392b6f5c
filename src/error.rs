//! Engine Errors
//!
//! Every public operation surfaces failures through one error enum.
//! Conflicts are not errors; they are resolved through the conflict
//! policy supplied to `apply_changes`.

use crate::domain::anchor::{StoreId, SyncAnchor, Version};

/// Errors surfaced by the synchronization engine and its store bindings.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A caller-supplied value is unusable: a nil peer id, an unknown
    /// table name, an item for an upload-only table, a malformed item.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The store has not been provisioned, or its bookkeeping tables are
    /// missing.
    #[error("store is not initialized; run apply_provision first")]
    NotInitialized,

    /// The engine or binding configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An anchor fell below a table's change-tracking horizon. The caller
    /// must re-synchronize from an initial snapshot.
    #[error("anchor version {anchor} for table `{table}` is below the tracking horizon {min_valid}")]
    VersionTooOld {
        table: String,
        anchor: Version,
        min_valid: Version,
    },

    /// The change-set's target anchor names a different store.
    #[error("change set targets store {actual}, this store is {expected}")]
    WrongTarget { expected: StoreId, actual: StoreId },

    /// An incoming Insert collided with an existing row that is not an
    /// exact duplicate. Carries a suggested anchor to help the caller
    /// re-drive the exchange.
    #[error("insert could not be applied; resume from anchor {suggested_anchor}")]
    InvalidSyncOperation { suggested_anchor: SyncAnchor },

    /// The change-set failed its integrity check; the transport corrupted
    /// it in flight.
    #[error("change set checksum mismatch")]
    ChecksumMismatch,

    /// The underlying database failed. The enclosing transaction has been
    /// rolled back.
    #[error("store i/o failure: {0}")]
    Store(#[source] anyhow::Error),
}

impl SyncError {
    /// Wrap an arbitrary database-layer failure.
    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        Self::Store(err.into())
    }
}
