//! Provider Port
//!
//! The surface a host application consumes. A full pairwise exchange is:
//! the source assembles with `get_changes`, the target applies with
//! `apply_changes` and returns its new anchor, and the transport hands
//! that anchor back to the source, which records it with `acknowledge`.

use crate::domain::anchor::{StoreId, SyncAnchor, Version};
use crate::domain::change::SyncChangeSet;
use crate::domain::ports::ConflictResolver;
use crate::error::SyncError;
use async_trait::async_trait;
use std::sync::Arc;

/// A synchronization endpoint over one store.
#[async_trait]
pub trait SyncProvider: Send + Sync {
    /// This store's durable identity.
    async fn store_id(&self) -> Result<StoreId, SyncError>;

    /// Idempotently provision the store; returns its identity.
    async fn apply_provision(&self) -> Result<StoreId, SyncError>;

    /// Tear change tracking down, keeping user data.
    async fn remove_provision(&self) -> Result<(), SyncError>;

    /// Assemble the change-set the peer `other` must receive to catch up.
    async fn get_changes(&self, other: StoreId) -> Result<SyncChangeSet, SyncError>;

    /// Apply a change-set received from a peer, skipping every conflicting
    /// item, and return the new acknowledgment anchor.
    async fn apply_changes(&self, change_set: SyncChangeSet) -> Result<SyncAnchor, SyncError>;

    /// Apply a change-set with a caller-supplied conflict policy.
    async fn apply_changes_with(
        &self,
        change_set: SyncChangeSet,
        on_conflict: Arc<dyn ConflictResolver>,
    ) -> Result<SyncAnchor, SyncError>;

    /// Record that `peer` applied this store's changes up to
    /// `acked_version` and returned `peer_anchor` while doing so.
    async fn acknowledge(
        &self,
        peer: StoreId,
        peer_anchor: SyncAnchor,
        acked_version: Version,
    ) -> Result<(), SyncError>;
}
