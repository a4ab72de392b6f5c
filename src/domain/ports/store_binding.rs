//! Store Binding Port
//!
//! The contract a concrete database must satisfy for the protocol to run
//! against it: a change-tracking oracle, a conflict-aware row applier,
//! and the durable anchor registry. One session maps to one connection
//! and one transactional envelope.

use crate::config::TableConfig;
use crate::domain::anchor::{StoreId, Version};
use crate::domain::change::SyncItem;
use crate::error::SyncError;

/// Transactional mode for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    /// Snapshot reads only (assembly)
    ReadOnly,
    /// Reads plus row mutations and registry writes (application)
    ReadWrite,
}

/// Durable per-peer registry state.
///
/// `acked_version` and `applied_version` advance monotonically;
/// `peer_version` tracks the anchor the peer last returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerState {
    /// Highest version of this store the peer has confirmed applying;
    /// `None` until the first acknowledgment (selects the initial path)
    pub acked_version: Option<Version>,
    /// Version from the anchor the peer returned at its last apply
    pub peer_version: Version,
    /// Highest version of the peer's store we have applied
    pub applied_version: Version,
}

/// A single open connection to the store.
///
/// All oracle reads, row mutations, and registry writes performed between
/// `begin` and `commit` observe one consistent snapshot and commit
/// atomically. Dropping a session with an open transaction rolls it back.
pub trait StoreSession {
    /// Open the transactional envelope.
    fn begin(&mut self, mode: TxnMode) -> Result<(), SyncError>;

    /// Commit the envelope.
    fn commit(&mut self) -> Result<(), SyncError>;

    /// This store's durable identity; fails with `NotInitialized` when the
    /// store has not been provisioned.
    fn local_store_id(&mut self) -> Result<StoreId, SyncError>;

    // --- change-tracking oracle ---

    /// Latest committed version across all tracked tables.
    fn current_version(&mut self) -> Result<Version, SyncError>;

    /// Oldest version from which a delta for this table can still be
    /// reconstructed.
    fn min_valid_version(&mut self, table: &TableConfig) -> Result<Version, SyncError>;

    /// Row changes in `(since, current]`, with change types derived
    /// relative to `since`. Changes originated by `exclude_origin` are
    /// omitted so a peer never receives its own writes back.
    fn changes_since(
        &mut self,
        table: &TableConfig,
        since: Version,
        exclude_origin: StoreId,
    ) -> Result<Vec<SyncItem>, SyncError>;

    /// Full scan of a table, as Insert items, for a peer with no anchor.
    fn initial_snapshot(&mut self, table: &TableConfig) -> Result<Vec<SyncItem>, SyncError>;

    // --- conflict-aware row applier ---

    /// Tag subsequent row mutations as originating from `origin`, or clear
    /// the tag with `None`.
    fn set_apply_origin(&mut self, origin: Option<StoreId>) -> Result<(), SyncError>;

    /// Insert the item's row unless a row with the same primary key already
    /// exists. Returns the number of affected rows; 0 signals the key is
    /// taken.
    fn insert_row(
        &mut self,
        table: &TableConfig,
        item: &SyncItem,
        last_sync_version: Version,
        force_write: bool,
    ) -> Result<usize, SyncError>;

    /// Update the item's row if its tracked version is at most
    /// `last_sync_version`, or unconditionally under `force_write`.
    /// 0 affected rows signals a concurrent local change or a missing row.
    fn update_row(
        &mut self,
        table: &TableConfig,
        item: &SyncItem,
        last_sync_version: Version,
        force_write: bool,
    ) -> Result<usize, SyncError>;

    /// Delete the item's row under the same predicate as `update_row`.
    fn delete_row(
        &mut self,
        table: &TableConfig,
        item: &SyncItem,
        last_sync_version: Version,
        force_write: bool,
    ) -> Result<usize, SyncError>;

    /// Whether the stored row with the item's key carries exactly the
    /// item's values, for every column the item carries.
    fn row_matches(&mut self, table: &TableConfig, item: &SyncItem) -> Result<bool, SyncError>;

    // --- anchor registry ---

    /// Registry state for a peer, if any interaction has been recorded.
    fn peer_state(&mut self, peer: StoreId) -> Result<Option<PeerState>, SyncError>;

    /// Record an acknowledgment: the peer has applied this store's changes
    /// up to `acked_version` and returned an anchor at `peer_version`.
    fn save_acknowledgment(
        &mut self,
        peer: StoreId,
        acked_version: Version,
        peer_version: Version,
    ) -> Result<(), SyncError>;

    /// Record that this store has applied the peer's changes up to
    /// `source_version`, creating the registry row if absent.
    fn record_applied(&mut self, peer: StoreId, source_version: Version) -> Result<(), SyncError>;
}

/// Factory for sessions plus the provisioning surface of a store.
pub trait StoreBinding: Send + Sync + 'static {
    /// Session type produced by this binding.
    type Session: StoreSession;

    /// Open a fresh session (one connection). Each public engine operation
    /// opens exactly one and drops it on exit.
    fn open(&self) -> Result<Self::Session, SyncError>;

    /// Idempotently create the bookkeeping state and enable row-level
    /// change tracking for every configured table; generates and stores
    /// the durable store id when absent. Returns the store id.
    fn apply_provision(&self, tables: &[TableConfig]) -> Result<StoreId, SyncError>;

    /// Tear change tracking down. User data is untouched.
    fn remove_provision(&self, tables: &[TableConfig]) -> Result<(), SyncError>;
}
