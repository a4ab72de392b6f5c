//! Scripted in-memory session for protocol unit tests.
//!
//! Returns preprogrammed affected-row counts and records every call so
//! tests can assert the exact sequence the protocol drove.

use crate::config::TableConfig;
use crate::domain::anchor::{StoreId, Version};
use crate::domain::change::{ChangeType, SyncItem, Value};
use crate::domain::ports::{PeerState, StoreSession, TxnMode};
use crate::error::SyncError;

pub(crate) struct MockSession {
    pub store_id: StoreId,
    /// Successive results of `current_version`; the last entry repeats.
    pub current_versions: Vec<Version>,
    pub min_valid: Version,
    pub peer: Option<PeerState>,
    /// Items returned by every `changes_since` call.
    pub change_items: Vec<SyncItem>,
    /// Items returned by every `initial_snapshot` call.
    pub snapshot_items: Vec<SyncItem>,
    /// Successive affected-row counts; exhausted lists default to 1.
    pub insert_results: Vec<usize>,
    pub update_results: Vec<usize>,
    pub delete_results: Vec<usize>,
    pub matching_row: bool,
    pub calls: Vec<String>,
    pub committed: bool,
    version_calls: usize,
    insert_calls: usize,
    update_calls: usize,
    delete_calls: usize,
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            store_id: StoreId::generate(),
            current_versions: vec![10],
            min_valid: 0,
            peer: None,
            change_items: Vec::new(),
            snapshot_items: Vec::new(),
            insert_results: Vec::new(),
            update_results: Vec::new(),
            delete_results: Vec::new(),
            matching_row: false,
            calls: Vec::new(),
            committed: false,
            version_calls: 0,
            insert_calls: 0,
            update_calls: 0,
            delete_calls: 0,
        }
    }

    pub fn item(table: &str, change_type: ChangeType, id: i64) -> SyncItem {
        SyncItem::new(
            table,
            change_type,
            [
                ("id".to_string(), Value::Integer(id)),
                ("name".to_string(), Value::Text(format!("row-{id}"))),
            ],
        )
    }

    fn scripted(results: &[usize], call: &mut usize) -> usize {
        let value = results.get(*call).copied().unwrap_or(1);
        *call += 1;
        value
    }
}

impl StoreSession for MockSession {
    fn begin(&mut self, mode: TxnMode) -> Result<(), SyncError> {
        self.calls.push(format!("begin({mode:?})"));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SyncError> {
        self.calls.push("commit".to_string());
        self.committed = true;
        Ok(())
    }

    fn local_store_id(&mut self) -> Result<StoreId, SyncError> {
        self.calls.push("local_store_id".to_string());
        Ok(self.store_id)
    }

    fn current_version(&mut self) -> Result<Version, SyncError> {
        let version = self
            .current_versions
            .get(self.version_calls)
            .or(self.current_versions.last())
            .copied()
            .unwrap_or(0);
        self.version_calls += 1;
        self.calls.push(format!("current_version -> {version}"));
        Ok(version)
    }

    fn min_valid_version(&mut self, table: &TableConfig) -> Result<Version, SyncError> {
        self.calls.push(format!("min_valid_version({})", table.name));
        Ok(self.min_valid)
    }

    fn changes_since(
        &mut self,
        table: &TableConfig,
        since: Version,
        _exclude_origin: StoreId,
    ) -> Result<Vec<SyncItem>, SyncError> {
        self.calls
            .push(format!("changes_since({}, {since})", table.name));
        Ok(self.change_items.clone())
    }

    fn initial_snapshot(&mut self, table: &TableConfig) -> Result<Vec<SyncItem>, SyncError> {
        self.calls.push(format!("initial_snapshot({})", table.name));
        Ok(self.snapshot_items.clone())
    }

    fn set_apply_origin(&mut self, origin: Option<StoreId>) -> Result<(), SyncError> {
        self.calls.push(format!(
            "set_apply_origin({})",
            if origin.is_some() { "some" } else { "none" }
        ));
        Ok(())
    }

    fn insert_row(
        &mut self,
        _table: &TableConfig,
        _item: &SyncItem,
        _last_sync_version: Version,
        force_write: bool,
    ) -> Result<usize, SyncError> {
        self.calls.push(format!("insert_row(force={force_write})"));
        Ok(Self::scripted(&self.insert_results, &mut self.insert_calls))
    }

    fn update_row(
        &mut self,
        _table: &TableConfig,
        _item: &SyncItem,
        _last_sync_version: Version,
        force_write: bool,
    ) -> Result<usize, SyncError> {
        self.calls.push(format!("update_row(force={force_write})"));
        Ok(Self::scripted(&self.update_results, &mut self.update_calls))
    }

    fn delete_row(
        &mut self,
        _table: &TableConfig,
        _item: &SyncItem,
        _last_sync_version: Version,
        force_write: bool,
    ) -> Result<usize, SyncError> {
        self.calls.push(format!("delete_row(force={force_write})"));
        Ok(Self::scripted(&self.delete_results, &mut self.delete_calls))
    }

    fn row_matches(&mut self, _table: &TableConfig, _item: &SyncItem) -> Result<bool, SyncError> {
        self.calls.push("row_matches".to_string());
        Ok(self.matching_row)
    }

    fn peer_state(&mut self, peer: StoreId) -> Result<Option<PeerState>, SyncError> {
        self.calls.push(format!("peer_state({peer})"));
        Ok(self.peer)
    }

    fn save_acknowledgment(
        &mut self,
        peer: StoreId,
        acked_version: Version,
        peer_version: Version,
    ) -> Result<(), SyncError> {
        self.calls.push(format!(
            "save_acknowledgment({peer}, {acked_version}, {peer_version})"
        ));
        Ok(())
    }

    fn record_applied(&mut self, peer: StoreId, source_version: Version) -> Result<(), SyncError> {
        self.calls
            .push(format!("record_applied({peer}, {source_version})"));
        Ok(())
    }
}
