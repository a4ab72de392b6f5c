//! Change-Set Applier
//!
//! Applies an incoming change-set under a single write transaction.
//! Conflicts surface as zero affected rows; each conflicting item runs
//! through an explicit state machine whose outcome is applied, skipped,
//! or an aborting error.

use crate::config::{SyncOptions, TableConfig};
use crate::domain::anchor::{StoreId, SyncAnchor, Version};
use crate::domain::change::{ChangeType, SyncChangeSet, SyncItem};
use crate::domain::ports::{ConflictResolution, ConflictResolver, StoreSession, TxnMode};
use crate::error::SyncError;

/// Terminal state of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Applied,
    Skipped,
}

/// Apply `change_set` and return the new acknowledgment anchor.
pub(crate) fn apply_change_set<S: StoreSession>(
    session: &mut S,
    options: &SyncOptions,
    self_id: StoreId,
    change_set: &SyncChangeSet,
    on_conflict: Option<&dyn ConflictResolver>,
) -> Result<SyncAnchor, SyncError> {
    if !change_set.verify() {
        return Err(SyncError::ChecksumMismatch);
    }
    if change_set.target_anchor.store_id != self_id {
        return Err(SyncError::WrongTarget {
            expected: self_id,
            actual: change_set.target_anchor.store_id,
        });
    }
    let source = change_set.source_anchor.store_id;
    if source.is_nil() {
        return Err(SyncError::InvalidArgument(
            "source store id must not be nil".to_string(),
        ));
    }
    if source == self_id {
        return Err(SyncError::InvalidArgument(
            "change set originates from this store".to_string(),
        ));
    }

    session.begin(TxnMode::ReadWrite)?;
    let v_now = session.current_version()?;
    let last_sync = change_set.target_anchor.version;
    session.set_apply_origin(Some(source))?;

    let mut any_applied = false;
    for item in &change_set.items {
        let table = options.find_table(&item.table).ok_or_else(|| {
            SyncError::InvalidArgument(format!("unknown table `{}`", item.table))
        })?;
        if !table.direction.downloads() {
            return Err(SyncError::InvalidArgument(format!(
                "table `{}` does not accept incoming changes",
                table.name
            )));
        }
        let min_valid = session.min_valid_version(table)?;
        if last_sync < min_valid {
            return Err(SyncError::VersionTooOld {
                table: table.name.clone(),
                anchor: last_sync,
                min_valid,
            });
        }
        if apply_item(session, table, item, self_id, last_sync, on_conflict)? == ItemOutcome::Applied
        {
            any_applied = true;
        }
    }

    session.set_apply_origin(None)?;
    session.record_applied(source, change_set.source_anchor.version)?;

    // Applying rows advances the store's own version; re-read it so the
    // returned anchor matches the committed state.
    let new_version = if any_applied {
        session.current_version()?
    } else {
        v_now
    };
    session.commit()?;

    tracing::info!(
        "applied change set from {}: items={} applied_any={} new_version={}",
        source,
        change_set.len(),
        any_applied,
        new_version
    );
    Ok(SyncAnchor::new(self_id, new_version))
}

/// Run one item through the conflict state machine.
fn apply_item<S: StoreSession>(
    session: &mut S,
    table: &TableConfig,
    item: &SyncItem,
    self_id: StoreId,
    last_sync: Version,
    on_conflict: Option<&dyn ConflictResolver>,
) -> Result<ItemOutcome, SyncError> {
    let affected = match item.change_type {
        ChangeType::Insert => session.insert_row(table, item, last_sync, false)?,
        ChangeType::Update => session.update_row(table, item, last_sync, false)?,
        ChangeType::Delete => session.delete_row(table, item, last_sync, false)?,
    };
    if affected > 0 {
        return Ok(ItemOutcome::Applied);
    }

    match item.change_type {
        // A key collision that is an exact duplicate is a re-delivery and
        // is skipped; anything else cannot be reconciled by this protocol.
        ChangeType::Insert => {
            if session.row_matches(table, item)? {
                tracing::debug!("duplicate insert into `{}` skipped", table.name);
                Ok(ItemOutcome::Skipped)
            } else {
                Err(SyncError::InvalidSyncOperation {
                    suggested_anchor: SyncAnchor::new(self_id, last_sync + 1),
                })
            }
        }
        ChangeType::Update | ChangeType::Delete => {
            let resolution = on_conflict
                .map(|r| r.resolve(item))
                .unwrap_or(ConflictResolution::Skip);
            tracing::debug!(
                "conflict on `{}` ({}): resolved as {:?}",
                table.name,
                item.change_type.as_str(),
                resolution
            );
            match resolution {
                ConflictResolution::Skip => Ok(ItemOutcome::Skipped),
                ConflictResolution::ForceWrite => {
                    force_write(session, table, item, last_sync)
                }
            }
        }
    }
}

/// Forced retry after a conflict: the version predicate is dropped, and a
/// forced Update whose row is gone escalates to reinstating the row.
fn force_write<S: StoreSession>(
    session: &mut S,
    table: &TableConfig,
    item: &SyncItem,
    last_sync: Version,
) -> Result<ItemOutcome, SyncError> {
    match item.change_type {
        ChangeType::Update => {
            if session.update_row(table, item, last_sync, true)? > 0 {
                return Ok(ItemOutcome::Applied);
            }
            tracing::warn!(
                "row in `{}` was deleted locally, reinstating from remote values",
                table.name
            );
            if session.insert_row(table, item, last_sync, true)? > 0 {
                Ok(ItemOutcome::Applied)
            } else {
                Err(SyncError::store(anyhow::anyhow!(
                    "row in `{}` could neither be updated nor reinstated",
                    table.name
                )))
            }
        }
        ChangeType::Delete => {
            if session.delete_row(table, item, last_sync, true)? > 0 {
                Ok(ItemOutcome::Applied)
            } else {
                // already gone; the delete is idempotent
                Ok(ItemOutcome::Skipped)
            }
        }
        ChangeType::Insert => unreachable!("insert conflicts abort the transaction"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SyncDirection, TableConfig};
    use crate::engine::testing::MockSession;
    use std::sync::Arc;

    fn options() -> SyncOptions {
        SyncOptions::new()
            .table(TableConfig::new("items"))
            .table(TableConfig::new("outbox").direction(SyncDirection::UploadOnly))
    }

    fn set_for(
        session: &MockSession,
        items: Vec<SyncItem>,
    ) -> (StoreId, SyncChangeSet) {
        let source = StoreId::generate();
        let set = SyncChangeSet::new(
            SyncAnchor::new(source, 12),
            SyncAnchor::new(session.store_id, 5),
            items,
        );
        (source, set)
    }

    #[test]
    fn test_wrong_target_is_rejected() {
        let mut session = MockSession::new();
        let self_id = session.store_id;
        let set = SyncChangeSet::new(
            SyncAnchor::new(StoreId::generate(), 3),
            SyncAnchor::new(StoreId::generate(), 0),
            vec![],
        );
        let err = apply_change_set(&mut session, &options(), self_id, &set, None).unwrap_err();
        assert!(matches!(err, SyncError::WrongTarget { .. }));
        assert!(session.calls.is_empty());
    }

    #[test]
    fn test_tampered_change_set_is_rejected() {
        let mut session = MockSession::new();
        let self_id = session.store_id;
        let (_, mut set) = set_for(&session, vec![MockSession::item("items", ChangeType::Insert, 1)]);
        set.items[0].values.insert("id".to_string(), 99i64.into());
        let err = apply_change_set(&mut session, &options(), self_id, &set, None).unwrap_err();
        assert!(matches!(err, SyncError::ChecksumMismatch));
    }

    #[test]
    fn test_unknown_table_is_rejected() {
        let mut session = MockSession::new();
        let self_id = session.store_id;
        let (_, set) = set_for(&session, vec![MockSession::item("ghost", ChangeType::Insert, 1)]);
        let err = apply_change_set(&mut session, &options(), self_id, &set, None).unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(_)));
        assert!(!session.committed);
    }

    #[test]
    fn test_upload_only_table_is_refused() {
        let mut session = MockSession::new();
        let self_id = session.store_id;
        let (_, set) = set_for(&session, vec![MockSession::item("outbox", ChangeType::Insert, 1)]);
        let err = apply_change_set(&mut session, &options(), self_id, &set, None).unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(_)));
    }

    #[test]
    fn test_stale_target_anchor_fails_version_too_old() {
        let mut session = MockSession::new();
        session.min_valid = 9;
        let self_id = session.store_id;
        let (_, set) = set_for(&session, vec![MockSession::item("items", ChangeType::Update, 1)]);
        let err = apply_change_set(&mut session, &options(), self_id, &set, None).unwrap_err();
        assert!(matches!(err, SyncError::VersionTooOld { .. }));
    }

    #[test]
    fn test_clean_apply_advances_anchor_and_records_source() {
        let mut session = MockSession::new();
        session.current_versions = vec![20, 23];
        session.insert_results = vec![1, 1];
        let self_id = session.store_id;
        let (source, set) = set_for(
            &session,
            vec![
                MockSession::item("items", ChangeType::Insert, 1),
                MockSession::item("items", ChangeType::Insert, 2),
            ],
        );
        let anchor = apply_change_set(&mut session, &options(), self_id, &set, None).unwrap();

        assert_eq!(anchor, SyncAnchor::new(self_id, 23));
        assert!(session
            .calls
            .contains(&format!("record_applied({source}, 12)")));
        assert!(session.calls.contains(&"set_apply_origin(some)".to_string()));
        assert!(session.calls.contains(&"set_apply_origin(none)".to_string()));
        assert!(session.committed);
    }

    #[test]
    fn test_nothing_applied_keeps_version_read_at_start() {
        let mut session = MockSession::new();
        session.current_versions = vec![20];
        session.update_results = vec![0];
        let self_id = session.store_id;
        let (_, set) = set_for(&session, vec![MockSession::item("items", ChangeType::Update, 1)]);
        let anchor = apply_change_set(&mut session, &options(), self_id, &set, None).unwrap();

        // default policy skipped the conflict; the anchor does not advance
        assert_eq!(anchor, SyncAnchor::new(self_id, 20));
        assert!(session.committed);
    }

    #[test]
    fn test_duplicate_insert_is_skipped() {
        let mut session = MockSession::new();
        session.insert_results = vec![0];
        session.matching_row = true;
        let self_id = session.store_id;
        let (_, set) = set_for(&session, vec![MockSession::item("items", ChangeType::Insert, 1)]);
        let anchor = apply_change_set(&mut session, &options(), self_id, &set, None).unwrap();
        assert_eq!(anchor.version, session.current_versions[0]);
    }

    #[test]
    fn test_colliding_insert_aborts_with_suggested_anchor() {
        let mut session = MockSession::new();
        session.insert_results = vec![0];
        session.matching_row = false;
        let self_id = session.store_id;
        let (_, set) = set_for(&session, vec![MockSession::item("items", ChangeType::Insert, 1)]);
        let err = apply_change_set(&mut session, &options(), self_id, &set, None).unwrap_err();

        match err {
            SyncError::InvalidSyncOperation { suggested_anchor } => {
                assert_eq!(suggested_anchor, SyncAnchor::new(self_id, 6));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!session.committed);
    }

    #[test]
    fn test_conflicting_update_defaults_to_skip() {
        let mut session = MockSession::new();
        session.update_results = vec![0];
        let self_id = session.store_id;
        let (_, set) = set_for(&session, vec![MockSession::item("items", ChangeType::Update, 1)]);
        apply_change_set(&mut session, &options(), self_id, &set, None).unwrap();

        // no forced retry happened
        assert_eq!(
            session
                .calls
                .iter()
                .filter(|c| c.starts_with("update_row"))
                .count(),
            1
        );
    }

    #[test]
    fn test_force_write_retries_update_without_predicate() {
        let mut session = MockSession::new();
        session.current_versions = vec![20, 21];
        session.update_results = vec![0, 1];
        let self_id = session.store_id;
        let (_, set) = set_for(&session, vec![MockSession::item("items", ChangeType::Update, 1)]);
        let resolver: Arc<dyn ConflictResolver> =
            Arc::new(|_: &SyncItem| ConflictResolution::ForceWrite);
        let anchor =
            apply_change_set(&mut session, &options(), self_id, &set, Some(resolver.as_ref()))
                .unwrap();

        assert_eq!(anchor.version, 21);
        assert!(session.calls.contains(&"update_row(force=true)".to_string()));
    }

    #[test]
    fn test_forced_update_of_deleted_row_reinstates_it() {
        let mut session = MockSession::new();
        session.current_versions = vec![20, 22];
        session.update_results = vec![0, 0];
        session.insert_results = vec![1];
        let self_id = session.store_id;
        let (_, set) = set_for(&session, vec![MockSession::item("items", ChangeType::Update, 1)]);
        let resolver: Arc<dyn ConflictResolver> =
            Arc::new(|_: &SyncItem| ConflictResolution::ForceWrite);
        let anchor =
            apply_change_set(&mut session, &options(), self_id, &set, Some(resolver.as_ref()))
                .unwrap();

        assert_eq!(anchor.version, 22);
        assert!(session.calls.contains(&"insert_row(force=true)".to_string()));
    }

    #[test]
    fn test_forced_delete_of_missing_row_is_accepted_silently() {
        let mut session = MockSession::new();
        session.current_versions = vec![20];
        session.delete_results = vec![0, 0];
        let self_id = session.store_id;
        let (_, set) = set_for(&session, vec![MockSession::item("items", ChangeType::Delete, 1)]);
        let resolver: Arc<dyn ConflictResolver> =
            Arc::new(|_: &SyncItem| ConflictResolution::ForceWrite);
        let anchor =
            apply_change_set(&mut session, &options(), self_id, &set, Some(resolver.as_ref()))
                .unwrap();

        // nothing applied; anchor stays at the version read at start
        assert_eq!(anchor.version, 20);
        assert!(session.committed);
    }
}
