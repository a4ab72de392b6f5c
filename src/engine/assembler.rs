//! Change-Set Assembler
//!
//! Builds the change-set a peer must receive to catch up to this store.
//! A peer with a recorded acknowledgment gets the incremental delta since
//! the version it confirmed; a new peer gets an initial snapshot.

use crate::config::SyncOptions;
use crate::domain::anchor::{StoreId, SyncAnchor};
use crate::domain::change::SyncChangeSet;
use crate::domain::ports::{StoreSession, TxnMode};
use crate::error::SyncError;

/// Assemble a change-set for `other` inside a single read transaction.
pub(crate) fn build_change_set<S: StoreSession>(
    session: &mut S,
    options: &SyncOptions,
    self_id: StoreId,
    other: StoreId,
) -> Result<SyncChangeSet, SyncError> {
    if other.is_nil() {
        return Err(SyncError::InvalidArgument(
            "peer store id must not be nil".to_string(),
        ));
    }
    if other == self_id {
        return Err(SyncError::InvalidArgument(
            "peer store id names this store".to_string(),
        ));
    }

    session.begin(TxnMode::ReadOnly)?;
    let state = session.peer_state(other)?;
    let acked = state.as_ref().and_then(|s| s.acked_version);
    let peer_version = state.map(|s| s.peer_version).unwrap_or(0);
    let v_now = session.current_version()?;

    let mut items = Vec::new();
    match acked {
        Some(since) => {
            for table in options
                .configured_tables()
                .iter()
                .filter(|t| t.direction.uploads())
            {
                let min_valid = session.min_valid_version(table)?;
                if since < min_valid {
                    return Err(SyncError::VersionTooOld {
                        table: table.name.clone(),
                        anchor: since,
                        min_valid,
                    });
                }
                items.extend(session.changes_since(table, since, other)?);
            }
        }
        None => {
            for table in options
                .configured_tables()
                .iter()
                .filter(|t| t.direction.uploads() && !t.skip_initial_snapshot)
            {
                items.extend(session.initial_snapshot(table)?);
            }
        }
    }
    session.commit()?;

    tracing::info!(
        "assembled {} change set for peer {}: items={} source_version={}",
        if acked.is_some() { "incremental" } else { "initial" },
        other,
        items.len(),
        v_now
    );

    Ok(SyncChangeSet::new(
        SyncAnchor::new(self_id, v_now),
        SyncAnchor::new(other, peer_version),
        items,
    ))
}
