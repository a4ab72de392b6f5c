//! Conflict Policy Port
//!
//! An incoming Update or Delete whose target row changed locally after the
//! last exchange is a conflict, not an error. The caller decides per item
//! whether the local or the remote row wins.

use crate::domain::change::SyncItem;

/// Directive for a single conflicting item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep the local row; the remote change is dropped.
    Skip,
    /// Override the local row with the remote values. For an Update whose
    /// row was deleted locally this reinstates the row.
    ForceWrite,
}

/// Caller-supplied conflict policy, consulted once per conflicting item.
///
/// Any `Fn(&SyncItem) -> ConflictResolution` is a resolver:
///
/// ```
/// use rowsync::{ConflictResolution, ConflictResolver, SyncItem};
///
/// fn remote_wins() -> impl ConflictResolver {
///     |_item: &SyncItem| ConflictResolution::ForceWrite
/// }
/// # let _ = remote_wins();
/// ```
pub trait ConflictResolver: Send + Sync {
    /// Decide the outcome for one conflicting item.
    fn resolve(&self, item: &SyncItem) -> ConflictResolution;
}

impl<F> ConflictResolver for F
where
    F: Fn(&SyncItem) -> ConflictResolution + Send + Sync,
{
    fn resolve(&self, item: &SyncItem) -> ConflictResolution {
        self(item)
    }
}
