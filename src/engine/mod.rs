//! Synchronization Engine
//!
//! Packages the assembler, the applier, and the anchor registry behind
//! the async provider surface. Each public operation opens one session
//! against the store binding, runs its blocking database work on a
//! dedicated thread, and releases the session on every exit path.

mod applier;
mod assembler;
#[cfg(test)]
pub(crate) mod testing;

use crate::config::SyncOptions;
use crate::domain::anchor::{StoreId, SyncAnchor, Version};
use crate::domain::change::SyncChangeSet;
use crate::domain::ports::{ConflictResolver, StoreBinding, StoreSession, SyncProvider, TxnMode};
use crate::error::SyncError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task;

/// A synchronization endpoint over one store.
///
/// The engine is cheap to share behind an `Arc` and safe to drive from
/// concurrent tasks; isolation between operations is delegated entirely
/// to the store's transaction manager.
pub struct SyncEngine<B: StoreBinding> {
    binding: Arc<B>,
    options: Arc<SyncOptions>,
    store_id: OnceCell<StoreId>,
}

impl<B: StoreBinding> SyncEngine<B> {
    /// Create an engine over a binding. The configuration is validated
    /// here; duplicate or empty table names never reach a session.
    pub fn new(binding: B, options: SyncOptions) -> Result<Self, SyncError> {
        options.validate()?;
        Ok(Self {
            binding: Arc::new(binding),
            options: Arc::new(options),
            store_id: OnceCell::new(),
        })
    }

    /// Run one blocking unit of database work off the async runtime.
    async fn run_blocking<T, F>(&self, op: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&B) -> Result<T, SyncError> + Send + 'static,
    {
        let binding = Arc::clone(&self.binding);
        task::spawn_blocking(move || op(binding.as_ref()))
            .await
            .map_err(|e| SyncError::store(anyhow::anyhow!("blocking task failed: {e}")))?
    }

    /// Resolve and cache the durable store id. The one-shot cell makes
    /// concurrent first calls safe; once set it is never cleared.
    async fn initialized_store_id(&self) -> Result<StoreId, SyncError> {
        self.store_id
            .get_or_try_init(|| async {
                self.run_blocking(|binding| {
                    let mut session = binding.open()?;
                    session.begin(TxnMode::ReadOnly)?;
                    let id = session.local_store_id()?;
                    session.commit()?;
                    Ok(id)
                })
                .await
            })
            .await
            .copied()
    }

    /// This store's durable identity.
    pub async fn store_id(&self) -> Result<StoreId, SyncError> {
        self.initialized_store_id().await
    }

    /// Idempotently provision the store for synchronization.
    pub async fn apply_provision(&self) -> Result<StoreId, SyncError> {
        let options = Arc::clone(&self.options);
        self.run_blocking(move |binding| binding.apply_provision(options.configured_tables()))
            .await
    }

    /// Tear change tracking down, keeping user data.
    pub async fn remove_provision(&self) -> Result<(), SyncError> {
        let options = Arc::clone(&self.options);
        self.run_blocking(move |binding| binding.remove_provision(options.configured_tables()))
            .await
    }

    /// Assemble the change-set the peer `other` must receive to catch up.
    pub async fn get_changes(&self, other: StoreId) -> Result<SyncChangeSet, SyncError> {
        let self_id = self.initialized_store_id().await?;
        let options = Arc::clone(&self.options);
        self.run_blocking(move |binding| {
            let mut session = binding.open()?;
            assembler::build_change_set(&mut session, &options, self_id, other)
        })
        .await
    }

    /// Apply a change-set, skipping every conflicting item.
    pub async fn apply_changes(&self, change_set: SyncChangeSet) -> Result<SyncAnchor, SyncError> {
        self.apply(change_set, None).await
    }

    /// Apply a change-set with a caller-supplied conflict policy.
    pub async fn apply_changes_with(
        &self,
        change_set: SyncChangeSet,
        on_conflict: Arc<dyn ConflictResolver>,
    ) -> Result<SyncAnchor, SyncError> {
        self.apply(change_set, Some(on_conflict)).await
    }

    async fn apply(
        &self,
        change_set: SyncChangeSet,
        on_conflict: Option<Arc<dyn ConflictResolver>>,
    ) -> Result<SyncAnchor, SyncError> {
        let self_id = self.initialized_store_id().await?;
        let options = Arc::clone(&self.options);
        self.run_blocking(move |binding| {
            let mut session = binding.open()?;
            applier::apply_change_set(
                &mut session,
                &options,
                self_id,
                &change_set,
                on_conflict.as_deref(),
            )
        })
        .await
    }

    /// Record that `peer` has applied this store's changes up to
    /// `acked_version`, returning `peer_anchor` while doing so.
    pub async fn acknowledge(
        &self,
        peer: StoreId,
        peer_anchor: SyncAnchor,
        acked_version: Version,
    ) -> Result<(), SyncError> {
        if peer.is_nil() {
            return Err(SyncError::InvalidArgument(
                "peer store id must not be nil".to_string(),
            ));
        }
        if peer_anchor.store_id != peer {
            return Err(SyncError::InvalidArgument(
                "anchor does not name the acknowledged peer".to_string(),
            ));
        }
        self.initialized_store_id().await?;
        self.run_blocking(move |binding| {
            let mut session = binding.open()?;
            session.begin(TxnMode::ReadWrite)?;
            session.save_acknowledgment(peer, acked_version, peer_anchor.version)?;
            session.commit()
        })
        .await
    }
}

#[async_trait]
impl<B: StoreBinding> SyncProvider for SyncEngine<B> {
    async fn store_id(&self) -> Result<StoreId, SyncError> {
        SyncEngine::store_id(self).await
    }

    async fn apply_provision(&self) -> Result<StoreId, SyncError> {
        SyncEngine::apply_provision(self).await
    }

    async fn remove_provision(&self) -> Result<(), SyncError> {
        SyncEngine::remove_provision(self).await
    }

    async fn get_changes(&self, other: StoreId) -> Result<SyncChangeSet, SyncError> {
        SyncEngine::get_changes(self, other).await
    }

    async fn apply_changes(&self, change_set: SyncChangeSet) -> Result<SyncAnchor, SyncError> {
        SyncEngine::apply_changes(self, change_set).await
    }

    async fn apply_changes_with(
        &self,
        change_set: SyncChangeSet,
        on_conflict: Arc<dyn ConflictResolver>,
    ) -> Result<SyncAnchor, SyncError> {
        SyncEngine::apply_changes_with(self, change_set, on_conflict).await
    }

    async fn acknowledge(
        &self,
        peer: StoreId,
        peer_anchor: SyncAnchor,
        acked_version: Version,
    ) -> Result<(), SyncError> {
        SyncEngine::acknowledge(self, peer, peer_anchor, acked_version).await
    }
}
