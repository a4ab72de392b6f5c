//! rowSync Library
//!
//! A bidirectional row-level synchronization engine between relational
//! stores. Every participating store is an equal peer: any pair can
//! reconcile by exchanging change-sets, applying them under version
//! predicates, and acknowledging the anchors that come back.
//!
//! ## Architecture
//!
//! - **Domain**: anchors, the change model, and the ports (store binding,
//!   conflict policy, provider surface)
//! - **Engine**: the change-set assembler and the conflict-arbitrating
//!   applier, driven through an async facade
//! - **Adapters**: the SQLite reference binding with trigger-based
//!   change tracking
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rowsync::{SqliteBinding, SyncEngine, SyncOptions, TableConfig};
//!
//! let options = SyncOptions::new().table(TableConfig::new("items"));
//! let engine = SyncEngine::new(SqliteBinding::new("app.db")?, options)?;
//! engine.apply_provision().await?;
//!
//! // exchange with a peer
//! let set = engine.get_changes(peer_id).await?;
//! // ... transport the set, apply it over there, transport the anchor back
//! engine.acknowledge(peer_id, returned_anchor, set.source_anchor.version).await?;
//! ```

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;

// Re-export commonly used types
pub use adapters::sqlite::SqliteBinding;
pub use config::{SyncDirection, SyncOptions, TableConfig};
pub use domain::anchor::{StoreId, SyncAnchor, Version};
pub use domain::change::{ChangeType, SyncChangeSet, SyncItem, Value};
pub use domain::ports::{
    ConflictResolution, ConflictResolver, PeerState, StoreBinding, StoreSession, SyncProvider,
    TxnMode,
};
pub use engine::SyncEngine;
pub use error::SyncError;
