//! SQLite Store Binding
//!
//! Reference implementation of the store binding over `rusqlite`. Each
//! session opens its own connection against the database file and closes
//! it on drop; cross-session state lives entirely in the file.

mod provision;
mod schema;
mod session;

pub use session::SqliteSession;

use crate::config::TableConfig;
use crate::domain::anchor::{StoreId, Version};
use crate::domain::ports::StoreBinding;
use crate::error::SyncError;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::time::Duration;

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Store(anyhow::Error::new(err))
    }
}

/// Binding over a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteBinding {
    path: PathBuf,
}

impl SqliteBinding {
    /// Create a binding from a connection descriptor. The descriptor must
    /// name a database file; in-memory databases cannot be shared across
    /// the one-connection-per-call sessions the engine opens.
    pub fn new(descriptor: impl AsRef<str>) -> Result<Self, SyncError> {
        let descriptor = descriptor.as_ref().trim();
        if descriptor.is_empty() {
            return Err(SyncError::InvalidConfig(
                "connection descriptor must name a database file".to_string(),
            ));
        }
        if descriptor == ":memory:" {
            return Err(SyncError::InvalidConfig(
                "in-memory databases are not shared across sessions".to_string(),
            ));
        }
        Ok(Self {
            path: PathBuf::from(descriptor),
        })
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, SyncError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Compact the tracking shadow tables: drop entries at or below
    /// `before` and raise every table's retention horizon to it. Peers
    /// whose acknowledged anchor falls below the new horizon must
    /// re-synchronize from an initial snapshot.
    pub fn prune_tracking(
        &self,
        tables: &[TableConfig],
        before: Version,
    ) -> Result<(), SyncError> {
        let conn = self.connect()?;
        let tx = conn.unchecked_transaction()?;
        for table in tables {
            let table_schema = schema::TableSchema::load(&tx, table)?;
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE row_version <= ?1",
                    table_schema.track_qualified
                ),
                params![before as i64],
            )?;
            tx.execute(
                "UPDATE __sync_tables SET min_valid = MAX(min_valid, ?1) WHERE name = ?2",
                params![before as i64, table.name],
            )?;
        }
        tx.commit()?;
        tracing::info!("pruned change tracking below version {}", before);
        Ok(())
    }
}

impl StoreBinding for SqliteBinding {
    type Session = SqliteSession;

    fn open(&self) -> Result<Self::Session, SyncError> {
        Ok(SqliteSession::new(self.connect()?))
    }

    fn apply_provision(&self, tables: &[TableConfig]) -> Result<StoreId, SyncError> {
        provision::provision(&self.connect()?, tables)
    }

    fn remove_provision(&self, tables: &[TableConfig]) -> Result<(), SyncError> {
        provision::deprovision(&self.connect()?, tables)
    }
}
