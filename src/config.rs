//! Engine Configuration
//!
//! Table configuration is supplied once at construction and is immutable
//! afterwards. Validation happens up front: duplicate or empty table names
//! never reach the engine.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};

/// Which way rows for a table may travel during synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    /// Rows leave this store but incoming changes are refused.
    UploadOnly,
    /// Rows are accepted from peers but never included in outgoing sets.
    DownloadOnly,
    /// Rows travel both ways.
    UploadAndDownload,
}

impl SyncDirection {
    /// Whether rows of this table are included in outgoing change-sets.
    pub fn uploads(&self) -> bool {
        matches!(self, Self::UploadOnly | Self::UploadAndDownload)
    }

    /// Whether rows of this table may be applied from incoming change-sets.
    pub fn downloads(&self) -> bool {
        matches!(self, Self::DownloadOnly | Self::UploadAndDownload)
    }
}

/// Per-table synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Logical table name (trimmed, unique across the configuration)
    pub name: String,
    /// Optional schema namespace the table lives in
    pub schema: Option<String>,
    /// Allowed direction of travel (default: both ways)
    pub direction: SyncDirection,
    /// Skip this table when producing an initial snapshot for a new peer
    pub skip_initial_snapshot: bool,
    /// Opaque record-type descriptor for higher layers
    pub record_type: Option<String>,
}

impl TableConfig {
    /// Create a configuration for a table, syncing both ways by default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            schema: None,
            direction: SyncDirection::UploadAndDownload,
            skip_initial_snapshot: false,
            record_type: None,
        }
    }

    /// Set the schema namespace.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set the sync direction.
    pub fn direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Exclude the table from initial snapshots.
    pub fn skip_initial_snapshot(mut self, skip: bool) -> Self {
        self.skip_initial_snapshot = skip;
        self
    }

    /// Attach an opaque record-type descriptor.
    pub fn record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }
}

/// The full engine configuration: an ordered collection of tracked tables.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    tables: Vec<TableConfig>,
}

impl SyncOptions {
    /// Start an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one table.
    pub fn table(mut self, table: TableConfig) -> Self {
        self.tables.push(table);
        self
    }

    /// Add several tables at once.
    pub fn tables(mut self, tables: impl IntoIterator<Item = TableConfig>) -> Self {
        self.tables.extend(tables);
        self
    }

    /// All configured tables, in declaration order.
    pub fn configured_tables(&self) -> &[TableConfig] {
        &self.tables
    }

    /// Look up a table by its logical name.
    pub fn find_table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.tables.is_empty() {
            return Err(SyncError::InvalidConfig(
                "at least one table must be configured".to_string(),
            ));
        }
        for (i, table) in self.tables.iter().enumerate() {
            if table.name.is_empty() {
                return Err(SyncError::InvalidConfig(
                    "table name must not be empty".to_string(),
                ));
            }
            if self.tables[..i].iter().any(|t| t.name == table.name) {
                return Err(SyncError::InvalidConfig(format!(
                    "duplicate table `{}`",
                    table.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_config_defaults() {
        let table = TableConfig::new("items");
        assert_eq!(table.name, "items");
        assert_eq!(table.direction, SyncDirection::UploadAndDownload);
        assert!(!table.skip_initial_snapshot);
        assert!(table.schema.is_none());
        assert!(table.record_type.is_none());
    }

    #[test]
    fn test_table_config_trims_name() {
        let table = TableConfig::new("  items  ");
        assert_eq!(table.name, "items");
    }

    #[test]
    fn test_table_config_builder() {
        let table = TableConfig::new("items")
            .schema("main")
            .direction(SyncDirection::UploadOnly)
            .skip_initial_snapshot(true)
            .record_type("Item");
        assert_eq!(table.schema.as_deref(), Some("main"));
        assert_eq!(table.direction, SyncDirection::UploadOnly);
        assert!(table.skip_initial_snapshot);
        assert_eq!(table.record_type.as_deref(), Some("Item"));
    }

    #[test]
    fn test_direction_predicates() {
        assert!(SyncDirection::UploadOnly.uploads());
        assert!(!SyncDirection::UploadOnly.downloads());
        assert!(!SyncDirection::DownloadOnly.uploads());
        assert!(SyncDirection::DownloadOnly.downloads());
        assert!(SyncDirection::UploadAndDownload.uploads());
        assert!(SyncDirection::UploadAndDownload.downloads());
    }

    #[test]
    fn test_validate_empty_configuration() {
        let options = SyncOptions::new();
        assert!(matches!(
            options.validate(),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_empty_table_name() {
        let options = SyncOptions::new().table(TableConfig::new("   "));
        assert!(matches!(
            options.validate(),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_duplicate_table_names() {
        let options = SyncOptions::new()
            .table(TableConfig::new("items"))
            .table(TableConfig::new("items"));
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validate_ok() {
        let options = SyncOptions::new()
            .table(TableConfig::new("items"))
            .table(TableConfig::new("orders"));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_find_table() {
        let options = SyncOptions::new()
            .table(TableConfig::new("items"))
            .table(TableConfig::new("orders"));
        assert!(options.find_table("orders").is_some());
        assert!(options.find_table("missing").is_none());
    }
}
