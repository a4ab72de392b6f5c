//! Table Introspection
//!
//! Reads a user table's column layout and primary key so the binding can
//! generate tracking DDL and row-mutation SQL. Identifiers are always
//! double-quoted; column and table names containing spaces are legal.

use crate::config::TableConfig;
use crate::error::SyncError;
use rusqlite::{params, Connection, Row};

/// Quote an identifier for embedding in generated SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Shadow-table name for a tracked table.
pub(crate) fn track_table_name(table: &str) -> String {
    format!("__sync_track_{table}")
}

/// Trigger name for a tracked table; `kind` is `ai`, `au`, or `ad`.
pub(crate) fn trigger_name(kind: &str, table: &str) -> String {
    format!("__sync_{kind}_{table}")
}

/// One column of a user table.
#[derive(Debug, Clone)]
pub(crate) struct ColumnDef {
    pub name: String,
    pub decl_type: String,
    /// 1-based position within the primary key, `None` for data columns
    pub pk_ordinal: Option<u32>,
}

/// Introspected layout of a tracked table.
#[derive(Debug, Clone)]
pub(crate) struct TableSchema {
    pub logical_name: String,
    /// Quoted schema prefix including the trailing dot, or empty
    pub prefix: String,
    /// Quoted, schema-prefixed user table
    pub qualified: String,
    /// Quoted, schema-prefixed shadow table
    pub track_qualified: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Load the layout of a configured table. Fails when the table does
    /// not exist or has no explicit primary key.
    pub fn load(conn: &Connection, table: &TableConfig) -> Result<Self, SyncError> {
        let map = |row: &Row<'_>| -> rusqlite::Result<ColumnDef> {
            let pk: u32 = row.get(2)?;
            Ok(ColumnDef {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                pk_ordinal: (pk > 0).then_some(pk),
            })
        };
        let columns: Vec<ColumnDef> = match &table.schema {
            Some(schema) => {
                let mut stmt = conn.prepare(
                    "SELECT name, type, pk FROM pragma_table_info(?1, ?2) ORDER BY cid",
                )?;
                let rows = stmt.query_map(params![table.name, schema], map)?;
                rows.collect::<Result<_, _>>()?
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")?;
                let rows = stmt.query_map(params![table.name], map)?;
                rows.collect::<Result<_, _>>()?
            }
        };

        if columns.is_empty() {
            return Err(SyncError::InvalidArgument(format!(
                "unknown table `{}`",
                table.name
            )));
        }
        if !columns.iter().any(|c| c.pk_ordinal.is_some()) {
            return Err(SyncError::InvalidConfig(format!(
                "table `{}` needs an explicit primary key to be tracked",
                table.name
            )));
        }

        let prefix = table
            .schema
            .as_deref()
            .map(|s| format!("{}.", quote_ident(s)))
            .unwrap_or_default();
        Ok(Self {
            logical_name: table.name.clone(),
            qualified: format!("{prefix}{}", quote_ident(&table.name)),
            track_qualified: format!("{prefix}{}", quote_ident(&track_table_name(&table.name))),
            prefix,
            columns,
        })
    }

    /// Primary-key columns, in key order.
    pub fn pk_columns(&self) -> Vec<&ColumnDef> {
        let mut pks: Vec<&ColumnDef> = self
            .columns
            .iter()
            .filter(|c| c.pk_ordinal.is_some())
            .collect();
        pks.sort_by_key(|c| c.pk_ordinal);
        pks
    }

    /// Non-key columns, in declaration order.
    pub fn data_columns(&self) -> Vec<&ColumnDef> {
        self.columns
            .iter()
            .filter(|c| c.pk_ordinal.is_none())
            .collect()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}
