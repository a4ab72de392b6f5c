//! SQLite Session
//!
//! One open connection with an explicit transactional envelope. Oracle
//! reads, row mutations, and registry writes all run against the same
//! connection; dropping the session with an open transaction rolls it
//! back, so no exit path can leave partial state behind.

use crate::adapters::sqlite::schema::{quote_ident, TableSchema};
use crate::config::TableConfig;
use crate::domain::anchor::{StoreId, Version};
use crate::domain::change::{ChangeType, SyncItem, Value};
use crate::domain::ports::{PeerState, StoreSession, TxnMode};
use crate::error::SyncError;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};

pub struct SqliteSession {
    conn: Connection,
    tx_open: bool,
    schemas: HashMap<String, TableSchema>,
}

impl SqliteSession {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            conn,
            tx_open: false,
            schemas: HashMap::new(),
        }
    }

    fn schema(&mut self, table: &TableConfig) -> Result<TableSchema, SyncError> {
        if let Some(schema) = self.schemas.get(&table.name) {
            return Ok(schema.clone());
        }
        let schema = TableSchema::load(&self.conn, table)?;
        self.schemas.insert(table.name.clone(), schema.clone());
        Ok(schema)
    }

    /// Split an item into key and non-key column/value pairs, validating
    /// that the full primary key is carried and no unknown column is.
    fn split_item<'a>(
        schema: &'a TableSchema,
        item: &'a SyncItem,
    ) -> Result<(Vec<(&'a str, &'a Value)>, Vec<(&'a str, &'a Value)>), SyncError> {
        let mut keys = Vec::new();
        for column in schema.pk_columns() {
            let value = item.value(&column.name).ok_or_else(|| {
                SyncError::InvalidArgument(format!(
                    "item for `{}` is missing key column `{}`",
                    schema.logical_name, column.name
                ))
            })?;
            keys.push((column.name.as_str(), value));
        }
        let mut data = Vec::new();
        for (name, value) in &item.values {
            match schema.column(name) {
                Some(column) if column.pk_ordinal.is_none() => {
                    data.push((name.as_str(), value));
                }
                Some(_) => {}
                None => {
                    return Err(SyncError::InvalidArgument(format!(
                        "item for `{}` carries unknown column `{}`",
                        schema.logical_name, name
                    )));
                }
            }
        }
        Ok((keys, data))
    }
}

fn sql_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(i) => rusqlite::types::Value::Integer(*i),
        Value::Real(f) => rusqlite::types::Value::Real(*f),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// Map bookkeeping-read failures on an unprovisioned store.
fn bookkeeping_err(err: rusqlite::Error) -> SyncError {
    match &err {
        rusqlite::Error::QueryReturnedNoRows => SyncError::NotInitialized,
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("no such table: __sync") => {
            SyncError::NotInitialized
        }
        _ => SyncError::store(err),
    }
}

impl StoreSession for SqliteSession {
    fn begin(&mut self, mode: TxnMode) -> Result<(), SyncError> {
        let sql = match mode {
            TxnMode::ReadOnly => "BEGIN",
            TxnMode::ReadWrite => "BEGIN IMMEDIATE",
        };
        self.conn.execute_batch(sql)?;
        self.tx_open = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SyncError> {
        self.conn.execute_batch("COMMIT")?;
        self.tx_open = false;
        Ok(())
    }

    fn local_store_id(&mut self) -> Result<StoreId, SyncError> {
        let raw: String = self
            .conn
            .query_row("SELECT store_id FROM __sync_identity WHERE id = 1", [], |r| {
                r.get(0)
            })
            .map_err(bookkeeping_err)?;
        StoreId::parse(&raw)
            .map_err(|e| SyncError::store(anyhow::anyhow!("stored identity is corrupt: {e}")))
    }

    fn current_version(&mut self) -> Result<Version, SyncError> {
        let version: i64 = self
            .conn
            .query_row("SELECT version FROM __sync_state WHERE id = 1", [], |r| {
                r.get(0)
            })
            .map_err(bookkeeping_err)?;
        Ok(version as Version)
    }

    fn min_valid_version(&mut self, table: &TableConfig) -> Result<Version, SyncError> {
        let min_valid: i64 = self
            .conn
            .query_row(
                "SELECT min_valid FROM __sync_tables WHERE name = ?1",
                params![table.name],
                |r| r.get(0),
            )
            .map_err(bookkeeping_err)?;
        Ok(min_valid as Version)
    }

    fn changes_since(
        &mut self,
        table: &TableConfig,
        since: Version,
        exclude_origin: StoreId,
    ) -> Result<Vec<SyncItem>, SyncError> {
        let min_valid = self.min_valid_version(table)?;
        if since < min_valid {
            return Err(SyncError::VersionTooOld {
                table: table.name.clone(),
                anchor: since,
                min_valid,
            });
        }

        let schema = self.schema(table)?;
        let pk_columns = schema.pk_columns();
        let data_columns = schema.data_columns();
        let first_pk = quote_ident(&pk_columns[0].name);

        let mut select: Vec<String> = pk_columns
            .iter()
            .map(|c| {
                format!(
                    "tr.{}",
                    quote_ident(&c.name)
                )
            })
            .collect();
        select.push("tr.row_version".to_string());
        select.push("tr.created_version".to_string());
        select.push("tr.tombstone".to_string());
        select.push(format!("(u.{first_pk} IS NOT NULL)"));
        for column in &data_columns {
            select.push(format!(
                "u.{}",
                quote_ident(&column.name)
            ));
        }
        let join: Vec<String> = pk_columns
            .iter()
            .map(|c| {
                let ident = quote_ident(&c.name);
                format!("u.{ident} = tr.{ident}")
            })
            .collect();
        let sql = format!(
            "SELECT {select} FROM {track} AS tr
             LEFT JOIN {table} AS u ON {join}
             WHERE tr.row_version > ?1
               AND NOT (tr.tombstone = 1 AND tr.created_version > ?1)
               AND (tr.origin IS NULL OR tr.origin <> ?2)
             ORDER BY tr.row_version",
            select = select.join(", "),
            track = schema.track_qualified,
            table = schema.qualified,
            join = join.join(" AND "),
        );

        let pk_count = pk_columns.len();
        let pk_names: Vec<String> = pk_columns.iter().map(|c| c.name.clone()).collect();
        let data_names: Vec<String> = data_columns.iter().map(|c| c.name.clone()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![since as i64, exclude_origin.to_string()],
            |row| -> rusqlite::Result<Option<SyncItem>> {
                let created_version: i64 = row.get(pk_count + 1)?;
                let tombstone: bool = row.get::<_, i64>(pk_count + 2)? != 0;
                let row_present: bool = row.get::<_, i64>(pk_count + 3)? != 0;

                let mut values = BTreeMap::new();
                for (i, name) in pk_names.iter().enumerate() {
                    values.insert(name.clone(), value_from_ref(row.get_ref(i)?));
                }
                if tombstone {
                    return Ok(Some(SyncItem {
                        table: table.name.clone(),
                        change_type: ChangeType::Delete,
                        values,
                    }));
                }
                if !row_present {
                    // shadow says live but the row is gone; nothing usable
                    return Ok(None);
                }
                for (i, name) in data_names.iter().enumerate() {
                    values.insert(
                        name.clone(),
                        value_from_ref(row.get_ref(pk_count + 4 + i)?),
                    );
                }
                let change_type = if created_version as Version > since {
                    ChangeType::Insert
                } else {
                    ChangeType::Update
                };
                Ok(Some(SyncItem {
                    table: table.name.clone(),
                    change_type,
                    values,
                }))
            },
        )?;

        let mut items = Vec::new();
        for row in rows {
            if let Some(item) = row? {
                items.push(item);
            }
        }
        Ok(items)
    }

    fn initial_snapshot(&mut self, table: &TableConfig) -> Result<Vec<SyncItem>, SyncError> {
        let schema = self.schema(table)?;
        let columns: Vec<String> = schema.columns.iter().map(|c| c.name.clone()).collect();
        let select: Vec<String> = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect();
        let sql = format!(
            "SELECT {} FROM {}",
            select.join(", "),
            schema.qualified
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| -> rusqlite::Result<SyncItem> {
            let mut values = BTreeMap::new();
            for (i, name) in columns.iter().enumerate() {
                values.insert(name.clone(), value_from_ref(row.get_ref(i)?));
            }
            Ok(SyncItem {
                table: table.name.clone(),
                change_type: ChangeType::Insert,
                values,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn set_apply_origin(&mut self, origin: Option<StoreId>) -> Result<(), SyncError> {
        self.conn
            .execute(
                "UPDATE __sync_context SET origin = ?1 WHERE id = 1",
                params![origin.map(|o| o.to_string())],
            )
            .map_err(bookkeeping_err)?;
        Ok(())
    }

    fn insert_row(
        &mut self,
        table: &TableConfig,
        item: &SyncItem,
        _last_sync_version: Version,
        _force_write: bool,
    ) -> Result<usize, SyncError> {
        let schema = self.schema(table)?;
        let (keys, data) = Self::split_item(&schema, item)?;

        let mut columns: Vec<&str> = keys.iter().map(|(n, _)| *n).collect();
        columns.extend(data.iter().map(|(n, _)| *n));
        let column_list: Vec<String> = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect();
        let placeholders: Vec<String> =
            (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let key_match: Vec<String> = keys
            .iter()
            .enumerate()
            .map(|(i, (name, _))| {
                format!(
                    "{} = ?{}",
                    quote_ident(name),
                    i + 1
                )
            })
            .collect();
        let sql = format!(
            "INSERT INTO {table} ({columns}) SELECT {placeholders}
             WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE {key_match})",
            table = schema.qualified,
            columns = column_list.join(", "),
            placeholders = placeholders.join(", "),
            key_match = key_match.join(" AND "),
        );

        let mut values: Vec<rusqlite::types::Value> =
            keys.iter().map(|(_, v)| sql_value(v)).collect();
        values.extend(data.iter().map(|(_, v)| sql_value(v)));
        Ok(self
            .conn
            .execute(&sql, rusqlite::params_from_iter(values))?)
    }

    fn update_row(
        &mut self,
        table: &TableConfig,
        item: &SyncItem,
        last_sync_version: Version,
        force_write: bool,
    ) -> Result<usize, SyncError> {
        let schema = self.schema(table)?;
        let (keys, data) = Self::split_item(&schema, item)?;
        if data.is_empty() {
            return Err(SyncError::InvalidArgument(format!(
                "update item for `{}` carries no non-key columns",
                schema.logical_name
            )));
        }

        let assignments: Vec<String> = data
            .iter()
            .enumerate()
            .map(|(i, (name, _))| {
                format!(
                    "{} = ?{}",
                    quote_ident(name),
                    i + 1
                )
            })
            .collect();
        let key_match: Vec<String> = keys
            .iter()
            .enumerate()
            .map(|(i, (name, _))| {
                let ident = quote_ident(name);
                format!("{ident} = ?{}", data.len() + i + 1)
            })
            .collect();
        let track_match: Vec<String> = keys
            .iter()
            .enumerate()
            .map(|(i, (name, _))| {
                let ident = quote_ident(name);
                format!("tr.{ident} = ?{}", data.len() + i + 1)
            })
            .collect();

        let mut sql = format!(
            "UPDATE {table} SET {assignments} WHERE {key_match}",
            table = schema.qualified,
            assignments = assignments.join(", "),
            key_match = key_match.join(" AND "),
        );
        if !force_write {
            sql.push_str(&format!(
                " AND NOT EXISTS (SELECT 1 FROM {track} AS tr
                   WHERE {track_match} AND tr.row_version > ?{version_param})",
                track = schema.track_qualified,
                track_match = track_match.join(" AND "),
                version_param = data.len() + keys.len() + 1,
            ));
        }

        let mut values: Vec<rusqlite::types::Value> =
            data.iter().map(|(_, v)| sql_value(v)).collect();
        values.extend(keys.iter().map(|(_, v)| sql_value(v)));
        if !force_write {
            values.push(rusqlite::types::Value::Integer(last_sync_version as i64));
        }
        Ok(self
            .conn
            .execute(&sql, rusqlite::params_from_iter(values))?)
    }

    fn delete_row(
        &mut self,
        table: &TableConfig,
        item: &SyncItem,
        last_sync_version: Version,
        force_write: bool,
    ) -> Result<usize, SyncError> {
        let schema = self.schema(table)?;
        let (keys, _) = Self::split_item(&schema, item)?;

        let key_match: Vec<String> = keys
            .iter()
            .enumerate()
            .map(|(i, (name, _))| {
                format!(
                    "{} = ?{}",
                    quote_ident(name),
                    i + 1
                )
            })
            .collect();
        let track_match: Vec<String> = keys
            .iter()
            .enumerate()
            .map(|(i, (name, _))| {
                format!(
                    "tr.{} = ?{}",
                    quote_ident(name),
                    i + 1
                )
            })
            .collect();

        let mut sql = format!(
            "DELETE FROM {table} WHERE {key_match}",
            table = schema.qualified,
            key_match = key_match.join(" AND "),
        );
        if !force_write {
            sql.push_str(&format!(
                " AND NOT EXISTS (SELECT 1 FROM {track} AS tr
                   WHERE {track_match} AND tr.row_version > ?{version_param})",
                track = schema.track_qualified,
                track_match = track_match.join(" AND "),
                version_param = keys.len() + 1,
            ));
        }

        let mut values: Vec<rusqlite::types::Value> =
            keys.iter().map(|(_, v)| sql_value(v)).collect();
        if !force_write {
            values.push(rusqlite::types::Value::Integer(last_sync_version as i64));
        }
        Ok(self
            .conn
            .execute(&sql, rusqlite::params_from_iter(values))?)
    }

    fn row_matches(&mut self, table: &TableConfig, item: &SyncItem) -> Result<bool, SyncError> {
        let schema = self.schema(table)?;
        let (keys, data) = Self::split_item(&schema, item)?;

        let select: Vec<String> = data
            .iter()
            .map(|(name, _)| quote_ident(name))
            .collect();
        let key_match: Vec<String> = keys
            .iter()
            .enumerate()
            .map(|(i, (name, _))| {
                format!(
                    "{} = ?{}",
                    quote_ident(name),
                    i + 1
                )
            })
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            if select.is_empty() {
                "1".to_string()
            } else {
                select.join(", ")
            },
            schema.qualified,
            key_match.join(" AND "),
        );

        let key_values: Vec<rusqlite::types::Value> =
            keys.iter().map(|(_, v)| sql_value(v)).collect();
        let stored: Option<Vec<Value>> = self
            .conn
            .query_row(&sql, rusqlite::params_from_iter(key_values), |row| {
                let mut out = Vec::with_capacity(data.len());
                for i in 0..data.len() {
                    out.push(value_from_ref(row.get_ref(i)?));
                }
                Ok(out)
            })
            .optional()?;

        match stored {
            None => Ok(false),
            Some(stored) => Ok(stored
                .iter()
                .zip(data.iter())
                .all(|(have, (_, want))| have == *want)),
        }
    }

    fn peer_state(&mut self, peer: StoreId) -> Result<Option<PeerState>, SyncError> {
        let state = self
            .conn
            .query_row(
                "SELECT acked_version, peer_version, applied_version
                 FROM __sync_anchors WHERE store_id = ?1",
                params![peer.to_string()],
                |row| {
                    let acked: Option<i64> = row.get(0)?;
                    let peer_version: Option<i64> = row.get(1)?;
                    let applied: i64 = row.get(2)?;
                    Ok(PeerState {
                        acked_version: acked.map(|v| v as Version),
                        peer_version: peer_version.unwrap_or(0) as Version,
                        applied_version: applied as Version,
                    })
                },
            )
            .optional()
            .map_err(bookkeeping_err)?;
        Ok(state)
    }

    fn save_acknowledgment(
        &mut self,
        peer: StoreId,
        acked_version: Version,
        peer_version: Version,
    ) -> Result<(), SyncError> {
        self.conn
            .execute(
                "INSERT INTO __sync_anchors (store_id, acked_version, peer_version, applied_version)
                 VALUES (?1, ?2, ?3, 0)
                 ON CONFLICT(store_id) DO UPDATE SET
                     acked_version = MAX(COALESCE(acked_version, 0), excluded.acked_version),
                     peer_version = MAX(COALESCE(peer_version, 0), excluded.peer_version)",
                params![
                    peer.to_string(),
                    acked_version as i64,
                    peer_version as i64
                ],
            )
            .map_err(bookkeeping_err)?;
        Ok(())
    }

    fn record_applied(&mut self, peer: StoreId, source_version: Version) -> Result<(), SyncError> {
        self.conn
            .execute(
                "INSERT INTO __sync_anchors (store_id, applied_version) VALUES (?1, ?2)
                 ON CONFLICT(store_id) DO UPDATE SET
                     applied_version = MAX(applied_version, excluded.applied_version)",
                params![peer.to_string(), source_version as i64],
            )
            .map_err(bookkeeping_err)?;
        Ok(())
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if self.tx_open {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}
