//! SQLite Provisioning
//!
//! SQLite has no native change tracking, so provisioning builds one: a
//! store-wide version counter, a shadow table per tracked table, and
//! AFTER triggers that bump the counter and upsert the shadow row on
//! every mutation. The whole pass is idempotent; user tables must exist
//! before it runs.

use crate::adapters::sqlite::schema::{quote_ident, trigger_name, TableSchema};
use crate::config::TableConfig;
use crate::domain::anchor::StoreId;
use crate::error::SyncError;
use rusqlite::{params, Connection};

const BOOKKEEPING_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS __sync_identity (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    store_id TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS __sync_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);
INSERT INTO __sync_state (id, version) VALUES (1, 0) ON CONFLICT(id) DO NOTHING;
CREATE TABLE IF NOT EXISTS __sync_anchors (
    store_id TEXT PRIMARY KEY,
    acked_version INTEGER,
    peer_version INTEGER,
    applied_version INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS __sync_tables (
    name TEXT PRIMARY KEY,
    min_valid INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS __sync_context (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    origin TEXT
);
INSERT INTO __sync_context (id, origin) VALUES (1, NULL) ON CONFLICT(id) DO NOTHING;
"#;

/// Provision the store: bookkeeping tables, a durable store id, and
/// change tracking for every configured table.
pub(crate) fn provision(conn: &Connection, tables: &[TableConfig]) -> Result<StoreId, SyncError> {
    // WAL keeps readers on a stable snapshot while a writer proceeds.
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(BOOKKEEPING_DDL)?;
    tx.execute(
        "INSERT INTO __sync_identity (id, store_id) VALUES (1, ?1)
         ON CONFLICT(id) DO NOTHING",
        params![StoreId::generate().to_string()],
    )?;

    for table in tables {
        let schema = TableSchema::load(&tx, table)?;
        tx.execute(
            "INSERT INTO __sync_tables (name, min_valid) VALUES (?1, 0)
             ON CONFLICT(name) DO NOTHING",
            params![table.name],
        )?;
        tx.execute_batch(&track_table_ddl(&schema))?;
        tx.execute_batch(&trigger_ddl(&schema))?;
    }

    let raw: String = tx.query_row("SELECT store_id FROM __sync_identity WHERE id = 1", [], |r| {
        r.get(0)
    })?;
    tx.commit()?;

    let store_id = StoreId::parse(&raw)
        .map_err(|e| SyncError::store(anyhow::anyhow!("stored identity is corrupt: {e}")))?;
    tracing::info!("store provisioned: id={} tables={}", store_id, tables.len());
    Ok(store_id)
}

/// Drop the triggers, shadow tables, and bookkeeping state. User tables
/// and their rows are untouched.
pub(crate) fn deprovision(conn: &Connection, tables: &[TableConfig]) -> Result<(), SyncError> {
    let tx = conn.unchecked_transaction()?;
    for table in tables {
        let prefix = table
            .schema
            .as_deref()
            .map(|s| format!("{}.", quote_ident(s)))
            .unwrap_or_default();
        for kind in ["ai", "au", "ad"] {
            tx.execute_batch(&format!(
                "DROP TRIGGER IF EXISTS {prefix}{};",
                quote_ident(&trigger_name(kind, &table.name))
            ))?;
        }
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {prefix}{};",
            quote_ident(&super::schema::track_table_name(&table.name))
        ))?;
    }
    tx.execute_batch(
        "DROP TABLE IF EXISTS __sync_anchors;
         DROP TABLE IF EXISTS __sync_tables;
         DROP TABLE IF EXISTS __sync_context;
         DROP TABLE IF EXISTS __sync_state;
         DROP TABLE IF EXISTS __sync_identity;",
    )?;
    tx.commit()?;
    tracing::info!("store provisioning removed: tables={}", tables.len());
    Ok(())
}

fn track_table_ddl(schema: &TableSchema) -> String {
    let pk_defs: Vec<String> = schema
        .pk_columns()
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.decl_type))
        .collect();
    let pk_names: Vec<String> = schema
        .pk_columns()
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {track} (
            {pk_defs},
            row_version INTEGER NOT NULL,
            created_version INTEGER NOT NULL,
            tombstone INTEGER NOT NULL DEFAULT 0,
            origin TEXT,
            PRIMARY KEY ({pk_names})
        );",
        track = schema.track_qualified,
        pk_defs = pk_defs.join(",\n            "),
        pk_names = pk_names.join(", "),
    )
}

/// The three tracking triggers for one table.
///
/// `created_version` records when a row entered the table: inserts stamp
/// the current version (a re-insert over a tombstone restamps it); a row
/// first seen through an update keeps 0, marking it as predating
/// provisioning so it travels as an Update, not an Insert.
fn trigger_ddl(schema: &TableSchema) -> String {
    let prefix = schema.prefix.clone();
    let table_ident = quote_ident(&schema.logical_name);
    let track = quote_ident(&super::schema::track_table_name(&schema.logical_name));
    let pk_names: Vec<String> = schema
        .pk_columns()
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect();
    let pk_list = pk_names.join(", ");
    let new_pks: Vec<String> = pk_names.iter().map(|c| format!("NEW.{c}")).collect();
    let old_pks: Vec<String> = pk_names.iter().map(|c| format!("OLD.{c}")).collect();

    let bump = "UPDATE __sync_state SET version = version + 1 WHERE id = 1;";
    let version = "(SELECT version FROM __sync_state WHERE id = 1)";
    let origin = "(SELECT origin FROM __sync_context WHERE id = 1)";

    let insert_trigger = format!(
        "CREATE TRIGGER IF NOT EXISTS {prefix}{name} AFTER INSERT ON {table_ident}
FOR EACH ROW BEGIN
    {bump}
    INSERT INTO {track} ({pk_list}, row_version, created_version, tombstone, origin)
    VALUES ({new_pks}, {version}, {version}, 0, {origin})
    ON CONFLICT ({pk_list}) DO UPDATE SET
        row_version = excluded.row_version,
        created_version = excluded.created_version,
        tombstone = 0,
        origin = excluded.origin;
END;",
        name = quote_ident(&trigger_name("ai", &schema.logical_name)),
        new_pks = new_pks.join(", "),
    );

    let update_trigger = format!(
        "CREATE TRIGGER IF NOT EXISTS {prefix}{name} AFTER UPDATE ON {table_ident}
FOR EACH ROW BEGIN
    {bump}
    INSERT INTO {track} ({pk_list}, row_version, created_version, tombstone, origin)
    VALUES ({new_pks}, {version}, 0, 0, {origin})
    ON CONFLICT ({pk_list}) DO UPDATE SET
        row_version = excluded.row_version,
        tombstone = 0,
        origin = excluded.origin;
END;",
        name = quote_ident(&trigger_name("au", &schema.logical_name)),
        new_pks = new_pks.join(", "),
    );

    let delete_trigger = format!(
        "CREATE TRIGGER IF NOT EXISTS {prefix}{name} AFTER DELETE ON {table_ident}
FOR EACH ROW BEGIN
    {bump}
    INSERT INTO {track} ({pk_list}, row_version, created_version, tombstone, origin)
    VALUES ({old_pks}, {version}, 0, 1, {origin})
    ON CONFLICT ({pk_list}) DO UPDATE SET
        row_version = excluded.row_version,
        tombstone = 1,
        origin = excluded.origin;
END;",
        name = quote_ident(&trigger_name("ad", &schema.logical_name)),
        old_pks = old_pks.join(", "),
    );

    format!("{insert_trigger}\n{update_trigger}\n{delete_trigger}")
}
