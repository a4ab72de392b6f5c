//! Change Model
//!
//! The row mutations exchanged between peers: typed cell values, single
//! row changes, and the change-set that travels as one atomic unit.

use crate::domain::anchor::SyncAnchor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The semantic kind of a row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    /// A new row
    Insert,
    /// An existing row's non-key columns changed
    Update,
    /// A row was removed
    Delete,
}

impl ChangeType {
    /// Short operation code, for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "I",
            Self::Update => "U",
            Self::Delete => "D",
        }
    }
}

/// A typed cell value.
///
/// `Null` is an explicit value; a column absent from a [`SyncItem`]'s map
/// is a different statement ("not carried") than a column mapped to `Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

/// A single row mutation within a change-set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    /// Logical name of the table the row belongs to
    pub table: String,
    /// Kind of mutation
    pub change_type: ChangeType,
    /// Column values; at minimum the primary key, plus all non-key
    /// columns for Insert/Update
    pub values: BTreeMap<String, Value>,
}

impl SyncItem {
    /// Create an item from an iterator of column/value pairs.
    pub fn new(
        table: impl Into<String>,
        change_type: ChangeType,
        values: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        Self {
            table: table.into(),
            change_type,
            values: values.into_iter().collect(),
        }
    }

    /// Value carried for a column, if any.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }
}

/// The atomic unit exchanged between peers.
///
/// `source_anchor` names the producing store and its version at assembly
/// time; `target_anchor` names the receiving store and the version of the
/// receiver recorded at its last acknowledged apply. The delta covers the
/// open interval `(acked source version, source_anchor.version]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncChangeSet {
    /// Producing store and its current version
    pub source_anchor: SyncAnchor,
    /// Receiving store and its last returned apply anchor version
    pub target_anchor: SyncAnchor,
    /// Row mutations, grouped by table
    pub items: Vec<SyncItem>,
    /// CRC32 over the encoded items, for transport integrity
    pub checksum: u32,
}

impl SyncChangeSet {
    /// Create a change-set, sealing it with its checksum.
    pub fn new(source_anchor: SyncAnchor, target_anchor: SyncAnchor, items: Vec<SyncItem>) -> Self {
        let checksum = Self::compute_checksum(&items);
        Self {
            source_anchor,
            target_anchor,
            items,
            checksum,
        }
    }

    /// Verify the checksum against the items actually carried.
    pub fn verify(&self) -> bool {
        self.checksum == Self::compute_checksum(&self.items)
    }

    /// Number of items carried.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the set carries no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn compute_checksum(items: &[SyncItem]) -> u32 {
        let bytes = bincode::serialize(items).unwrap_or_default();
        crc32fast::hash(&bytes)
    }
}
