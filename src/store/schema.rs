//! Static schema registry for the local stores.
//!
//! Each named store is described by a primary key path, an expiry duration
//! and a set of named secondary indexes. The registry is the fixed, versioned
//! contract of this layer; changing a key path or adding an index is a
//! migration handled by storage initialization, not here.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::{Error, Result};

/// Named local stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreName {
    Expenses,
    Config,
    ReceiptFiles,
    Tags,
    Statistics,
}

impl StoreName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreName::Expenses => "expense-items-store",
            StoreName::Config => "config-store",
            StoreName::ReceiptFiles => "receipt-file-store",
            StoreName::Tags => "tags-store",
            StoreName::Statistics => "statistics-store",
        }
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named secondary indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexName {
    BelongsTo,
    ItemStatus,
    AuditUpdatedOn,
    ReceiptUrl,
    /// Reserved on every store, keyed on the envelope's `updatedOn`. Used
    /// solely by the expiry sweep and not queryable through the public index
    /// operations.
    CacheUpdatedOn,
}

impl IndexName {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexName::BelongsTo => "belongsTo-index",
            IndexName::ItemStatus => "item-status-index",
            IndexName::AuditUpdatedOn => "audit-updatedOn-index",
            IndexName::ReceiptUrl => "receipt-url-index",
            IndexName::CacheUpdatedOn => "cache-updatedOn-index",
        }
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field path a store key or index key is read from. Dotted segments descend
/// into sub-documents, e.g. `auditDetails.updatedOn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPath {
    Single(&'static str),
    Composite(&'static [&'static str]),
}

/// One ordered part of a store or index key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    Text(String),
    Stamp(i64),
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        KeyValue::Text(s.to_string())
    }
}

impl From<i64> for KeyValue {
    fn from(n: i64) -> Self {
        KeyValue::Stamp(n)
    }
}

/// A concrete key, scalar or composite, matching a [`KeyPath`] shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreKey {
    Single(KeyValue),
    Composite(Vec<KeyValue>),
}

impl StoreKey {
    pub fn text(value: impl Into<String>) -> Self {
        StoreKey::Single(KeyValue::Text(value.into()))
    }

    pub fn composite<I>(parts: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<KeyValue>,
    {
        StoreKey::Composite(parts.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKey::Single(KeyValue::Text(s)) => f.write_str(s),
            StoreKey::Single(KeyValue::Stamp(n)) => write!(f, "{}", n),
            StoreKey::Composite(parts) => {
                let rendered: Vec<String> = parts
                    .iter()
                    .map(|p| match p {
                        KeyValue::Text(s) => s.clone(),
                        KeyValue::Stamp(n) => n.to_string(),
                    })
                    .collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

/// A named secondary index definition.
#[derive(Debug, Clone, Copy)]
pub struct IndexDef {
    pub name: IndexName,
    pub key_path: KeyPath,
}

/// Schema of one named store.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub name: StoreName,
    pub key_path: KeyPath,
    pub expiry: Duration,
    pub indexes: &'static [IndexDef],
}

impl StoreConfig {
    /// Looks up a declared index; the reserved expiry index is deliberately
    /// absent from every store's declared set.
    pub fn index(&self, name: IndexName) -> Result<&IndexDef> {
        self.indexes
            .iter()
            .find(|idx| idx.name == name)
            .ok_or(Error::UnknownIndex {
                store: self.name,
                index: name,
            })
    }
}

const HOUR: u64 = 60 * 60;

static STORES: &[StoreConfig] = &[
    StoreConfig {
        name: StoreName::Expenses,
        key_path: KeyPath::Single("id"),
        expiry: Duration::from_secs(6 * HOUR),
        indexes: &[
            IndexDef {
                name: IndexName::AuditUpdatedOn,
                key_path: KeyPath::Single("auditDetails.updatedOn"),
            },
            IndexDef {
                name: IndexName::ItemStatus,
                key_path: KeyPath::Single("status"),
            },
        ],
    },
    StoreConfig {
        name: StoreName::Config,
        key_path: KeyPath::Single("id"),
        expiry: Duration::from_secs(6 * HOUR),
        indexes: &[
            IndexDef {
                name: IndexName::BelongsTo,
                key_path: KeyPath::Single("belongsTo"),
            },
            IndexDef {
                name: IndexName::ItemStatus,
                key_path: KeyPath::Composite(&["belongsTo", "status"]),
            },
            IndexDef {
                name: IndexName::AuditUpdatedOn,
                key_path: KeyPath::Composite(&["belongsTo", "auditDetails.updatedOn"]),
            },
        ],
    },
    StoreConfig {
        name: StoreName::ReceiptFiles,
        key_path: KeyPath::Single("id"),
        expiry: Duration::from_secs(6 * HOUR),
        indexes: &[IndexDef {
            name: IndexName::ReceiptUrl,
            key_path: KeyPath::Single("url"),
        }],
    },
    StoreConfig {
        name: StoreName::Tags,
        key_path: KeyPath::Composite(&["belongsTo", "value"]),
        expiry: Duration::from_secs(30 * 24 * HOUR),
        indexes: &[IndexDef {
            name: IndexName::BelongsTo,
            key_path: KeyPath::Single("belongsTo"),
        }],
    },
    StoreConfig {
        name: StoreName::Statistics,
        key_path: KeyPath::Single("id"),
        expiry: Duration::from_secs(10 * HOUR),
        indexes: &[IndexDef {
            name: IndexName::BelongsTo,
            key_path: KeyPath::Composite(&["belongsTo", "year"]),
        }],
    },
];

/// Looks up the schema for a named store. Failing here is a configuration
/// error and non-recoverable; services call this at construction time.
pub fn config_for(name: StoreName) -> Result<&'static StoreConfig> {
    STORES
        .iter()
        .find(|cfg| cfg.name == name)
        .ok_or(Error::UnsupportedStore(name))
}

fn lookup_field(value: &Value, path: &str) -> Option<KeyValue> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::String(s) => Some(KeyValue::Text(s.clone())),
        Value::Number(n) => n.as_i64().map(KeyValue::Stamp),
        _ => None,
    }
}

impl KeyPath {
    /// Reads this path out of a serialized record. `None` when any field is
    /// missing or not a keyable type.
    pub(crate) fn extract(&self, value: &Value) -> Option<StoreKey> {
        match self {
            KeyPath::Single(path) => lookup_field(value, path).map(StoreKey::Single),
            KeyPath::Composite(paths) => paths
                .iter()
                .map(|path| lookup_field(value, path))
                .collect::<Option<Vec<_>>>()
                .map(StoreKey::Composite),
        }
    }

    /// Whether a caller-supplied key has the shape this path requires:
    /// scalar for scalar, same-arity composite for composite.
    pub(crate) fn shape_matches(&self, key: &StoreKey) -> bool {
        match (self, key) {
            (KeyPath::Single(_), StoreKey::Single(_)) => true,
            (KeyPath::Composite(paths), StoreKey::Composite(parts)) => paths.len() == parts.len(),
            _ => false,
        }
    }
}
