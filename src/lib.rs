//! Ledger Cache is the local cache-coherence layer of a personal-finance ledger.
//!
//! It keeps a keyed local copy of remote collections (expenses, statistics,
//! tags, receipt files) and decides per read whether the local copy is
//! authoritative or must be reconciled against the remote source.
//!
//! ## Core Components
//! - [`store`]: The store engine (schema-described keyed collections with
//!   secondary indexes, read-triggered expiry and optional snapshot persistence).
//! - [`reconcile`]: Per-domain reconciliation services built on the store engine.
//! - [`memo`]: Short-lived call memoization and debouncing for service entry points.
//! - [`remote`]: Contracts for the remote source this cache is reconciled against.

pub mod clock;
pub mod context;
pub mod domain;
pub mod memo;
pub mod reconcile;
pub mod remote;
pub mod runtime;
pub mod store;

use thiserror::Error;

use crate::store::schema::{IndexName, StoreName};

/// Errors returned by the ledger cache.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested store name has no schema configuration. Raised at
    /// service construction and never retried.
    #[error("store is not supported: {0}")]
    UnsupportedStore(StoreName),
    /// The requested index is not declared in the store's schema.
    #[error("unknown index [{index}] for store [{store}]")]
    UnknownIndex { store: StoreName, index: IndexName },
    /// The given key's shape does not match the store's or index's key path.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// A value to be stored is missing a field required by its key path.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// A plain `add` hit an existing primary key.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    /// A remote call failed. Transient; the caller decides whether to retry
    /// or surface it.
    #[error("remote call failed: {0}")]
    Remote(String),
    /// An I/O error occurred during snapshot persistence.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized Result type for ledger cache operations.
pub type Result<T> = std::result::Result<T, Error>;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::SessionContext;
pub use memo::{Debouncer, MemoCache};
pub use runtime::CacheRuntime;
pub use store::engine::{Database, LocalStore};
pub use store::schema::{KeyValue, StoreKey};
