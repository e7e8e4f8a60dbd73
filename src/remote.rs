//! Contracts for the remote source this cache reconciles against.
//!
//! The cache treats every call as opaque, with arbitrary latency and
//! potential failure. Timeout and retry policy belong to the transport
//! behind these traits, not here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
    ConfigEntry, ConfigKind, Expense, ExpenseKind, RecordStatus, StatKind, StatsSummary, TagScope,
};
use crate::Result;

/// Query parameters for paged, month-windowed expense listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseQuery {
    pub page_no: u32,
    pub status: RecordStatus,
    pub page_months: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub belongs_to: Option<ExpenseKind>,
}

/// Full create/read/update/delete contract of the remote source for one
/// domain collection.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    type Record: Send;
    type Query: Send + Sync;

    /// Lists records matching the query.
    async fn list(&self, query: &Self::Query) -> Result<Vec<Self::Record>>;
    /// Authoritative count of records matching the query.
    async fn count(&self, query: &Self::Query) -> Result<u64>;
    /// Fetches one record by id.
    async fn get_one(&self, id: &str) -> Result<Self::Record>;
    /// Creates a record; the returned record is the remote's canonical form.
    async fn create(&self, record: &Self::Record) -> Result<Self::Record>;
    /// Updates a record; the returned record is the remote's canonical form.
    async fn update(&self, record: &Self::Record) -> Result<Self::Record>;
    /// Deletes by id, returning the record in its deleted state.
    async fn delete(&self, id: &str) -> Result<Self::Record>;
}

pub type DynExpenseRemote = dyn RemoteSource<Record = Expense, Query = ExpenseQuery>;

/// Year statistics for one expense kind.
#[async_trait]
pub trait StatsRemote: Send + Sync {
    async fn fetch(&self, kind: StatKind, year: i64) -> Result<StatsSummary>;
}

/// Known tag values for a scope over a set of years.
#[async_trait]
pub trait TagsRemote: Send + Sync {
    async fn list_tags(&self, scope: TagScope, years: &[i64]) -> Result<Vec<String>>;
}

/// Configurable reference data (types, reasons, accounts).
#[async_trait]
pub trait ConfigRemote: Send + Sync {
    async fn list(&self, kind: ConfigKind, statuses: &[RecordStatus]) -> Result<Vec<ConfigEntry>>;
}

/// Binary receipt content.
#[async_trait]
pub trait ReceiptRemote: Send + Sync {
    async fn fetch_receipt(
        &self,
        kind: ExpenseKind,
        relation_id: &str,
        receipt_id: &str,
    ) -> Result<Vec<u8>>;
}

/// Owner of transient binary references — the object-URL analog.
///
/// References are single-writer-per-id: the caller must release the previous
/// reference for an id before storing a new one.
pub trait ResourceAllocator: Send + Sync {
    /// Materializes bytes into an addressable reference.
    fn allocate(&self, id: &str, bytes: &[u8]) -> String;
    /// Releases a reference. Must be called exactly once per allocation.
    fn release(&self, resource_ref: &str);
}
