//! Journal of remote endpoint calls.
//!
//! Lets services answer "was this endpoint called recently, and how big was
//! the response" without refetching — chiefly to avoid hammering an endpoint
//! whose last answer was an empty collection, where an empty local store is
//! indistinguishable from a cold one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::clock::Clock;
use crate::domain::CallLogEntry;
use crate::store::engine::{Database, LocalStore};
use crate::store::schema::{StoreKey, StoreName};
use crate::Result;

/// Conditions a logged call must meet to count as "already called".
#[derive(Debug, Clone, Default)]
pub struct CallCriteria {
    /// Only accept calls at most this old.
    pub within: Option<Duration>,
    /// Only accept calls whose response had exactly this many records.
    pub list_size: Option<u64>,
    /// Only accept calls whose response had at least this many records.
    pub min_size: Option<u64>,
}

pub type QueryParams = BTreeMap<String, Vec<String>>;

pub struct RemoteCallLog {
    db: LocalStore<CallLogEntry>,
    clock: Arc<dyn Clock>,
}

impl RemoteCallLog {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let clock = db.clock();
        Ok(Self {
            db: LocalStore::new(db, StoreName::Config)?,
            clock,
        })
    }

    fn entry_id(endpoint: &str, params: &QueryParams) -> String {
        format!(
            "{}_{}",
            endpoint,
            serde_json::to_string(params).unwrap_or_default()
        )
    }

    /// Records a completed call and its response list size.
    pub async fn record(&self, endpoint: &str, params: &QueryParams, list_size: u64) -> Result<()> {
        debug!(
            "logging remote call to [{}], response size {}",
            endpoint, list_size
        );
        let entry = CallLogEntry {
            id: Self::entry_id(endpoint, params),
            belongs_to: endpoint.to_string(),
            query_params: params.clone(),
            response_list_size: list_size,
            called_on: self.clock.now_millis(),
        };
        self.db.add_or_update(&entry).await
    }

    /// Whether a logged call for the endpoint and params matches the criteria.
    pub async fn was_called(
        &self,
        criteria: &CallCriteria,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<bool> {
        let key = StoreKey::text(Self::entry_id(endpoint, params));
        let Some(entry) = self.db.get(&key).await? else {
            return Ok(false);
        };
        if let Some(within) = criteria.within {
            let age = self.clock.now_millis() - entry.called_on;
            if age > within.as_millis() as i64 {
                return Ok(false);
            }
        }
        if let Some(size) = criteria.list_size {
            if entry.response_list_size != size {
                return Ok(false);
            }
        }
        if let Some(min) = criteria.min_size {
            if entry.response_list_size < min {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn params(year: &str) -> QueryParams {
        let mut p = QueryParams::new();
        p.insert("year".to_string(), vec![year.to_string()]);
        p
    }

    #[tokio::test]
    async fn test_unlogged_call_is_not_found() {
        let log = RemoteCallLog::new(Database::in_memory(ManualClock::new(0))).unwrap();
        let hit = log
            .was_called(&CallCriteria::default(), "/expenses/tags", &params("2024"))
            .await
            .unwrap();
        assert!(!hit);
    }

    #[tokio::test]
    async fn test_criteria_matching() {
        let clock = ManualClock::new(0);
        let log = RemoteCallLog::new(Database::in_memory(clock.clone())).unwrap();
        log.record("/expenses/tags", &params("2024"), 0).await.unwrap();

        let empty_within_hour = CallCriteria {
            within: Some(Duration::from_secs(3600)),
            list_size: Some(0),
            min_size: None,
        };
        assert!(log
            .was_called(&empty_within_hour, "/expenses/tags", &params("2024"))
            .await
            .unwrap());

        // Different params miss.
        assert!(!log
            .was_called(&empty_within_hour, "/expenses/tags", &params("2023"))
            .await
            .unwrap());

        // Size mismatch misses.
        let wants_results = CallCriteria {
            within: None,
            list_size: None,
            min_size: Some(1),
        };
        assert!(!log
            .was_called(&wants_results, "/expenses/tags", &params("2024"))
            .await
            .unwrap());

        // Stale misses.
        clock.advance(2 * 3600 * 1000);
        assert!(!log
            .was_called(&empty_within_hour, "/expenses/tags", &params("2024"))
            .await
            .unwrap());
    }
}
