//! Cached tag sets, one per feature scope.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::domain::{TagEntry, TagScope};
use crate::reconcile::response_log::{CallCriteria, QueryParams, RemoteCallLog};
use crate::remote::TagsRemote;
use crate::store::engine::{Database, LocalStore};
use crate::store::schema::{IndexName, StoreKey, StoreName};
use crate::Result;

const EMPTY_ANSWER_VALID_FOR: Duration = Duration::from_secs(3600);

pub struct TagsService {
    db: LocalStore<TagEntry>,
    remote: Arc<dyn TagsRemote>,
    call_log: Arc<RemoteCallLog>,
}

impl TagsService {
    pub fn new(
        db: Arc<Database>,
        remote: Arc<dyn TagsRemote>,
        call_log: Arc<RemoteCallLog>,
    ) -> Result<Self> {
        Ok(Self {
            db: LocalStore::new(db, StoreName::Tags)?,
            remote,
            call_log,
        })
    }

    /// Upserts the given tags into the scope's cached set. Duplicates within
    /// the input collapse to one row via the composite (scope, value) key.
    pub async fn update_tags(
        &self,
        scope: TagScope,
        tags: impl IntoIterator<Item = String>,
    ) -> Result<()> {
        let unique: BTreeSet<String> = tags.into_iter().collect();
        debug!("updating [{}] tags for scope [{}]", unique.len(), scope.as_str());
        for tag in unique {
            self.db
                .add_or_update(&TagEntry {
                    belongs_to: scope,
                    value: tag,
                })
                .await?;
        }
        Ok(())
    }

    pub async fn get_tags(&self, scope: TagScope) -> Result<Vec<String>> {
        let key = StoreKey::text(scope.as_str());
        let entries = self
            .db
            .get_all_by_index(IndexName::BelongsTo, Some(&key))
            .await?;
        Ok(entries.into_iter().map(|entry| entry.value).collect())
    }

    pub async fn count(&self, scope: TagScope) -> Result<u64> {
        let key = StoreKey::text(scope.as_str());
        self.db.count_by_index(IndexName::BelongsTo, Some(&key)).await
    }

    /// Seeds the scope's tag set from the remote when the local set is empty.
    ///
    /// A recent remote answer of zero tags is trusted for an hour via the
    /// call log, so an account with no tags does not refetch on every read.
    pub async fn ensure_initialized(&self, scope: TagScope, years: &[i64]) -> Result<()> {
        if self.count(scope).await? > 0 {
            return Ok(());
        }

        let endpoint = format!("/expenses/{}/tags", scope.as_str());
        let mut params = QueryParams::new();
        params.insert(
            "year".to_string(),
            years.iter().map(|y| y.to_string()).collect(),
        );

        let known_empty = CallCriteria {
            within: Some(EMPTY_ANSWER_VALID_FOR),
            list_size: Some(0),
            min_size: None,
        };
        if self.call_log.was_called(&known_empty, &endpoint, &params).await? {
            return Ok(());
        }

        let tags = self.remote.list_tags(scope, years).await?;
        self.call_log
            .record(&endpoint, &params, tags.len() as u64)
            .await?;
        self.update_tags(scope, tags).await
    }
}
