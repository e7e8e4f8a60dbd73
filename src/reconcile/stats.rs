//! Derived year statistics, cached per (kind, year).

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use uuid::Uuid;

use crate::domain::{StatKind, StatsRecord};
use crate::memo::{memo_key, MemoCache};
use crate::remote::StatsRemote;
use crate::store::engine::{Database, LocalStore};
use crate::store::schema::{IndexName, KeyValue, StoreKey, StoreName};
use crate::Result;

const STATS_MEMO_WINDOW: Duration = Duration::from_secs(30);

pub struct StatsService {
    db: LocalStore<StatsRecord>,
    remote: Arc<dyn StatsRemote>,
    memo: MemoCache<StatsRecord>,
}

impl StatsService {
    pub fn new(db: Arc<Database>, remote: Arc<dyn StatsRemote>) -> Result<Self> {
        let clock = db.clock();
        Ok(Self {
            db: LocalStore::new(db, StoreName::Statistics)?,
            remote,
            memo: MemoCache::new(STATS_MEMO_WINDOW, clock),
        })
    }

    /// Returns the cached statistics row for the kind and year, fetching from
    /// the remote when the local store has no single matching row.
    pub async fn get(&self, kind: StatKind, year: i64) -> Result<StatsRecord> {
        let key = memo_key(&(kind.as_str(), year));
        self.memo
            .get_or_fetch(&key, || async move {
                let index_key =
                    StoreKey::composite([KeyValue::Text(kind.as_str().into()), KeyValue::Stamp(year)]);
                let mut rows = self
                    .db
                    .get_all_by_index(IndexName::BelongsTo, Some(&index_key))
                    .await?;
                if rows.len() == 1 {
                    return Ok(rows.remove(0));
                }

                let summary = self.remote.fetch(kind, year).await?;
                let record = StatsRecord {
                    id: Uuid::new_v4().to_string(),
                    belongs_to: kind,
                    year: summary.year,
                    total: summary.total,
                    count: summary.count,
                    by_month: summary.by_month,
                };
                self.db.add(&record).await?;
                Ok(record)
            })
            .await
    }

    /// Drops the memoized and stored rows for a kind, optionally narrowed to
    /// one year. The purchase-minus-refund aggregate has no rows of its own.
    pub async fn clear(&self, kind: StatKind, year: Option<i64>) -> Result<()> {
        if kind == StatKind::PurchaseMinusRefund {
            return Ok(());
        }
        self.memo.invalidate().await;
        let rows = self.db.get_all_by_index(IndexName::BelongsTo, None).await?;
        for row in rows {
            if row.belongs_to == kind && year.map_or(true, |y| y == row.year) {
                debug!("clearing cached stats row [{}] for {}", row.id, kind.as_str());
                self.db.delete(&StoreKey::text(&row.id)).await?;
            }
        }
        Ok(())
    }
}
