//! Reconciliation service for the shared expense collection.
//!
//! Reads decide between the local store and the remote by comparing a
//! locally filtered count against the remote's authoritative count for the
//! same query: matching counts trust the local set, anything else refreshes
//! from the remote wholesale. Comparing counts instead of a freshness stamp
//! catches remote deletions that a purely additive cache would never see.
//!
//! Writes go remote-first. The local store and every derived cache change
//! only after the remote accepts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::clock::Clock;
use crate::context::SessionContext;
use crate::domain::{Expense, ExpenseKind, RecordStatus, StatKind, TagScope};
use crate::memo::{memo_key, Debouncer, MemoCache};
use crate::reconcile::{month_window, year_of, LookupService, ReceiptCache, StatsService, TagsService};
use crate::remote::{DynExpenseRemote, ExpenseQuery};
use crate::store::engine::{Database, LocalStore};
use crate::store::schema::{IndexName, StoreKey, StoreName};
use crate::{Error, Result};

const DEFAULT_PAGE_MONTHS: u32 = 3;
const COUNT_MEMO_WINDOW: Duration = Duration::from_secs(3 * 60);
const LIST_MEMO_WINDOW: Duration = Duration::from_secs(2);
const DETAIL_MEMO_WINDOW: Duration = Duration::from_secs(10);
const WRITE_MEMO_WINDOW: Duration = Duration::from_secs(5);
const DETAIL_DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

enum WriteOp {
    Create,
    Update,
}

pub struct ExpenseService {
    db: LocalStore<Expense>,
    remote: Arc<DynExpenseRemote>,
    lookups: Arc<LookupService>,
    tags: Arc<TagsService>,
    stats: Arc<StatsService>,
    receipts: Arc<ReceiptCache>,
    ctx: Arc<SessionContext>,
    clock: Arc<dyn Clock>,
    count_memo: MemoCache<u64>,
    list_memo: MemoCache<Vec<Expense>>,
    detail_memo: MemoCache<Expense>,
    write_memo: MemoCache<Expense>,
    detail_debounce: Debouncer<Expense>,
}

impl ExpenseService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        remote: Arc<DynExpenseRemote>,
        lookups: Arc<LookupService>,
        tags: Arc<TagsService>,
        stats: Arc<StatsService>,
        receipts: Arc<ReceiptCache>,
        ctx: Arc<SessionContext>,
    ) -> Result<Self> {
        let clock = db.clock();
        Ok(Self {
            db: LocalStore::new(db, StoreName::Expenses)?,
            remote,
            lookups,
            tags,
            stats,
            receipts,
            ctx,
            count_memo: MemoCache::new(COUNT_MEMO_WINDOW, clock.clone()),
            list_memo: MemoCache::new(LIST_MEMO_WINDOW, clock.clone()),
            detail_memo: MemoCache::new(DETAIL_MEMO_WINDOW, clock.clone()),
            write_memo: MemoCache::new(WRITE_MEMO_WINDOW, clock.clone()),
            detail_debounce: Debouncer::new(DETAIL_DEBOUNCE_WINDOW),
            clock,
        })
    }

    /// Lists expenses for a trailing month window, preferring the local
    /// store when its filtered count matches the remote's.
    pub async fn get_expense_list(
        &self,
        page_no: u32,
        status: RecordStatus,
        page_months: Option<u32>,
        kind: Option<ExpenseKind>,
    ) -> Result<Vec<Expense>> {
        let query = ExpenseQuery {
            page_no: page_no.max(1),
            status,
            page_months: page_months.unwrap_or(DEFAULT_PAGE_MONTHS),
            belongs_to: kind,
        };
        let key = memo_key(&query);
        self.list_memo
            .get_or_fetch(&key, || self.load_expense_list(&query))
            .await
    }

    async fn load_expense_list(&self, query: &ExpenseQuery) -> Result<Vec<Expense>> {
        let status_key = StoreKey::text(query.status.as_str());
        let (local, remote_count) = futures::try_join!(
            self.db.get_all_by_index(IndexName::ItemStatus, Some(&status_key)),
            self.remote_count(query),
        )?;

        let (range_start, range_end) =
            month_window(self.clock.now_millis(), query.page_no, query.page_months);
        let filtered: Vec<Expense> = local
            .into_iter()
            .filter(|expense| Self::in_window(expense, range_start, range_end, query.belongs_to))
            .collect();

        if filtered.len() as u64 == remote_count {
            debug!(
                "expense list answered locally, {} records match the remote count",
                remote_count
            );
            return Ok(filtered);
        }

        info!(
            "expense list reconciling, local {} vs remote {}",
            filtered.len(),
            remote_count
        );
        let listed = self.remote.list(query).await?;
        let mut transformed = Vec::with_capacity(listed.len());
        for expense in listed {
            transformed.push(self.write_back(expense).await?);
        }
        Ok(transformed)
    }

    async fn remote_count(&self, query: &ExpenseQuery) -> Result<u64> {
        let key = memo_key(query);
        self.count_memo
            .get_or_fetch(&key, || async move { self.remote.count(query).await })
            .await
    }

    fn in_window(expense: &Expense, start: i64, end: i64, kind: Option<ExpenseKind>) -> bool {
        if let Some(kind) = kind {
            if expense.kind() != kind {
                return false;
            }
        }
        if matches!(expense, Expense::Purchase(_)) {
            let date = expense.event_date();
            if date >= start && date < end {
                return true;
            }
        }
        let updated = expense.audit().updated_on;
        updated >= start && updated < end
    }

    /// Single-record read, debounced against render-storm repetition and
    /// memoized for a few seconds on top.
    pub async fn get_one(&self, id: &str) -> Result<Expense> {
        if id.is_empty() {
            return Err(Error::InvalidKey("expense id is empty".into()));
        }
        self.detail_debounce
            .call(id, || {
                self.detail_memo
                    .get_or_fetch(id, || self.load_one(id))
            })
            .await
    }

    async fn load_one(&self, id: &str) -> Result<Expense> {
        if let Some(found) = self.db.get(&StoreKey::text(id)).await? {
            if Self::detail_complete(&found) {
                return Ok(found);
            }
        }
        let fetched = self.remote.get_one(id).await?;
        self.write_back(fetched).await
    }

    fn detail_complete(expense: &Expense) -> bool {
        match expense {
            // List payloads omit the item breakdown; a purchase cached
            // without one must be refetched for the detail view.
            Expense::Purchase(p) => !p.items.is_empty(),
            Expense::Income(_) | Expense::Refund(_) => true,
        }
    }

    pub async fn add(&self, expense: &Expense) -> Result<Expense> {
        let key = memo_key(&("add", expense));
        self.write_memo
            .get_or_fetch(&key, || self.save(expense, WriteOp::Create))
            .await
    }

    pub async fn update(&self, expense: &Expense) -> Result<Expense> {
        let key = memo_key(&("update", expense));
        self.write_memo
            .get_or_fetch(&key, || self.save(expense, WriteOp::Update))
            .await
    }

    async fn save(&self, expense: &Expense, op: WriteOp) -> Result<Expense> {
        let mut outgoing = expense.clone();
        self.lookups.resolve_names(&mut outgoing).await?;
        outgoing.audit_mut().updated_by = Some(self.ctx.user_id().to_string());

        let saved = match op {
            WriteOp::Create => self.remote.create(&outgoing).await?,
            WriteOp::Update => self.remote.update(&outgoing).await?,
        };

        // Cached previews move to the ids the remote assigned.
        let submitted: HashMap<&str, &crate::domain::ReceiptRef> = expense
            .receipts()
            .iter()
            .map(|rct| (rct.name.as_str(), rct))
            .collect();
        for fresh in saved.receipts() {
            if let Some(old) = submitted.get(fresh.name.as_str()) {
                self.receipts.rekey(old, fresh).await?;
            }
        }

        // Previews for receipts this save dropped are released now.
        if let Some(existing) = self.db.get(&StoreKey::text(saved.id())).await? {
            let kept: HashSet<&str> = saved.receipts().iter().map(|rct| rct.name.as_str()).collect();
            for stale in existing.receipts() {
                if !kept.contains(stale.name.as_str()) {
                    self.receipts.remove(&stale.id).await?;
                }
            }
        }

        let stored = self.write_back(saved).await?;
        self.invalidate_after_write(&stored).await;
        Ok(stored)
    }

    pub async fn remove(&self, id: &str) -> Result<Expense> {
        let key = memo_key(&("remove", id));
        self.write_memo
            .get_or_fetch(&key, || async move {
                let removed = self.remote.delete(id).await?;
                let stored = self.write_back(removed).await?;
                for receipt in stored.receipts() {
                    self.receipts.remove(&receipt.id).await?;
                }
                self.invalidate_after_write(&stored).await;
                Ok(stored)
            })
            .await
    }

    /// Transforms a remote record and upserts it locally: display names
    /// resolved, receipt references claimed by their parent, tag sets folded
    /// into the tag store.
    async fn write_back(&self, mut expense: Expense) -> Result<Expense> {
        self.lookups.resolve_names(&mut expense).await?;
        let id = expense.id().to_string();
        for receipt in expense.receipts_mut() {
            receipt.relation_id = id.clone();
        }
        self.tags
            .update_tags(TagScope::for_expense(expense.kind()), expense.all_tags())
            .await?;
        self.db.add_or_update(&expense).await?;
        Ok(expense)
    }

    /// Drops every read memo for this domain, ahead of natural expiry.
    pub async fn invalidate_reads(&self) {
        self.list_memo.invalidate().await;
        self.count_memo.invalidate().await;
        self.detail_memo.invalidate().await;
        self.detail_debounce.invalidate().await;
    }

    /// Derived caches are invalidated explicitly, not through a dependency
    /// graph: the write path names what it dirties.
    async fn invalidate_after_write(&self, expense: &Expense) {
        self.invalidate_reads().await;
        let kind = match expense.kind() {
            ExpenseKind::Purchase => StatKind::Purchase,
            ExpenseKind::Income => StatKind::Income,
            ExpenseKind::Refund => StatKind::Refund,
        };
        let year = year_of(expense.event_date());
        if let Err(e) = self.stats.clear(kind, Some(year)).await {
            warn!("stats cache clear failed after write: {}", e);
        }
    }
}
