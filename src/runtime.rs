//! Wiring and lifecycle for the cache layer.

use std::sync::Arc;

use log::info;

use crate::clock::Clock;
use crate::context::SessionContext;
use crate::reconcile::{
    ExpenseService, LookupService, ReceiptCache, RemoteCallLog, StatsService, TagsService,
};
use crate::remote::{ConfigRemote, DynExpenseRemote, ReceiptRemote, ResourceAllocator, StatsRemote, TagsRemote};
use crate::store::engine::Database;
use crate::store::persistence::Persistence;
use crate::Result;

/// The per-domain remote collaborators the cache reconciles against.
pub struct RemoteEndpoints {
    pub expenses: Arc<DynExpenseRemote>,
    pub stats: Arc<dyn StatsRemote>,
    pub tags: Arc<dyn TagsRemote>,
    pub config: Arc<dyn ConfigRemote>,
    pub receipts: Arc<dyn ReceiptRemote>,
}

/// Owns the database and the reconciliation services for one session.
///
/// Construct with [`CacheRuntime::init`] after sign-in and drop through
/// [`CacheRuntime::shutdown`], which drains pending snapshot writes.
pub struct CacheRuntime {
    db: Arc<Database>,
    pub expenses: Arc<ExpenseService>,
    pub stats: Arc<StatsService>,
    pub tags: Arc<TagsService>,
    pub receipts: Arc<ReceiptCache>,
    pub lookups: Arc<LookupService>,
}

impl CacheRuntime {
    pub async fn init(
        ctx: SessionContext,
        remotes: RemoteEndpoints,
        allocator: Arc<dyn ResourceAllocator>,
        persistence: Option<Arc<Persistence>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let db = Database::open(clock, persistence)?;

        let call_log = Arc::new(RemoteCallLog::new(db.clone())?);
        let lookups = Arc::new(LookupService::new(
            db.clone(),
            remotes.config,
            call_log.clone(),
        )?);
        let tags = Arc::new(TagsService::new(db.clone(), remotes.tags, call_log)?);
        let stats = Arc::new(StatsService::new(db.clone(), remotes.stats)?);
        let receipts = Arc::new(ReceiptCache::new(
            db.clone(),
            remotes.receipts,
            allocator,
        )?);

        // Transient references never survive a process, so the receipt
        // store starts empty.
        receipts.clear_at_startup().await?;

        let expenses = Arc::new(ExpenseService::new(
            db.clone(),
            remotes.expenses,
            lookups.clone(),
            tags.clone(),
            stats.clone(),
            receipts.clone(),
            Arc::new(ctx),
        )?);

        info!("cache runtime initialized");
        Ok(Self {
            db,
            expenses,
            stats,
            tags,
            receipts,
            lookups,
        })
    }

    /// Drains pending snapshot writes before the runtime goes away.
    pub async fn shutdown(self) {
        self.db.wait().await;
        info!("cache runtime shut down");
    }
}
