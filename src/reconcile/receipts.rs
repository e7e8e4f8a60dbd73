//! Transient resource cache for binary receipt previews.
//!
//! Each cached entry owns at most one allocator reference (the object-URL
//! analog). A reference is released exactly once: on removal, on expiry
//! sweep, or when a different reference supersedes it for the same id.
//! Re-keying an entry after a save carries the reference over untouched.

use std::sync::Arc;

use log::{debug, warn};

use crate::domain::{CachedReceipt, FetchStatus, ReceiptRef};
use crate::remote::{ReceiptRemote, ResourceAllocator};
use crate::store::engine::{Database, LocalStore};
use crate::store::schema::{StoreKey, StoreName};
use crate::{Error, Result};

pub struct ReceiptCache {
    db: LocalStore<CachedReceipt>,
    remote: Arc<dyn ReceiptRemote>,
    allocator: Arc<dyn ResourceAllocator>,
}

impl ReceiptCache {
    pub fn new(
        db: Arc<Database>,
        remote: Arc<dyn ReceiptRemote>,
        allocator: Arc<dyn ResourceAllocator>,
    ) -> Result<Self> {
        let hook_allocator = allocator.clone();
        let db = LocalStore::with_evict_hook(
            db,
            StoreName::ReceiptFiles,
            move |entry: &CachedReceipt| {
                if let (FetchStatus::Success, Some(url)) = (entry.status, entry.url.as_deref()) {
                    hook_allocator.release(url);
                }
            },
        )?;
        Ok(Self {
            db,
            remote,
            allocator,
        })
    }

    /// Empties the store. References cached by a previous process are dead
    /// anyway; live ones are released through the evict hook.
    pub async fn clear_at_startup(&self) -> Result<()> {
        debug!("clearing cached receipt resources");
        self.db.clear_all().await
    }

    pub async fn get(&self, id: &str) -> Result<Option<CachedReceipt>> {
        self.db.get(&StoreKey::text(id)).await
    }

    /// Stores freshly fetched bytes for a receipt. Any previous, different
    /// reference for the same id is released before the new entry is stored.
    pub async fn put(&self, receipt: &ReceiptRef, bytes: &[u8]) -> Result<CachedReceipt> {
        let existing = self.get(&receipt.id).await?;
        let url = self.allocator.allocate(&receipt.id, bytes);
        if let Some(existing) = existing {
            if let (FetchStatus::Success, Some(old)) = (existing.status, existing.url.as_deref()) {
                if old != url {
                    self.allocator.release(old);
                }
            }
        }
        let entry = CachedReceipt {
            id: receipt.id.clone(),
            relation_id: receipt.relation_id.clone(),
            belongs_to: receipt.belongs_to,
            status: FetchStatus::Success,
            url: Some(url),
            error: None,
        };
        self.db.add_or_update(&entry).await?;
        Ok(entry)
    }

    /// Moves a cached entry to the ids a save assigned, carrying the
    /// reference over without a release. `None` when nothing usable is
    /// cached under the old id.
    pub async fn rekey(
        &self,
        receipt: &ReceiptRef,
        renamed: &ReceiptRef,
    ) -> Result<Option<CachedReceipt>> {
        if renamed.belongs_to != receipt.belongs_to {
            return Err(Error::InvalidRecord(format!(
                "cannot change a receipt's kind from [{}] to [{}]",
                receipt.belongs_to, renamed.belongs_to
            )));
        }
        let Some(existing) = self.get(&receipt.id).await? else {
            return Ok(None);
        };
        if existing.status != FetchStatus::Success {
            return Ok(None);
        }
        let moved = CachedReceipt {
            id: renamed.id.clone(),
            relation_id: renamed.relation_id.clone(),
            ..existing
        };
        if renamed.id != receipt.id {
            self.db.delete(&StoreKey::text(&receipt.id)).await?;
        }
        self.db.add_or_update(&moved).await?;
        Ok(Some(moved))
    }

    /// Releases and removes the cached entry for a receipt id. Failed-fetch
    /// rows hold no reference and are left for the expiry sweep.
    pub async fn remove(&self, id: &str) -> Result<()> {
        if let Some(existing) = self.get(id).await? {
            if let (FetchStatus::Success, Some(url)) = (existing.status, existing.url.as_deref()) {
                self.allocator.release(url);
                self.db.delete(&StoreKey::text(id)).await?;
            }
        }
        Ok(())
    }

    /// Returns a usable entry per receipt, fetching bytes for misses.
    /// Per-item failures yield fail-status entries and store nothing.
    pub async fn download(&self, receipts: &[ReceiptRef]) -> Vec<CachedReceipt> {
        let downloads = receipts.iter().map(|receipt| self.download_one(receipt));
        futures::future::join_all(downloads).await
    }

    async fn download_one(&self, receipt: &ReceiptRef) -> CachedReceipt {
        match self.try_download(receipt).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("receipt [{}] download failed: {}", receipt.id, e);
                CachedReceipt {
                    id: receipt.id.clone(),
                    relation_id: receipt.relation_id.clone(),
                    belongs_to: receipt.belongs_to,
                    status: FetchStatus::Fail,
                    url: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn try_download(&self, receipt: &ReceiptRef) -> Result<CachedReceipt> {
        if let Some(existing) = self.get(&receipt.id).await? {
            if existing.status == FetchStatus::Success {
                return Ok(existing);
            }
        }
        let bytes = self
            .remote
            .fetch_receipt(receipt.belongs_to, &receipt.relation_id, &receipt.id)
            .await?;
        self.put(receipt, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::ExpenseKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingAllocator {
        next: AtomicUsize,
        released: Mutex<Vec<String>>,
    }

    impl CountingAllocator {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                next: AtomicUsize::new(0),
                released: Mutex::new(Vec::new()),
            })
        }

        fn released(&self) -> Vec<String> {
            self.released.lock().unwrap().clone()
        }
    }

    impl ResourceAllocator for CountingAllocator {
        fn allocate(&self, id: &str, _bytes: &[u8]) -> String {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            format!("blob:{}-{}", id, n)
        }

        fn release(&self, resource_ref: &str) {
            self.released.lock().unwrap().push(resource_ref.to_string());
        }
    }

    struct ByteRemote {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReceiptRemote for ByteRemote {
        async fn fetch_receipt(
            &self,
            _kind: ExpenseKind,
            _relation_id: &str,
            receipt_id: &str,
        ) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Remote("boom".into()));
            }
            Ok(receipt_id.as_bytes().to_vec())
        }
    }

    fn receipt(id: &str, relation: &str) -> ReceiptRef {
        ReceiptRef {
            id: id.to_string(),
            name: format!("{}.png", id),
            content_type: "image/png".to_string(),
            relation_id: relation.to_string(),
            belongs_to: ExpenseKind::Purchase,
        }
    }

    fn cache(
        clock: Arc<ManualClock>,
        fail: bool,
    ) -> (ReceiptCache, Arc<CountingAllocator>, Arc<ByteRemote>) {
        let db = Database::in_memory(clock);
        let allocator = CountingAllocator::new();
        let remote = Arc::new(ByteRemote {
            fail,
            calls: AtomicUsize::new(0),
        });
        (
            ReceiptCache::new(db, remote.clone(), allocator.clone()).unwrap(),
            allocator,
            remote,
        )
    }

    #[tokio::test]
    async fn test_supersede_releases_previous_reference_once() {
        let (cache, allocator, _) = cache(ManualClock::new(0), false);
        let rct = receipt("r1", "p1");

        let first = cache.put(&rct, b"one").await.unwrap();
        let second = cache.put(&rct, b"two").await.unwrap();
        assert_ne!(first.url, second.url);
        assert_eq!(allocator.released(), vec![first.url.clone().unwrap()]);

        // The second reference is still live.
        let cached = cache.get("r1").await.unwrap().unwrap();
        assert_eq!(cached.url, second.url);
    }

    #[tokio::test]
    async fn test_remove_releases_exactly_once() {
        let (cache, allocator, _) = cache(ManualClock::new(0), false);
        let rct = receipt("r1", "p1");
        let entry = cache.put(&rct, b"bytes").await.unwrap();

        cache.remove("r1").await.unwrap();
        cache.remove("r1").await.unwrap();
        assert_eq!(allocator.released(), vec![entry.url.unwrap()]);
        assert!(cache.get("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rekey_carries_reference_without_release() {
        let (cache, allocator, _) = cache(ManualClock::new(0), false);
        let old = receipt("tmp-1", "p1");
        let entry = cache.put(&old, b"bytes").await.unwrap();

        let new = receipt("srv-9", "p1");
        let moved = cache.rekey(&old, &new).await.unwrap().unwrap();
        assert_eq!(moved.url, entry.url);
        assert_eq!(moved.relation_id, "p1");
        assert!(allocator.released().is_empty());
        assert!(cache.get("tmp-1").await.unwrap().is_none());

        // The carried reference is still released exactly once at the end.
        cache.remove("srv-9").await.unwrap();
        assert_eq!(allocator.released(), vec![entry.url.unwrap()]);
    }

    #[tokio::test]
    async fn test_rekey_rejects_kind_change() {
        let (cache, _, _) = cache(ManualClock::new(0), false);
        let old = receipt("r1", "p1");
        cache.put(&old, b"bytes").await.unwrap();
        let mut new = receipt("r2", "p1");
        new.belongs_to = ExpenseKind::Income;
        assert!(matches!(
            cache.rekey(&old, &new).await,
            Err(Error::InvalidRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_expiry_sweep_releases_reference() {
        let clock = ManualClock::new(0);
        let (cache, allocator, _) = cache(clock.clone(), false);
        let entry = cache.put(&receipt("r1", "p1"), b"bytes").await.unwrap();

        clock.advance(7 * 60 * 60 * 1000);
        assert!(cache.get("r1").await.unwrap().is_none());
        assert_eq!(allocator.released(), vec![entry.url.unwrap()]);

        // Idempotent: further reads release nothing more.
        assert!(cache.get("r1").await.unwrap().is_none());
        assert_eq!(allocator.released().len(), 1);
    }

    #[tokio::test]
    async fn test_download_uses_cache_then_remote() {
        let (cache, _, remote) = cache(ManualClock::new(0), false);
        let rcts = [receipt("r1", "p1"), receipt("r2", "p1")];

        let first = cache.download(&rcts).await;
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|e| e.status == FetchStatus::Success));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 2);

        let second = cache.download(&rcts).await;
        assert_eq!(second, first);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_download_failure_yields_fail_entry_and_stores_nothing() {
        let (cache, allocator, _) = cache(ManualClock::new(0), true);
        let out = cache.download(&[receipt("r1", "p1")]).await;
        assert_eq!(out[0].status, FetchStatus::Fail);
        assert!(out[0].error.is_some());
        assert!(cache.get("r1").await.unwrap().is_none());
        assert!(allocator.released().is_empty());
    }

    #[tokio::test]
    async fn test_clear_at_startup_releases_live_references() {
        let (cache, allocator, _) = cache(ManualClock::new(0), false);
        let entry = cache.put(&receipt("r1", "p1"), b"bytes").await.unwrap();
        cache.clear_at_startup().await.unwrap();
        assert_eq!(allocator.released(), vec![entry.url.unwrap()]);
    }
}
