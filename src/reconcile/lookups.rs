//! Configurable reference data and display-name resolution.
//!
//! Expense records arrive from the remote carrying ids for their purchase
//! type, payment account and the like; the UI wants names. This service
//! caches the config entries locally, memoizes id→name maps, and fills the
//! denormalized `*Name` fields on expense records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{ConfigEntry, ConfigKind, Expense, RecordStatus};
use crate::memo::{memo_key, MemoCache};
use crate::reconcile::response_log::{CallCriteria, QueryParams, RemoteCallLog};
use crate::remote::ConfigRemote;
use crate::store::engine::{Database, LocalStore};
use crate::store::schema::{IndexName, StoreKey, StoreName};
use crate::Result;

const MAP_MEMO_WINDOW: Duration = Duration::from_secs(60);

pub struct LookupService {
    db: LocalStore<ConfigEntry>,
    remote: Arc<dyn ConfigRemote>,
    call_log: Arc<RemoteCallLog>,
    map_memo: MemoCache<HashMap<String, String>>,
}

fn resolve_slot(name: &mut Option<String>, id: &Option<String>, map: &HashMap<String, String>) {
    if let Some(id) = id {
        if let Some(found) = map.get(id) {
            *name = Some(found.clone());
        }
    }
}

impl LookupService {
    pub fn new(
        db: Arc<Database>,
        remote: Arc<dyn ConfigRemote>,
        call_log: Arc<RemoteCallLog>,
    ) -> Result<Self> {
        let clock = db.clock();
        Ok(Self {
            db: LocalStore::new(db, StoreName::Config)?,
            remote,
            call_log,
            map_memo: MemoCache::new(MAP_MEMO_WINDOW, clock),
        })
    }

    /// Lists config entries of a kind, optionally filtered by status.
    ///
    /// A zero local count triggers a remote fetch and write-back, unless the
    /// call log shows the remote already answered empty for this query.
    pub async fn list(
        &self,
        kind: ConfigKind,
        statuses: &[RecordStatus],
    ) -> Result<Vec<ConfigEntry>> {
        let total = if statuses.is_empty() {
            self.db
                .count_by_index(IndexName::BelongsTo, Some(&StoreKey::text(kind.as_str())))
                .await?
        } else {
            let mut sum = 0;
            for status in statuses {
                sum += self
                    .db
                    .count_by_index(
                        IndexName::ItemStatus,
                        Some(&StoreKey::composite([kind.as_str(), status.as_str()])),
                    )
                    .await?;
            }
            sum
        };

        if total == 0 {
            let endpoint = format!("/config/types/belongs-to/{}", kind.as_str());
            let mut params = QueryParams::new();
            if !statuses.is_empty() {
                params.insert(
                    "status".to_string(),
                    statuses.iter().map(|s| s.as_str().to_string()).collect(),
                );
            }
            let known_empty = CallCriteria {
                within: None,
                list_size: Some(0),
                min_size: None,
            };
            if self.call_log.was_called(&known_empty, &endpoint, &params).await? {
                return Ok(Vec::new());
            }

            let listed = self.remote.list(kind, statuses).await?;
            self.call_log
                .record(&endpoint, &params, listed.len() as u64)
                .await?;
            for entry in &listed {
                self.db.add_or_update(entry).await?;
            }
            return Ok(listed);
        }

        if statuses.is_empty() {
            self.db
                .get_all_by_index(IndexName::BelongsTo, Some(&StoreKey::text(kind.as_str())))
                .await
        } else {
            let mut entries = Vec::new();
            for status in statuses {
                let key = StoreKey::composite([kind.as_str(), status.as_str()]);
                entries.extend(
                    self.db
                        .get_all_by_index(IndexName::ItemStatus, Some(&key))
                        .await?,
                );
            }
            Ok(entries)
        }
    }

    /// Memoized id→display-value map for a kind/status selection.
    pub async fn name_map(
        &self,
        kind: ConfigKind,
        statuses: &[RecordStatus],
    ) -> Result<HashMap<String, String>> {
        let status_names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let key = memo_key(&(kind.as_str(), status_names));
        self.map_memo
            .get_or_fetch(&key, || async move {
                let entries = self.list(kind, statuses).await?;
                Ok(entries
                    .into_iter()
                    .map(|entry| (entry.id, entry.value))
                    .collect())
            })
            .await
    }

    async fn resolve_with_fallback(
        &self,
        kind: ConfigKind,
        slots: &mut [(&mut Option<String>, &Option<String>)],
    ) -> Result<()> {
        let enabled = self.name_map(kind, &[RecordStatus::Enable]).await?;
        for (name, id) in slots.iter_mut() {
            resolve_slot(name, id, &enabled);
        }
        // An id with no enabled mapping may point at a since-deleted entry.
        if slots.iter().any(|(name, id)| id.is_some() && name.is_none()) {
            let deleted = self.name_map(kind, &[RecordStatus::Deleted]).await?;
            for (name, id) in slots.iter_mut() {
                if name.is_none() {
                    resolve_slot(name, id, &deleted);
                }
            }
        }
        Ok(())
    }

    /// Fills the denormalized display-name fields on an expense record.
    pub async fn resolve_names(&self, expense: &mut Expense) -> Result<()> {
        let accounts = self.name_map(ConfigKind::PaymentAccount, &[]).await?;
        match expense {
            Expense::Purchase(purchase) => {
                let mut slots: Vec<(&mut Option<String>, &Option<String>)> = Vec::new();
                slots.push((
                    &mut purchase.purchase_type_name,
                    &purchase.purchase_type_id,
                ));
                for item in &mut purchase.items {
                    slots.push((&mut item.purchase_type_name, &item.purchase_type_id));
                }
                self.resolve_with_fallback(ConfigKind::PurchaseType, &mut slots)
                    .await?;
                resolve_slot(
                    &mut purchase.payment_account_name,
                    &purchase.payment_account_id,
                    &accounts,
                );
            }
            Expense::Income(income) => {
                self.resolve_with_fallback(
                    ConfigKind::IncomeType,
                    &mut [(&mut income.income_type_name, &income.income_type_id)],
                )
                .await?;
                resolve_slot(
                    &mut income.payment_account_name,
                    &income.payment_account_id,
                    &accounts,
                );
            }
            Expense::Refund(refund) => {
                self.resolve_with_fallback(
                    ConfigKind::RefundReason,
                    &mut [(&mut refund.reason_value, &refund.reason_id)],
                )
                .await?;
                resolve_slot(
                    &mut refund.payment_account_name,
                    &refund.payment_account_id,
                    &accounts,
                );
            }
        }
        Ok(())
    }

    pub async fn invalidate(&self) {
        self.map_memo.invalidate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::AuditDetails;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedConfig {
        entries: Vec<ConfigEntry>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ConfigRemote for FixedConfig {
        async fn list(
            &self,
            kind: ConfigKind,
            statuses: &[RecordStatus],
        ) -> Result<Vec<ConfigEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .entries
                .iter()
                .filter(|e| {
                    e.belongs_to == kind
                        && (statuses.is_empty() || statuses.contains(&e.status))
                })
                .cloned()
                .collect())
        }
    }

    fn entry(id: &str, kind: ConfigKind, value: &str, status: RecordStatus) -> ConfigEntry {
        ConfigEntry {
            id: id.to_string(),
            belongs_to: kind,
            value: value.to_string(),
            description: String::new(),
            status,
            audit_details: AuditDetails::default(),
        }
    }

    fn service(entries: Vec<ConfigEntry>) -> (LookupService, Arc<FixedConfig>) {
        let db = Database::in_memory(ManualClock::new(0));
        let remote = Arc::new(FixedConfig {
            entries,
            calls: AtomicUsize::new(0),
        });
        let call_log = Arc::new(RemoteCallLog::new(db.clone()).unwrap());
        (
            LookupService::new(db, remote.clone(), call_log).unwrap(),
            remote,
        )
    }

    #[tokio::test]
    async fn test_cold_list_fetches_and_writes_back() {
        let (service, remote) = service(vec![
            entry("t1", ConfigKind::PurchaseType, "Groceries", RecordStatus::Enable),
            entry("t2", ConfigKind::PurchaseType, "Fuel", RecordStatus::Enable),
        ]);

        let listed = service
            .list(ConfigKind::PurchaseType, &[RecordStatus::Enable])
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);

        // Warm: answered from the local store.
        let again = service
            .list(ConfigKind::PurchaseType, &[RecordStatus::Enable])
            .await
            .unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_remote_answer_is_not_refetched() {
        let (service, remote) = service(vec![]);
        for _ in 0..2 {
            let listed = service
                .list(ConfigKind::RefundReason, &[RecordStatus::Enable])
                .await
                .unwrap();
            assert!(listed.is_empty());
        }
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_names_with_deleted_fallback() {
        let (service, _) = service(vec![
            entry("t1", ConfigKind::PurchaseType, "Groceries", RecordStatus::Enable),
            entry("t9", ConfigKind::PurchaseType, "Old Type", RecordStatus::Deleted),
            entry("a1", ConfigKind::PaymentAccount, "Checking", RecordStatus::Enable),
        ]);

        let mut expense = Expense::Purchase(crate::domain::Purchase {
            id: "p1".into(),
            bill_name: "weekly shop".into(),
            amount: 20.0,
            purchase_date: 0,
            verified_on: None,
            description: String::new(),
            purchase_type_id: Some("t9".into()),
            purchase_type_name: None,
            payment_account_id: Some("a1".into()),
            payment_account_name: None,
            tags: vec![],
            items: vec![],
            receipts: vec![],
            status: RecordStatus::Enable,
            audit_details: AuditDetails::default(),
        });

        service.resolve_names(&mut expense).await.unwrap();
        let Expense::Purchase(purchase) = &expense else {
            panic!("still a purchase");
        };
        assert_eq!(purchase.purchase_type_name.as_deref(), Some("Old Type"));
        assert_eq!(purchase.payment_account_name.as_deref(), Some("Checking"));
    }
}
