//! The store engine: schema-validated keyed collections over one shared
//! in-memory database, with read-triggered expiry and optional snapshot
//! persistence.

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::clock::Clock;
use crate::store::envelope::Envelope;
use crate::store::persistence::Persistence;
use crate::store::schema::{self, IndexName, StoreConfig, StoreKey, StoreName};
use crate::{Error, Result};

pub(crate) type StoreMap = BTreeMap<StoreKey, Envelope<Value>>;

static EMPTY_STORE: StoreMap = StoreMap::new();

/// Holds every store's data behind one lock, plus the shared clock and the
/// optional snapshot persistence.
///
/// Individual stores are accessed through typed [`LocalStore`] facades. The
/// lock is only ever held inside the scoped helpers below and never across an
/// await point.
pub struct Database {
    stores: RwLock<HashMap<StoreName, StoreMap>>,
    persistence: Option<Arc<Persistence>>,
    pending_tasks: Arc<AtomicUsize>,
    clock: Arc<dyn Clock>,
}

impl Database {
    /// Opens the database, loading snapshots from persistence when configured.
    pub fn open(clock: Arc<dyn Clock>, persistence: Option<Arc<Persistence>>) -> Result<Arc<Self>> {
        let initial = match &persistence {
            Some(p) => p.load_all()?,
            None => HashMap::new(),
        };
        Ok(Arc::new(Self {
            stores: RwLock::new(initial),
            persistence,
            pending_tasks: Arc::new(AtomicUsize::new(0)),
            clock,
        }))
    }

    /// Memory-only database, the default for tests.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            stores: RwLock::new(HashMap::new()),
            persistence: None,
            pending_tasks: Arc::new(AtomicUsize::new(0)),
            clock,
        })
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Blocks until all scheduled snapshot writes have drained.
    pub async fn wait(&self) {
        while self.pending_tasks.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    /// Scoped read access to one store's map; acquire, run, guaranteed release.
    fn with_store<R>(&self, name: StoreName, f: impl FnOnce(&StoreMap) -> R) -> R {
        let stores = self.stores.read().unwrap();
        f(stores.get(&name).unwrap_or(&EMPTY_STORE))
    }

    /// Scoped write access to one store's map.
    fn with_store_mut<R>(&self, name: StoreName, f: impl FnOnce(&mut StoreMap) -> R) -> R {
        let mut stores = self.stores.write().unwrap();
        f(stores.entry(name).or_default())
    }

    fn persist(&self, name: StoreName) {
        if let Some(p) = &self.persistence {
            let snapshot: Vec<Envelope<Value>> =
                self.with_store(name, |map| map.values().cloned().collect());
            let p = p.clone();
            let pending = self.pending_tasks.clone();
            pending.fetch_add(1, Ordering::SeqCst);
            tokio::task::spawn_blocking(move || {
                if let Err(e) = p.save_store(name, &snapshot) {
                    log::error!("Failed to persist store {}: {}", name, e);
                }
                pending.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }
}

/// Typed facade over one named store.
///
/// Construction validates the store name against the schema registry and
/// fails fast with [`Error::UnsupportedStore`] otherwise. All operations
/// validate key shapes against the schema and perform the expiry sweep before
/// reads.
pub struct LocalStore<T> {
    db: Arc<Database>,
    config: &'static StoreConfig,
    evict_hook: Option<Arc<dyn Fn(&T) + Send + Sync>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for LocalStore<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            config: self.config,
            evict_hook: self.evict_hook.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> LocalStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(db: Arc<Database>, name: StoreName) -> Result<Self> {
        let config = schema::config_for(name)?;
        Ok(Self {
            db,
            config,
            evict_hook: None,
            _marker: PhantomData,
        })
    }

    /// Like [`LocalStore::new`], with a hook invoked for each record removed
    /// by the expiry sweep or by `clear_all`. The transient resource cache
    /// uses this to release allocator references.
    pub fn with_evict_hook(
        db: Arc<Database>,
        name: StoreName,
        hook: impl Fn(&T) + Send + Sync + 'static,
    ) -> Result<Self> {
        let mut store = Self::new(db, name)?;
        store.evict_hook = Some(Arc::new(hook));
        Ok(store)
    }

    pub fn name(&self) -> StoreName {
        self.config.name
    }

    /// Inserts a new envelope. Fails with [`Error::DuplicateKey`] when the
    /// primary key already exists; services should prefer
    /// [`LocalStore::add_or_update`].
    pub async fn add(&self, value: &T) -> Result<()> {
        let (key, json) = self.encode(value)?;
        let now = self.db.clock.now_millis();
        let inserted = self.db.with_store_mut(self.config.name, |map| {
            if map.contains_key(&key) {
                false
            } else {
                map.insert(key.clone(), Envelope::new(json, now));
                true
            }
        });
        if !inserted {
            return Err(Error::DuplicateKey(key.to_string()));
        }
        self.db.persist(self.config.name);
        Ok(())
    }

    /// The single idempotent upsert entry point. The existence check and the
    /// write happen under one lock acquisition with no await between them, so
    /// two concurrent upserts for the same key cannot both take the add path.
    pub async fn add_or_update(&self, value: &T) -> Result<()> {
        let (key, json) = self.encode(value)?;
        let now = self.db.clock.now_millis();
        self.db.with_store_mut(self.config.name, |map| {
            let envelope = match map.get(&key) {
                Some(existing) => existing.updated(json, now),
                None => Envelope::new(json, now),
            };
            map.insert(key.clone(), envelope);
        });
        self.db.persist(self.config.name);
        Ok(())
    }

    /// Single-key lookup. `None` when absent or already expired.
    pub async fn get(&self, key: &StoreKey) -> Result<Option<T>> {
        self.validate_primary_key(key)?;
        self.sweep_expired();
        let found = self
            .db
            .with_store(self.config.name, |map| map.get(key).map(|e| e.value.clone()));
        match found {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Whole-store scan of unwrapped values, in unspecified order.
    pub async fn get_all(&self) -> Result<Vec<T>> {
        self.sweep_expired();
        let values = self
            .db
            .with_store(self.config.name, |map| {
                map.values().map(|e| e.value.clone()).collect::<Vec<_>>()
            });
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Error::from))
            .collect()
    }

    /// Scans a declared index, optionally narrowed to one index key.
    /// Unspecified order; callers sort.
    pub async fn get_all_by_index(
        &self,
        index: IndexName,
        key: Option<&StoreKey>,
    ) -> Result<Vec<T>> {
        let index_def = self.config.index(index)?;
        self.sweep_expired();
        if let Some(k) = key {
            if !index_def.key_path.shape_matches(k) {
                return Err(Error::InvalidKey(format!(
                    "key shape does not match index [{}] of store [{}]",
                    index, self.config.name
                )));
            }
        }
        let values = self.db.with_store(self.config.name, |map| {
            map.values()
                .filter(|env| match key {
                    Some(k) => index_def.key_path.extract(&env.value).as_ref() == Some(k),
                    None => true,
                })
                .map(|env| env.value.clone())
                .collect::<Vec<_>>()
        });
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Error::from))
            .collect()
    }

    /// Counts index matches without deserializing values.
    pub async fn count_by_index(&self, index: IndexName, key: Option<&StoreKey>) -> Result<u64> {
        let index_def = self.config.index(index)?;
        self.sweep_expired();
        if let Some(k) = key {
            if !index_def.key_path.shape_matches(k) {
                return Err(Error::InvalidKey(format!(
                    "key shape does not match index [{}] of store [{}]",
                    index, self.config.name
                )));
            }
        }
        let count = self.db.with_store(self.config.name, |map| {
            map.values()
                .filter(|env| match key {
                    Some(k) => index_def.key_path.extract(&env.value).as_ref() == Some(k),
                    None => true,
                })
                .count()
        });
        Ok(count as u64)
    }

    /// Removes by primary key; no-op when absent.
    pub async fn delete(&self, key: &StoreKey) -> Result<()> {
        self.validate_primary_key(key)?;
        self.db
            .with_store_mut(self.config.name, |map| map.remove(key));
        self.db.persist(self.config.name);
        Ok(())
    }

    /// Empties the store, firing the evict hook for each entry. Used at
    /// process start for transient resource caches.
    pub async fn clear_all(&self) -> Result<()> {
        let drained = self
            .db
            .with_store_mut(self.config.name, std::mem::take);
        self.run_evict_hook(drained.values());
        self.db.persist(self.config.name);
        Ok(())
    }

    fn encode(&self, value: &T) -> Result<(StoreKey, Value)> {
        let json = serde_json::to_value(value)?;
        let key = self.config.key_path.extract(&json).ok_or_else(|| {
            Error::InvalidRecord(format!(
                "value is missing the key path of store [{}]",
                self.config.name
            ))
        })?;
        Ok((key, json))
    }

    fn validate_primary_key(&self, key: &StoreKey) -> Result<()> {
        if self.config.key_path.shape_matches(key) {
            Ok(())
        } else {
            Err(Error::InvalidKey(format!(
                "key shape does not match the key path of store [{}]",
                self.config.name
            )))
        }
    }

    /// Deletes every envelope older than the store's expiry, running the
    /// evict hook first. Read-triggered: a store that is never read never
    /// expires its contents. Per-item hook failures are logged and skipped.
    fn sweep_expired(&self) {
        let cutoff = self.db.clock.now_millis() - self.config.expiry.as_millis() as i64;
        let removed = self.db.with_store_mut(self.config.name, |map| {
            let expired: Vec<StoreKey> = map
                .iter()
                .filter(|(_, env)| env.updated_on < cutoff)
                .map(|(key, _)| key.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|key| map.remove(&key))
                .collect::<Vec<_>>()
        });
        if removed.is_empty() {
            return;
        }
        debug!(
            "store [{}]: expired {} records older than {}",
            self.config.name,
            removed.len(),
            cutoff
        );
        self.run_evict_hook(removed.iter());
        self.db.persist(self.config.name);
    }

    fn run_evict_hook<'a>(&self, envelopes: impl Iterator<Item = &'a Envelope<Value>>) {
        let Some(hook) = &self.evict_hook else {
            return;
        };
        for env in envelopes {
            match serde_json::from_value::<T>(env.value.clone()) {
                Ok(value) => hook(&value),
                Err(e) => warn!(
                    "store [{}]: skipping evict hook for undecodable record: {}",
                    self.config.name, e
                ),
            }
        }
    }
}
