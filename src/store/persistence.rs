use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde_json::Value;

use crate::store::engine::StoreMap;
use crate::store::envelope::Envelope;
use crate::store::schema::{self, StoreName};
use crate::Result;

/// Handles disk I/O for the [`crate::store::engine::Database`].
///
/// Persistence uses an atomic "write-then-rename" strategy to ensure snapshot
/// integrity. Each store is snapshotted to its own `.json` file as an array
/// of envelopes; primary keys are re-derived from the schema on load.
pub struct Persistence {
    data_dir: PathBuf,
}

impl Persistence {
    /// Initializes a new `Persistence` handler in the specified directory.
    ///
    /// If the directory does not exist, it will be created.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { data_dir: dir })
    }

    fn file_path(&self, name: StoreName) -> PathBuf {
        self.data_dir.join(format!("{}.json", name.as_str()))
    }

    /// Writes a single store's envelopes to a JSON file atomically.
    ///
    /// This method writes to a temporary file first and then renames it to
    /// the final destination, preventing file corruption mid-write.
    pub fn save_store(&self, name: StoreName, envelopes: &[Envelope<Value>]) -> Result<()> {
        let file_path = self.file_path(name);
        let temp_path = file_path.with_extension("json.tmp");

        let bytes = serde_json::to_vec_pretty(envelopes)?;

        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, &file_path)?;

        Ok(())
    }

    /// Loads every known store's snapshot found in the data directory.
    ///
    /// Unreadable or unparsable snapshot files are logged and skipped;
    /// envelopes whose value no longer yields the store's primary key are
    /// dropped individually.
    pub fn load_all(&self) -> Result<HashMap<StoreName, StoreMap>> {
        let mut all_data = HashMap::new();

        if !self.data_dir.exists() {
            return Ok(all_data);
        }

        for name in [
            StoreName::Expenses,
            StoreName::Config,
            StoreName::ReceiptFiles,
            StoreName::Tags,
            StoreName::Statistics,
        ] {
            let path = self.file_path(name);
            if !path.exists() {
                continue;
            }

            let content = match fs::read(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!("Could not read store snapshot {:?}: {}", path, e);
                    continue;
                }
            };

            let envelopes: Vec<Envelope<Value>> = match serde_json::from_slice(&content) {
                Ok(list) => list,
                Err(e) => {
                    warn!("Could not unmarshal store snapshot from {:?}: {}", path, e);
                    continue;
                }
            };

            let config = schema::config_for(name)?;
            let mut map = StoreMap::new();
            for envelope in envelopes {
                match config.key_path.extract(&envelope.value) {
                    Some(key) => {
                        map.insert(key, envelope);
                    }
                    None => {
                        warn!("Dropping snapshot record without key path in store {}", name);
                    }
                }
            }
            all_data.insert(name, map);
        }

        Ok(all_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::StoreKey;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_all() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path()).unwrap();

        let envelopes = vec![Envelope::new(json!({"id": "a", "status": "enable"}), 42)];
        persistence.save_store(StoreName::Expenses, &envelopes).unwrap();

        let loaded = persistence.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        let map = loaded.get(&StoreName::Expenses).unwrap();
        let env = map.get(&StoreKey::text("a")).unwrap();
        assert_eq!(env.created_on, 42);
        assert_eq!(env.value["status"], json!("enable"));
    }

    #[test]
    fn test_atomic_rename() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path()).unwrap();

        let envelopes = vec![Envelope::new(json!({"id": "a"}), 1)];
        persistence.save_store(StoreName::Tags, &envelopes).unwrap();

        let file_path = dir.path().join("tags-store.json");
        assert!(file_path.exists());

        let temp_path = dir.path().join("tags-store.json.tmp");
        assert!(!temp_path.exists());
    }

    #[test]
    fn test_corrupt_snapshot_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("expense-items-store.json"), b"not json").unwrap();

        let persistence = Persistence::new(dir.path()).unwrap();
        let loaded = persistence.load_all().unwrap();
        assert!(loaded.is_empty());
    }
}
