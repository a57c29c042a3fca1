//! Content store adapters.
//!
//! [`MemoryContentStore`] keeps records for the lifetime of the process and is
//! used for tests and local experiments. [`JsonFileContentStore`] persists the
//! whole record table as one JSON document, rewritten on every mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reconcile::{
    ContentStore, LocalRecord, NewRecord, RecordField, RecordId, StoreError, Timestamp,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::lock::LockFile;

// ---------------------------------------------------------------------------
// Record table shared by both adapters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct RecordTable {
    last_id: u64,
    records: BTreeMap<RecordId, LocalRecord>,
}

/// On-disk form of a [`RecordTable`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct TableFile {
    last_id: u64,
    records: Vec<LocalRecord>,
}

impl RecordTable {
    fn insert(&mut self, new: NewRecord) -> LocalRecord {
        self.last_id += 1;
        let now = Timestamp::now();
        let record = LocalRecord {
            id: RecordId::new(self.last_id),
            uuid: new.uuid,
            record_type: new.record_type,
            title: Some(new.title),
            body: new.body,
            created: now,
            changed: now,
        };
        self.records.insert(record.id, record.clone());
        record
    }

    fn update(&mut self, record: &LocalRecord) -> Result<LocalRecord, StoreError> {
        let stored = self
            .records
            .get_mut(&record.id)
            .ok_or(StoreError::NotFound { id: record.id })?;

        if stored.uuid != record.uuid {
            return Err(StoreError::Conflict {
                message: format!(
                    "record {} is bound to webhook uuid {}; refusing to rebind it to {}",
                    record.id, stored.uuid, record.uuid
                ),
            });
        }

        stored.title = record.title.clone();
        stored.body = record.body.clone();
        stored.changed = Timestamp::now();
        Ok(stored.clone())
    }

    fn remove(&mut self, id: RecordId) -> Result<(), StoreError> {
        self.records
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { id })
    }

    fn find(&self, field: RecordField, value: &str) -> Vec<LocalRecord> {
        self.records
            .values()
            .filter(|r| r.field_value(field) == Some(value))
            .cloned()
            .collect()
    }

    fn from_file(file: TableFile) -> Self {
        let records: BTreeMap<_, _> = file.records.into_iter().map(|r| (r.id, r)).collect();
        // Never hand out an id that is already present, even if the counter was
        // edited by hand.
        let max_id = records.keys().next_back().map_or(0, |id| id.as_u64());
        Self {
            last_id: file.last_id.max(max_id),
            records,
        }
    }

    fn to_file(&self) -> TableFile {
        TableFile {
            last_id: self.last_id,
            records: self.records.values().cloned().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory adapter
// ---------------------------------------------------------------------------

/// Process-local content store.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    table: RwLock<RecordTable>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a snapshot of all records in id order (primarily for tests).
    pub async fn all_records(&self) -> Vec<LocalRecord> {
        self.table.read().await.records.values().cloned().collect()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn create(&self, record: NewRecord) -> Result<LocalRecord, StoreError> {
        Ok(self.table.write().await.insert(record))
    }

    async fn load(&self, id: RecordId) -> Result<Option<LocalRecord>, StoreError> {
        Ok(self.table.read().await.records.get(&id).cloned())
    }

    async fn update(&self, record: &LocalRecord) -> Result<LocalRecord, StoreError> {
        self.table.write().await.update(record)
    }

    async fn delete(&self, id: RecordId) -> Result<(), StoreError> {
        self.table.write().await.remove(id)
    }

    async fn find_by_field(
        &self,
        field: RecordField,
        value: &str,
    ) -> Result<Vec<LocalRecord>, StoreError> {
        Ok(self.table.read().await.find(field, value))
    }
}

// ---------------------------------------------------------------------------
// JSON file adapter
// ---------------------------------------------------------------------------

/// Content store persisted to a single JSON file.
///
/// Every mutation is applied to a copy of the table, written to a temporary
/// file, and renamed over the previous file before it becomes visible. A failed
/// write leaves both the file and the in-memory table unchanged.
///
/// The table is cached in memory, so only one handle may own the file: `open`
/// takes an exclusive lock on `<path>.lock` and holds it until the store is
/// dropped.
#[derive(Debug)]
pub struct JsonFileContentStore {
    path: PathBuf,
    table: Mutex<RecordTable>,
    _lock: LockFile,
}

impl JsonFileContentStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// [`StoreError::Locked`] if another handle, in this or another process,
    /// has the store open.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let lock_path = lock_path(&path);
        let lock = LockFile::try_acquire(&lock_path)
            .map_err(|e| StoreError::unavailable(format!("locking {}: {e}", lock_path.display())))?
            .ok_or_else(|| StoreError::Locked {
                path: lock_path.display().to_string(),
            })?;

        let table = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: TableFile = serde_json::from_slice(&bytes).map_err(|e| {
                    StoreError::backend(format!("{} is not a record table: {e}", path.display()))
                })?;
                RecordTable::from_file(file)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RecordTable::default(),
            Err(e) => {
                return Err(StoreError::unavailable(format!(
                    "reading {}: {e}",
                    path.display()
                )))
            }
        };

        tracing::debug!(
            path = %path.display(),
            lock = %lock.path().display(),
            records = table.records.len(),
            "opened record table"
        );
        Ok(Self {
            path,
            table: Mutex::new(table),
            _lock: lock,
        })
    }

    async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut RecordTable) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.table.lock().await;
        let mut next = guard.clone();
        let out = apply(&mut next)?;
        write_table(&self.path, &next).await?;
        *guard = next;
        Ok(out)
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

async fn write_table(path: &Path, table: &RecordTable) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(&table.to_file())
        .map_err(|e| StoreError::backend(format!("serialising record table: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::unavailable(format!("creating {}: {e}", parent.display())))?;
    }
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::unavailable(format!("writing {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::unavailable(format!("replacing {}: {e}", path.display())))
}

#[async_trait]
impl ContentStore for JsonFileContentStore {
    async fn create(&self, record: NewRecord) -> Result<LocalRecord, StoreError> {
        self.mutate(|table| Ok(table.insert(record))).await
    }

    async fn load(&self, id: RecordId) -> Result<Option<LocalRecord>, StoreError> {
        Ok(self.table.lock().await.records.get(&id).cloned())
    }

    async fn update(&self, record: &LocalRecord) -> Result<LocalRecord, StoreError> {
        self.mutate(|table| table.update(record)).await
    }

    async fn delete(&self, id: RecordId) -> Result<(), StoreError> {
        self.mutate(|table| table.remove(id)).await
    }

    async fn find_by_field(
        &self,
        field: RecordField,
        value: &str,
    ) -> Result<Vec<LocalRecord>, StoreError> {
        Ok(self.table.lock().await.find(field, value))
    }
}
