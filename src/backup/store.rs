// Persistence of backup job outcomes across controller restarts.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex as AsyncMutex;

use crate::model::BackupRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backup store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("backup store encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Where backup records live between runs of the controller.
#[async_trait::async_trait]
pub trait BackupStore: Send + Sync {
    async fn load(&self) -> Result<Vec<BackupRecord>, StoreError>;

    /// Upserts the record of one job.
    async fn save(&self, record: &BackupRecord) -> Result<(), StoreError>;
}

/// Keeps records in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    records: Mutex<BTreeMap<String, BackupRecord>>,
    saves: Mutex<usize>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated as if a previous process had saved `records`.
    pub fn with_records(records: Vec<BackupRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.lock();
            for record in records {
                map.insert(record.job.clone(), record);
            }
        }
        store
    }

    pub fn get(&self, job: &str) -> Option<BackupRecord> {
        self.records.lock().get(job).cloned()
    }

    /// Number of `save` calls received.
    pub fn saves(&self) -> usize {
        *self.saves.lock()
    }
}

#[async_trait::async_trait]
impl BackupStore for MemoryBackupStore {
    async fn load(&self) -> Result<Vec<BackupRecord>, StoreError> {
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn save(&self, record: &BackupRecord) -> Result<(), StoreError> {
        self.records.lock().insert(record.job.clone(), record.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}

/// Keeps all records in one JSON document, replaced atomically on every save.
#[derive(Debug)]
pub struct FileBackupStore {
    path: PathBuf,
    write: AsyncMutex<()>,
}

impl FileBackupStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, BackupRecord>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl BackupStore for FileBackupStore {
    async fn load(&self) -> Result<Vec<BackupRecord>, StoreError> {
        Ok(self.read_all().await?.into_values().collect())
    }

    async fn save(&self, record: &BackupRecord) -> Result<(), StoreError> {
        let _write = self.write.lock().await;

        let mut all = self.read_all().await?;
        all.insert(record.job.clone(), record.clone());
        let data = serde_json::to_vec_pretty(&all)?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
