#[cfg(test)]
mod tests {
    use crate::backup::{BackupStore, FileBackupStore, MemoryBackupStore};
    use crate::model::{BackupOutcome, BackupRecord};
    use std::path::PathBuf;

    fn record(job: &str, outcome: BackupOutcome) -> BackupRecord {
        let mut rec = BackupRecord::new(job.into(), "db".into(), "0 0 3 * * *".into());
        rec.last_outcome = Some(outcome);
        rec.runs = 1;
        rec
    }

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("stackctl-store-{}-{name}", std::process::id()))
            .join("backups.json")
    }

    #[tokio::test]
    async fn memory_store_upserts_by_job() {
        let store = MemoryBackupStore::new();
        store.save(&record("a", BackupOutcome::Pending)).await.unwrap();
        store.save(&record("a", BackupOutcome::Success)).await.unwrap();
        store.save(&record("b", BackupOutcome::Failure)).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(store.get("a").unwrap().last_outcome, Some(BackupOutcome::Success));
        assert_eq!(store.saves(), 3);
    }

    #[tokio::test]
    async fn file_store_missing_file_loads_empty() {
        let store = FileBackupStore::new(scratch("missing"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let path = scratch("reopen");
        let _ = std::fs::remove_file(&path);

        {
            let store = FileBackupStore::new(&path);
            store.save(&record("nightly", BackupOutcome::Pending)).await.unwrap();
            store.save(&record("nightly", BackupOutcome::Success)).await.unwrap();
            store.save(&record("hourly", BackupOutcome::Failure)).await.unwrap();
        }

        let reopened = FileBackupStore::new(&path);
        let mut loaded = reopened.load().await.unwrap();
        loaded.sort_by(|a, b| a.job.cmp(&b.job));

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].job, "hourly");
        assert_eq!(loaded[0].last_outcome, Some(BackupOutcome::Failure));
        assert_eq!(loaded[1].job, "nightly");
        assert_eq!(loaded[1].last_outcome, Some(BackupOutcome::Success));
        assert!(!path.with_extension("tmp").exists());

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test]
    async fn file_store_rejects_garbage() {
        let path = scratch("garbage");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not json").unwrap();

        let store = FileBackupStore::new(&path);
        assert!(store.load().await.is_err());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
