//! Case metadata stored as one YAML file per case.
//!
//! Layout: `<data_dir>/cases/<s1>/<s2>/<case_doc_id>/case.yaml`, where `s1`/`s2` are the first
//! four characters of the case document id (padded with `_` for very short ids). Every write
//! goes to a temporary sibling file which is then renamed over `case.yaml`, so readers never
//! observe a partially written row.

use super::{apply_approval, apply_patient, apply_review, CaseMetadataStore};
use crate::case::CaseRecord;
use crate::config::CoreConfig;
use crate::constants::CASE_YAML_FILENAME;
use crate::{CaseError, CaseResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use td_types::{DocumentId, UserId};
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct FileCaseStore {
    files: Arc<CaseFiles>,
    write_lock: Mutex<()>,
}

/// The on-disk layout. All of its methods block and run on the blocking thread pool.
#[derive(Debug)]
struct CaseFiles {
    cases_dir: PathBuf,
}

impl FileCaseStore {
    pub fn new(cfg: &CoreConfig) -> Self {
        Self::with_dir(cfg.cases_dir())
    }

    /// Creates a store rooted at `cases_dir`. The directory is created on first write.
    pub fn with_dir(cases_dir: impl Into<PathBuf>) -> Self {
        Self {
            files: Arc::new(CaseFiles {
                cases_dir: cases_dir.into(),
            }),
            write_lock: Mutex::new(()),
        }
    }

    /// Runs filesystem work off the async worker threads.
    async fn blocking<T, F>(&self, f: F) -> CaseResult<T>
    where
        F: FnOnce(&CaseFiles) -> CaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let files = Arc::clone(&self.files);
        tokio::task::spawn_blocking(move || f(&files)).await?
    }

    async fn read(&self, case_doc_id: &DocumentId) -> CaseResult<Option<CaseRecord>> {
        let id = case_doc_id.clone();
        self.blocking(move |files| files.read(&id)).await
    }

    async fn update(
        &self,
        case_doc_id: &DocumentId,
        apply: impl FnOnce(&mut CaseRecord) -> CaseResult<()> + Send,
    ) -> CaseResult<CaseRecord> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .read(case_doc_id)
            .await?
            .ok_or_else(|| CaseError::CaseNotFound(case_doc_id.clone()))?;
        apply(&mut record)?;
        let row = record.clone();
        self.blocking(move |files| files.write(&row)).await?;
        Ok(record)
    }
}

impl CaseFiles {
    fn case_dir(&self, case_doc_id: &DocumentId) -> PathBuf {
        let padded = format!("{:_<4}", case_doc_id.as_str());
        self.cases_dir
            .join(&padded[0..2])
            .join(&padded[2..4])
            .join(case_doc_id.as_str())
    }

    fn case_file(&self, case_doc_id: &DocumentId) -> PathBuf {
        self.case_dir(case_doc_id).join(CASE_YAML_FILENAME)
    }

    fn read(&self, case_doc_id: &DocumentId) -> CaseResult<Option<CaseRecord>> {
        read_record(&self.case_file(case_doc_id))
    }

    fn write(&self, record: &CaseRecord) -> CaseResult<()> {
        let dir = self.case_dir(&record.case_doc_id);
        fs::create_dir_all(&dir).map_err(CaseError::StorageDirCreation)?;

        let yaml = serde_yaml::to_string(record).map_err(CaseError::YamlSerialization)?;
        let tmp = dir.join(format!("{CASE_YAML_FILENAME}.tmp"));
        fs::write(&tmp, yaml).map_err(CaseError::FileWrite)?;
        fs::rename(&tmp, dir.join(CASE_YAML_FILENAME)).map_err(CaseError::FileWrite)
    }

    fn insert(&self, record: &CaseRecord) -> CaseResult<()> {
        if self.case_file(&record.case_doc_id).exists() {
            return Err(CaseError::DuplicateCase(record.case_doc_id.clone()));
        }
        self.write(record)
    }

    /// Reads every stored case, ordered by case document id.
    ///
    /// Files that cannot be parsed are logged and skipped.
    fn scan(&self) -> CaseResult<Vec<CaseRecord>> {
        let mut records = Vec::new();

        let s1_iter = match fs::read_dir(&self.cases_dir) {
            Ok(it) => it,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(CaseError::FileRead(e)),
        };

        for s1 in s1_iter.flatten() {
            let Ok(s2_iter) = fs::read_dir(s1.path()) else {
                continue;
            };
            for s2 in s2_iter.flatten() {
                let Ok(id_iter) = fs::read_dir(s2.path()) else {
                    continue;
                };
                for id_ent in id_iter.flatten() {
                    let path = id_ent.path().join(CASE_YAML_FILENAME);
                    if !path.is_file() {
                        continue;
                    }
                    match read_record(&path) {
                        Ok(Some(record)) => records.push(record),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!("skipping unreadable case file {}: {}", path.display(), e)
                        }
                    }
                }
            }
        }

        records.sort_by(|a, b| a.case_doc_id.cmp(&b.case_doc_id));
        Ok(records)
    }
}

fn read_record(path: &Path) -> CaseResult<Option<CaseRecord>> {
    match fs::read_to_string(path) {
        Ok(contents) => serde_yaml::from_str(&contents)
            .map(Some)
            .map_err(CaseError::YamlDeserialization),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CaseError::FileRead(e)),
    }
}

#[async_trait]
impl CaseMetadataStore for FileCaseStore {
    async fn insert(&self, record: CaseRecord) -> CaseResult<()> {
        let _guard = self.write_lock.lock().await;
        self.blocking(move |files| files.insert(&record)).await
    }

    async fn mark_reviewed(
        &self,
        case_doc_id: &DocumentId,
        reviewed_at: DateTime<Utc>,
    ) -> CaseResult<CaseRecord> {
        self.update(case_doc_id, |row| apply_review(row, reviewed_at))
            .await
    }

    async fn mark_approved(
        &self,
        case_doc_id: &DocumentId,
        approved_at: DateTime<Utc>,
    ) -> CaseResult<CaseRecord> {
        self.update(case_doc_id, |row| apply_approval(row, approved_at))
            .await
    }

    async fn set_patient(
        &self,
        case_doc_id: &DocumentId,
        patient_user_id: &UserId,
    ) -> CaseResult<CaseRecord> {
        self.update(case_doc_id, |row| apply_patient(row, patient_user_id))
            .await
    }

    async fn get(&self, case_doc_id: &DocumentId) -> CaseResult<Option<CaseRecord>> {
        self.read(case_doc_id).await
    }

    async fn get_many(&self, case_doc_ids: &[DocumentId]) -> CaseResult<Vec<CaseRecord>> {
        let ids = case_doc_ids.to_vec();
        self.blocking(move |files| {
            let mut records = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(record) = files.read(id)? {
                    records.push(record);
                }
            }
            Ok(records)
        })
        .await
    }

    async fn list_assigned(&self, doctor: &UserId) -> CaseResult<Vec<CaseRecord>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|row| row.is_assigned_to(doctor))
            .collect())
    }

    async fn find_by_patient(&self, patient_user_id: &UserId) -> CaseResult<Option<CaseRecord>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .find(|row| row.patient_user_id.as_ref() == Some(patient_user_id)))
    }

    async fn list_all(&self) -> CaseResult<Vec<CaseRecord>> {
        self.blocking(|files| files.scan()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::tests::{exercise_store, record};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_contract() {
        let temp_dir = TempDir::new().unwrap();
        exercise_store(&FileCaseStore::with_dir(temp_dir.path())).await;
    }

    #[tokio::test]
    async fn test_rows_are_sharded_yaml_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCaseStore::with_dir(temp_dir.path());
        let row = record("abcdef", "dr-a", "dr-r");
        store.insert(row.clone()).await.unwrap();

        let path = temp_dir
            .path()
            .join("ab")
            .join("cd")
            .join("abcdef")
            .join(CASE_YAML_FILENAME);
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("status: WAITING_FOR_REVIEW"));
        assert!(!path.with_file_name("case.yaml.tmp").exists());

        let reopened = FileCaseStore::with_dir(temp_dir.path());
        assert_eq!(reopened.get(&row.case_doc_id).await.unwrap(), Some(row));
    }

    #[tokio::test]
    async fn test_short_ids_are_padded() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCaseStore::with_dir(temp_dir.path());
        store.insert(record("x", "dr-a", "dr-r")).await.unwrap();

        assert!(temp_dir.path().join("x_").join("__").join("x").is_dir());
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_files_are_skipped_when_listing() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCaseStore::with_dir(temp_dir.path());
        store.insert(record("good-1", "dr-a", "dr-r")).await.unwrap();

        let bad_dir = temp_dir.path().join("ba").join("d-").join("bad-1");
        fs::create_dir_all(&bad_dir).unwrap();
        fs::write(bad_dir.join(CASE_YAML_FILENAME), "not: [valid").unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].case_doc_id.as_str(), "good-1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_inserts_keep_one_row() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FileCaseStore::with_dir(temp_dir.path()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.insert(record("same-1", "dr-a", "dr-r")).await })
            })
            .collect();
        let mut inserted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => inserted += 1,
                Err(err) => assert!(matches!(err, CaseError::DuplicateCase(_))),
            }
        }
        assert_eq!(inserted, 1);

        let id = DocumentId::parse("same-1").unwrap();
        let patient = UserId::parse("patient-1").unwrap();
        let (reviewed, linked) = tokio::join!(
            store.mark_reviewed(&id, Utc::now()),
            store.set_patient(&id, &patient)
        );
        reviewed.unwrap();
        linked.unwrap();

        let row = store.get(&id).await.unwrap().unwrap();
        assert!(row.reviewed_at.is_some());
        assert_eq!(row.patient_user_id, Some(patient));
    }

    #[tokio::test]
    async fn test_missing_directory_lists_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCaseStore::with_dir(temp_dir.path().join("does-not-exist"));
        assert!(store.list_all().await.unwrap().is_empty());
    }
}
