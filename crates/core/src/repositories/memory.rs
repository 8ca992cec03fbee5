use super::{apply_approval, apply_patient, apply_review, CaseMetadataStore};
use crate::case::CaseRecord;
use crate::{CaseError, CaseResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use td_types::{DocumentId, UserId};
use tokio::sync::RwLock;

/// Case metadata held in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCaseStore {
    rows: RwLock<BTreeMap<DocumentId, CaseRecord>>,
}

impl MemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update(
        &self,
        case_doc_id: &DocumentId,
        apply: impl FnOnce(&mut CaseRecord) -> CaseResult<()> + Send,
    ) -> CaseResult<CaseRecord> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(case_doc_id)
            .ok_or_else(|| CaseError::CaseNotFound(case_doc_id.clone()))?;

        // Apply to a copy so a rejected transition leaves the row untouched.
        let mut updated = row.clone();
        apply(&mut updated)?;
        *row = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl CaseMetadataStore for MemoryCaseStore {
    async fn insert(&self, record: CaseRecord) -> CaseResult<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&record.case_doc_id) {
            return Err(CaseError::DuplicateCase(record.case_doc_id));
        }
        rows.insert(record.case_doc_id.clone(), record);
        Ok(())
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
        Ok(self.rows.read().await.get(case_doc_id).cloned())
    }

    async fn get_many(&self, case_doc_ids: &[DocumentId]) -> CaseResult<Vec<CaseRecord>> {
        let rows = self.rows.read().await;
        Ok(case_doc_ids
            .iter()
            .filter_map(|id| rows.get(id).cloned())
            .collect())
    }

    async fn list_assigned(&self, doctor: &UserId) -> CaseResult<Vec<CaseRecord>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| row.is_assigned_to(doctor))
            .cloned()
            .collect())
    }

    async fn find_by_patient(&self, patient_user_id: &UserId) -> CaseResult<Option<CaseRecord>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|row| row.patient_user_id.as_ref() == Some(patient_user_id))
            .cloned())
    }

    async fn list_all(&self) -> CaseResult<Vec<CaseRecord>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }
}
