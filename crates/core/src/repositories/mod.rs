//! Case metadata storage.
//!
//! The metadata store holds the non-PII workflow state of each case ([`CaseRecord`]). Every
//! update touches exactly one row and is atomic; the workflow never relies on multi-row
//! transactions.
//!
//! Transitions applied by the store re-check the state machine under the store's own lock, so
//! two racing updates cannot move a case backwards.

mod file;
mod memory;

pub use file::FileCaseStore;
pub use memory::MemoryCaseStore;

use crate::case::CaseRecord;
use crate::{CaseError, CaseResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use td_types::{DocumentId, UserId};

#[async_trait]
pub trait CaseMetadataStore: Send + Sync {
    /// Stores a new case row.
    ///
    /// # Errors
    ///
    /// Returns `CaseError::DuplicateCase` if a row with the same case document id exists.
    async fn insert(&self, record: CaseRecord) -> CaseResult<()>;

    /// Moves a case to `WAITING_FOR_APPROVAL`. `reviewed_at` is only set on the first review.
    async fn mark_reviewed(
        &self,
        case_doc_id: &DocumentId,
        reviewed_at: DateTime<Utc>,
    ) -> CaseResult<CaseRecord>;

    /// Moves a case to `APPROVED`.
    async fn mark_approved(
        &self,
        case_doc_id: &DocumentId,
        approved_at: DateTime<Utc>,
    ) -> CaseResult<CaseRecord>;

    /// Records the patient invited to a case. A case has at most one patient.
    async fn set_patient(
        &self,
        case_doc_id: &DocumentId,
        patient_user_id: &UserId,
    ) -> CaseResult<CaseRecord>;

    async fn get(&self, case_doc_id: &DocumentId) -> CaseResult<Option<CaseRecord>>;

    /// Returns the rows that exist, in the order requested.
    async fn get_many(&self, case_doc_ids: &[DocumentId]) -> CaseResult<Vec<CaseRecord>>;

    /// Cases waiting on `doctor`: to review, or to approve.
    async fn list_assigned(&self, doctor: &UserId) -> CaseResult<Vec<CaseRecord>>;

    async fn find_by_patient(&self, patient_user_id: &UserId) -> CaseResult<Option<CaseRecord>>;

    async fn list_all(&self) -> CaseResult<Vec<CaseRecord>>;
}

// ============================================================================
// ROW UPDATES
// ============================================================================
//
// Shared by both stores so the rules for each single-row update live in one place.

pub(crate) fn apply_review(record: &mut CaseRecord, reviewed_at: DateTime<Utc>) -> CaseResult<()> {
    record.status = record.status.after_review()?;
    if record.reviewed_at.is_none() {
        record.reviewed_at = Some(reviewed_at);
    }
    Ok(())
}

pub(crate) fn apply_approval(
    record: &mut CaseRecord,
    approved_at: DateTime<Utc>,
) -> CaseResult<()> {
    record.status = record.status.after_approval()?;
    record.approved_at = Some(approved_at);
    Ok(())
}

pub(crate) fn apply_patient(record: &mut CaseRecord, patient_user_id: &UserId) -> CaseResult<()> {
    if record.patient_user_id.is_some() {
        return Err(CaseError::PatientAlreadyAssociated(
            record.case_doc_id.clone(),
        ));
    }
    record.patient_user_id = Some(patient_user_id.clone());
    Ok(())
}
