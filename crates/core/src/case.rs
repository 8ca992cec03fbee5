//! Case model and state machine.
//!
//! A case is split across three places:
//! - a **case document** in the vault holding the patient's details and image ids
//! - a **diagnosis document** in the vault holding the reviewer's findings
//! - a [`CaseRecord`] in the metadata store holding workflow state, which contains no PII
//!
//! Keeping the diagnosis in its own document lets the vault grant update rights on it to the
//! reviewer alone, while both assigned doctors can read everything.

use crate::{CaseError, CaseResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use td_types::{BlobId, DocumentId, GroupId, NonEmptyText, UserId};
use td_vault::BlobUpload;

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Review status of a case.
///
/// `WAITING_FOR_REVIEW` → `WAITING_FOR_APPROVAL` → `APPROVED`. A case waiting for approval
/// may be reviewed again; an approved case is final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    WaitingForReview,
    WaitingForApproval,
    Approved,
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::WaitingForReview => "WAITING_FOR_REVIEW",
            CaseStatus::WaitingForApproval => "WAITING_FOR_APPROVAL",
            CaseStatus::Approved => "APPROVED",
        }
    }

    /// Status after the reviewer submits a diagnosis.
    ///
    /// # Errors
    ///
    /// Returns `CaseError::InvalidState` if the case is already approved.
    pub fn after_review(self) -> CaseResult<Self> {
        match self {
            CaseStatus::WaitingForReview | CaseStatus::WaitingForApproval => {
                Ok(CaseStatus::WaitingForApproval)
            }
            CaseStatus::Approved => Err(CaseError::InvalidState {
                status: self,
                action: "review",
            }),
        }
    }

    /// Status after the approver signs off.
    ///
    /// # Errors
    ///
    /// Returns `CaseError::InvalidState` unless the case is waiting for approval.
    pub fn after_approval(self) -> CaseResult<Self> {
        match self {
            CaseStatus::WaitingForApproval => Ok(CaseStatus::Approved),
            CaseStatus::WaitingForReview | CaseStatus::Approved => Err(CaseError::InvalidState {
                status: self,
                action: "approve",
            }),
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaseStatus {
    type Err = CaseError;

    fn from_str(s: &str) -> CaseResult<Self> {
        match s {
            "WAITING_FOR_REVIEW" => Ok(CaseStatus::WaitingForReview),
            "WAITING_FOR_APPROVAL" => Ok(CaseStatus::WaitingForApproval),
            "APPROVED" => Ok(CaseStatus::Approved),
            other => Err(CaseError::InvalidInput(format!("unknown case status {other:?}"))),
        }
    }
}

// ============================================================================
// METADATA
// ============================================================================

/// Workflow metadata for one case, keyed by the case document id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_doc_id: DocumentId,
    pub diagnosis_doc_id: DocumentId,
    pub approver_id: UserId,
    pub reviewer_id: UserId,
    #[serde(default)]
    pub patient_user_id: Option<UserId>,
    pub read_group_id: GroupId,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
}

impl CaseRecord {
    /// A freshly created case, waiting for review.
    pub fn new(
        case_doc_id: DocumentId,
        diagnosis_doc_id: DocumentId,
        approver_id: UserId,
        reviewer_id: UserId,
        read_group_id: GroupId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            case_doc_id,
            diagnosis_doc_id,
            approver_id,
            reviewer_id,
            patient_user_id: None,
            read_group_id,
            status: CaseStatus::WaitingForReview,
            created_at,
            reviewed_at: None,
            approved_at: None,
        }
    }

    /// Whether `user` may see this case: one of its doctors or its patient.
    pub fn involves(&self, user: &UserId) -> bool {
        &self.reviewer_id == user
            || &self.approver_id == user
            || self.patient_user_id.as_ref() == Some(user)
    }

    /// Whether this case is waiting on `doctor`.
    pub fn is_assigned_to(&self, doctor: &UserId) -> bool {
        (&self.reviewer_id == doctor && self.status == CaseStatus::WaitingForReview)
            || (&self.approver_id == doctor && self.status == CaseStatus::WaitingForApproval)
    }
}

/// Fails with `CaseError::InvalidAssignment` when one doctor would both review and approve.
pub fn ensure_distinct_doctors(approver_id: &UserId, reviewer_id: &UserId) -> CaseResult<()> {
    if approver_id == reviewer_id {
        return Err(CaseError::InvalidAssignment(approver_id.clone()));
    }
    Ok(())
}

// ============================================================================
// VAULT DOCUMENTS
// ============================================================================

/// Patient details entered when a case is submitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseDetails {
    pub case_id: String,
    pub patient_name: String,
    pub sex: String,
    pub dob: NaiveDate,
    pub patient_height: u32,
    pub patient_weight: u32,
    pub due_date: NaiveDate,
}

/// The case document as stored in the vault.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseDocument {
    #[serde(flatten)]
    pub details: CaseDetails,
    #[serde(default)]
    pub case_image_ids: Vec<BlobId>,
}

/// The reviewer's findings. Stored empty when the case is created.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosisDocument {
    pub summary: String,
    pub description: String,
}

impl DiagnosisDocument {
    pub fn new(summary: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            description: description.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty() && self.description.trim().is_empty()
    }
}

// ============================================================================
// OPERATION INPUTS AND OUTPUTS
// ============================================================================

/// Input to [`crate::CaseService::create_case`]: vault objects that already exist.
#[derive(Clone, Debug)]
pub struct NewCase {
    pub case_doc_id: DocumentId,
    pub diagnosis_doc_id: DocumentId,
    pub approver_id: UserId,
    pub reviewer_id: UserId,
    /// Images attached to the case; the read group grants access to each.
    pub blob_ids: Vec<BlobId>,
}

/// Input to [`crate::CaseService::submit_case`]: everything needed to create the vault
/// objects and the case.
#[derive(Clone, Debug)]
pub struct CaseSubmission {
    pub details: CaseDetails,
    pub approver_id: UserId,
    pub reviewer_id: UserId,
    pub images: Vec<BlobUpload>,
}

/// A patient to invite to a case.
#[derive(Clone, Debug)]
pub struct NewPatient {
    pub email: NonEmptyText,
    pub name: NonEmptyText,
}

/// A case as shown to one of its participants.
#[derive(Clone, Debug, PartialEq)]
pub struct CaseView {
    pub record: CaseRecord,
    pub case: CaseDocument,
    /// `None` until the case has been reviewed.
    pub diagnosis: Option<DiagnosisDocument>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InboxEntry {
    pub record: CaseRecord,
    pub case: CaseDocument,
}

/// The cases currently waiting on a doctor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DoctorInbox {
    pub to_review: Vec<InboxEntry>,
    pub to_approve: Vec<InboxEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_review_transitions() {
        assert_eq!(
            CaseStatus::WaitingForReview.after_review().unwrap(),
            CaseStatus::WaitingForApproval
        );
        assert_eq!(
            CaseStatus::WaitingForApproval.after_review().unwrap(),
            CaseStatus::WaitingForApproval
        );
        assert!(matches!(
            CaseStatus::Approved.after_review(),
            Err(CaseError::InvalidState {
                status: CaseStatus::Approved,
                action: "review"
            })
        ));
    }

    #[test]
    fn test_approval_transitions() {
        assert_eq!(
            CaseStatus::WaitingForApproval.after_approval().unwrap(),
            CaseStatus::Approved
        );
        assert!(CaseStatus::WaitingForReview.after_approval().is_err());
        assert!(CaseStatus::Approved.after_approval().is_err());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(CaseStatus::WaitingForApproval).unwrap(),
            json!("WAITING_FOR_APPROVAL")
        );
        assert_eq!(
            "APPROVED".parse::<CaseStatus>().unwrap(),
            CaseStatus::Approved
        );
    }

    #[test]
    fn test_case_document_uses_camel_case() {
        let document = CaseDocument {
            details: CaseDetails {
                case_id: "00001".into(),
                patient_name: "Maria Garcia".into(),
                sex: "F".into(),
                dob: NaiveDate::from_ymd_opt(1971, 4, 2).unwrap(),
                patient_height: 5,
                patient_weight: 140,
                due_date: NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
            },
            case_image_ids: vec![BlobId::parse("blob-1").unwrap()],
        };

        let value = serde_json::to_value(&document).unwrap();
        assert_eq!(value["patientName"], json!("Maria Garcia"));
        assert_eq!(value["dueDate"], json!("2026-11-01"));
        assert_eq!(value["caseImageIds"], json!(["blob-1"]));

        let back: CaseDocument = serde_json::from_value(value).unwrap();
        assert_eq!(back, document);
    }

    #[test]
    fn test_empty_diagnosis_document() {
        let diagnosis: DiagnosisDocument = serde_json::from_value(json!({})).unwrap();
        assert!(diagnosis.is_empty());
        assert!(!DiagnosisDocument::new("Osteoarthritis", "").is_empty());
    }

    #[test]
    fn test_assignment_follows_status() {
        let approver = UserId::parse("dr-a").unwrap();
        let reviewer = UserId::parse("dr-r").unwrap();
        let mut record = CaseRecord::new(
            DocumentId::parse("case").unwrap(),
            DocumentId::parse("diag").unwrap(),
            approver.clone(),
            reviewer.clone(),
            GroupId::parse("read").unwrap(),
            Utc::now(),
        );

        assert!(record.is_assigned_to(&reviewer));
        assert!(!record.is_assigned_to(&approver));

        record.status = CaseStatus::WaitingForApproval;
        assert!(record.is_assigned_to(&approver));
        assert!(!record.is_assigned_to(&reviewer));
        assert!(record.involves(&reviewer));
    }

    #[test]
    fn test_same_doctor_is_invalid_assignment() {
        let doctor = UserId::parse("dr-x").unwrap();
        assert!(matches!(
            ensure_distinct_doctors(&doctor, &doctor),
            Err(CaseError::InvalidAssignment(_))
        ));
    }
}
