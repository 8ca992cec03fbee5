//! Wire types for the internal metadata API.
//!
//! JSON field names are camelCase. Identifiers travel as plain strings and are validated when a
//! request is converted into its `td-core` input.

use serde::{Deserialize, Serialize};
use td_core::{
    CaseDocument, CaseError, CaseRecord, CaseView, DashboardStats, DiagnosisDocument,
    DoctorInbox, DoctorResponseTime, InboxEntry, NewCase, NewPatient, StageStats,
};
use td_types::{BlobId, DocumentId, NonEmptyText, UserId};
use utoipa::ToSchema;

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCaseReq {
    pub case_doc_id: String,
    pub diagnosis_doc_id: String,
    pub approver_id: String,
    pub reviewer_id: String,
    /// Images attached to the case; readable through the case's read group.
    #[serde(default)]
    pub blob_ids: Vec<String>,
}

impl TryFrom<CreateCaseReq> for NewCase {
    type Error = CaseError;

    fn try_from(req: CreateCaseReq) -> Result<Self, Self::Error> {
        Ok(NewCase {
            case_doc_id: DocumentId::parse(req.case_doc_id)?,
            diagnosis_doc_id: DocumentId::parse(req.diagnosis_doc_id)?,
            approver_id: UserId::parse(req.approver_id)?,
            reviewer_id: UserId::parse(req.reviewer_id)?,
            blob_ids: req
                .blob_ids
                .into_iter()
                .map(BlobId::parse)
                .collect::<Result<_, _>>()?,
        })
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ReviewCaseReq {
    pub summary: String,
    pub description: String,
}

impl From<ReviewCaseReq> for DiagnosisDocument {
    fn from(req: ReviewCaseReq) -> Self {
        DiagnosisDocument::new(req.summary, req.description)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssociatePatientReq {
    pub email: String,
    pub name: String,
}

impl TryFrom<AssociatePatientReq> for NewPatient {
    type Error = CaseError;

    fn try_from(req: AssociatePatientReq) -> Result<Self, Self::Error> {
        Ok(NewPatient {
            email: NonEmptyText::new(req.email)?,
            name: NonEmptyText::new(req.name)?,
        })
    }
}

// ============================================================================
// RESPONSES
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Error body returned with every non-2xx status.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRes {
    /// Error category, e.g. `Forbidden` or `InvalidState`.
    pub kind: String,
    pub message: String,
}

/// Non-PII workflow metadata for one case.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaseRes {
    pub case_doc_id: String,
    pub diagnosis_doc_id: String,
    pub approver_id: String,
    pub reviewer_id: String,
    pub patient_user_id: Option<String>,
    pub read_group_id: String,
    /// `WAITING_FOR_REVIEW`, `WAITING_FOR_APPROVAL` or `APPROVED`.
    pub status: String,
    /// RFC 3339 timestamps.
    pub created_at: String,
    pub reviewed_at: Option<String>,
    pub approved_at: Option<String>,
}

impl From<CaseRecord> for CaseRes {
    fn from(record: CaseRecord) -> Self {
        CaseRes {
            case_doc_id: record.case_doc_id.into(),
            diagnosis_doc_id: record.diagnosis_doc_id.into(),
            approver_id: record.approver_id.into(),
            reviewer_id: record.reviewer_id.into(),
            patient_user_id: record.patient_user_id.map(String::from),
            read_group_id: record.read_group_id.into(),
            status: record.status.as_str().to_owned(),
            created_at: record.created_at.to_rfc3339(),
            reviewed_at: record.reviewed_at.map(|t| t.to_rfc3339()),
            approved_at: record.approved_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CasesRes {
    pub cases: Vec<CaseRes>,
}

impl CasesRes {
    pub fn from_records(records: Vec<CaseRecord>) -> Self {
        CasesRes {
            cases: records.into_iter().map(CaseRes::from).collect(),
        }
    }
}

/// Patient details of a case, read from the vault with the caller's credential.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaseDocumentRes {
    pub case_id: String,
    pub patient_name: String,
    pub sex: String,
    /// `YYYY-MM-DD`
    pub dob: String,
    pub patient_height: u32,
    pub patient_weight: u32,
    /// `YYYY-MM-DD`
    pub due_date: String,
    pub case_image_ids: Vec<String>,
}

impl From<CaseDocument> for CaseDocumentRes {
    fn from(doc: CaseDocument) -> Self {
        let details = doc.details;
        CaseDocumentRes {
            case_id: details.case_id,
            patient_name: details.patient_name,
            sex: details.sex,
            dob: details.dob.to_string(),
            patient_height: details.patient_height,
            patient_weight: details.patient_weight,
            due_date: details.due_date.to_string(),
            case_image_ids: doc.case_image_ids.into_iter().map(String::from).collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisRes {
    pub summary: String,
    pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaseViewRes {
    pub case: CaseRes,
    pub document: CaseDocumentRes,
    /// Absent until the case has been reviewed.
    pub diagnosis: Option<DiagnosisRes>,
}

impl From<CaseView> for CaseViewRes {
    fn from(view: CaseView) -> Self {
        CaseViewRes {
            case: view.record.into(),
            document: view.case.into(),
            diagnosis: view.diagnosis.map(|d| DiagnosisRes {
                summary: d.summary,
                description: d.description,
            }),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntryRes {
    pub case: CaseRes,
    pub document: CaseDocumentRes,
}

impl From<InboxEntry> for InboxEntryRes {
    fn from(entry: InboxEntry) -> Self {
        InboxEntryRes {
            case: entry.record.into(),
            document: entry.case.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InboxRes {
    pub to_review: Vec<InboxEntryRes>,
    pub to_approve: Vec<InboxEntryRes>,
}

impl From<DoctorInbox> for InboxRes {
    fn from(inbox: DoctorInbox) -> Self {
        InboxRes {
            to_review: inbox.to_review.into_iter().map(Into::into).collect(),
            to_approve: inbox.to_approve.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DoctorResponseTimeRes {
    pub doctor_user_id: String,
    /// Seconds, floored. Absent when the doctor has no measured response.
    pub avg_response_time: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StageStatsRes {
    pub avg_response_time: Option<i64>,
    pub cases_remaining: u64,
    pub response_times: Vec<DoctorResponseTimeRes>,
}

impl From<StageStats> for StageStatsRes {
    fn from(stage: StageStats) -> Self {
        StageStatsRes {
            avg_response_time: stage.avg_response_time,
            cases_remaining: stage.cases_remaining as u64,
            response_times: stage
                .response_times
                .into_iter()
                .map(|t: DoctorResponseTime| DoctorResponseTimeRes {
                    doctor_user_id: t.doctor_user_id.into(),
                    avg_response_time: t.avg_response_time,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStatsRes {
    pub create_to_review: StageStatsRes,
    pub review_to_approve: StageStatsRes,
}

impl From<DashboardStats> for DashboardStatsRes {
    fn from(stats: DashboardStats) -> Self {
        DashboardStatsRes {
            create_to_review: stats.create_to_review.into(),
            review_to_approve: stats.review_to_approve.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use td_core::ErrorKind;
    use td_types::GroupId;

    #[test]
    fn test_case_res_is_camel_case() {
        let record = CaseRecord::new(
            DocumentId::parse("case-1").unwrap(),
            DocumentId::parse("diag-1").unwrap(),
            UserId::parse("dr-a").unwrap(),
            UserId::parse("dr-r").unwrap(),
            GroupId::parse("grp-1").unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap(),
        );

        let json = serde_json::to_value(CaseRes::from(record)).unwrap();
        assert_eq!(json["caseDocId"], "case-1");
        assert_eq!(json["diagnosisDocId"], "diag-1");
        assert_eq!(json["status"], "WAITING_FOR_REVIEW");
        assert_eq!(json["createdAt"], "2026-02-01T12:00:00+00:00");
        assert!(json["patientUserId"].is_null());
    }

    #[test]
    fn test_create_case_req_rejects_bad_ids() {
        let req: CreateCaseReq = serde_json::from_value(serde_json::json!({
            "caseDocId": "case 1",
            "diagnosisDocId": "diag-1",
            "approverId": "dr-a",
            "reviewerId": "dr-r"
        }))
        .unwrap();
        let err = NewCase::try_from(req).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_associate_patient_req_requires_fields() {
        let req = AssociatePatientReq {
            email: "  ".into(),
            name: "Pat".into(),
        };
        assert!(NewPatient::try_from(req).is_err());
    }
}
