//! Case lifecycle management.
//!
//! [`CaseService`] enforces the case state machine and the identity rules that apply at each
//! transition, and provisions the per-case vault groups that make the vault itself enforce who
//! may read or change a case:
//!
//! - `case-<caseDocId>-read`: approver and reviewer (and later the patient) may read the case
//!   document, the diagnosis document and every attached image
//! - `case-<caseDocId>-reviewer`: only the reviewer may update the diagnosis document
//!
//! Independent vault and store calls are issued concurrently and joined all-or-nothing. Calls
//! that already succeeded are not undone when another one fails.

use crate::case::{
    ensure_distinct_doctors, CaseDocument, CaseRecord, CaseStatus, CaseSubmission, CaseView,
    DiagnosisDocument, DoctorInbox, InboxEntry, NewCase, NewPatient,
};
use crate::config::CoreConfig;
use crate::constants::{EMAIL_ATTRIBUTE, NAME_ATTRIBUTE, ROLE_ATTRIBUTE};
use crate::notify::{Notification, Notifier};
use crate::repositories::CaseMetadataStore;
use crate::role::{Capability, Role};
use crate::session::Session;
use crate::stats::DashboardStats;
use crate::{CaseError, CaseResult};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use td_types::{AccessToken, DocumentId, UserId};
use td_vault::policy::{resources, GroupPolicy, GroupPolicyBuilder};
use td_vault::{upload_blobs, NewUser, StoredDocument, UploadProgress, VaultClient};
use tokio::sync::mpsc;

/// Name of the group granting read access to one case.
pub fn read_group_name(case_doc_id: &DocumentId) -> String {
    format!("case-{case_doc_id}-read")
}

/// Name of the group granting the reviewer write access to one diagnosis.
pub fn reviewer_group_name(case_doc_id: &DocumentId) -> String {
    format!("case-{case_doc_id}-reviewer")
}

/// Read access to the case document, the diagnosis document and every image of a case.
pub fn case_read_policy(cfg: &CoreConfig, new_case: &NewCase) -> GroupPolicy {
    let vault_id = cfg.cases_vault_id();
    GroupPolicyBuilder::new()
        .read([
            resources::document(vault_id, &new_case.case_doc_id),
            resources::document(vault_id, &new_case.diagnosis_doc_id),
        ])
        .read(
            new_case
                .blob_ids
                .iter()
                .map(|blob_id| resources::blob(vault_id, blob_id)),
        )
        .build()
}

/// Update access to the diagnosis document only. The approver never gets this.
pub fn case_reviewer_policy(cfg: &CoreConfig, new_case: &NewCase) -> GroupPolicy {
    GroupPolicyBuilder::new()
        .update([resources::document(
            cfg.cases_vault_id(),
            &new_case.diagnosis_doc_id,
        )])
        .build()
}

#[derive(Clone)]
pub struct CaseService {
    cfg: Arc<CoreConfig>,
    vault: Arc<dyn VaultClient>,
    store: Arc<dyn CaseMetadataStore>,
    notifier: Arc<dyn Notifier>,
}

impl CaseService {
    pub fn new(
        cfg: Arc<CoreConfig>,
        vault: Arc<dyn VaultClient>,
        store: Arc<dyn CaseMetadataStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            cfg,
            vault,
            store,
            notifier,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    /// Establishes the caller's session from their vault credential.
    pub async fn session(&self, token: AccessToken) -> CaseResult<Session> {
        Session::establish(self.vault.as_ref(), token).await
    }

    async fn load(&self, case_doc_id: &DocumentId) -> CaseResult<CaseRecord> {
        self.store
            .get(case_doc_id)
            .await?
            .ok_or_else(|| CaseError::CaseNotFound(case_doc_id.clone()))
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    /// Creates a case from vault documents that already exist.
    ///
    /// Creates the read group first (the metadata row references it), then creates the
    /// reviewer group and inserts the row concurrently.
    ///
    /// # Errors
    ///
    /// - `CaseError::Forbidden` unless the caller may create cases
    /// - `CaseError::InvalidAssignment` if approver and reviewer are the same user; nothing
    ///   is created in that case
    /// - `CaseError::Vault` / store errors from the individual steps
    pub async fn create_case(&self, session: &Session, new_case: NewCase) -> CaseResult<CaseRecord> {
        session.require(Capability::CreateCase)?;
        ensure_distinct_doctors(&new_case.approver_id, &new_case.reviewer_id)?;

        let token = session.token();
        let doctors = [new_case.approver_id.clone(), new_case.reviewer_id.clone()];
        let read_group = self
            .vault
            .create_group(
                token,
                &read_group_name(&new_case.case_doc_id),
                &case_read_policy(&self.cfg, &new_case),
                &doctors,
            )
            .await?;

        let record = CaseRecord::new(
            new_case.case_doc_id.clone(),
            new_case.diagnosis_doc_id.clone(),
            new_case.approver_id.clone(),
            new_case.reviewer_id.clone(),
            read_group.id,
            Utc::now(),
        );

        let reviewer_policy = case_reviewer_policy(&self.cfg, &new_case);
        let reviewer_group_name = reviewer_group_name(&new_case.case_doc_id);
        let reviewer = std::slice::from_ref(&new_case.reviewer_id);
        tokio::try_join!(
            async {
                self.vault
                    .create_group(token, &reviewer_group_name, &reviewer_policy, reviewer)
                    .await
                    .map_err(CaseError::from)
            },
            self.store.insert(record.clone()),
        )?;

        tracing::info!(
            "case {} created: reviewer={} approver={}",
            record.case_doc_id,
            record.reviewer_id,
            record.approver_id
        );
        Ok(record)
    }

    /// Uploads the case images, creates the case and (empty) diagnosis documents, then
    /// creates the case.
    ///
    /// Upload progress is reported on `progress`, if given. Vault objects created before a
    /// failing step are left in place.
    pub async fn submit_case(
        &self,
        session: &Session,
        submission: CaseSubmission,
        progress: Option<mpsc::UnboundedSender<UploadProgress>>,
    ) -> CaseResult<CaseRecord> {
        session.require(Capability::CreateCase)?;
        ensure_distinct_doctors(&submission.approver_id, &submission.reviewer_id)?;

        let token = session.token();
        let vault_id = self.cfg.cases_vault_id();
        let blob_ids = upload_blobs(
            self.vault.as_ref(),
            token,
            vault_id,
            submission.images,
            progress,
        )
        .await?;

        let document = CaseDocument {
            details: submission.details,
            case_image_ids: blob_ids.clone(),
        };
        let case_json = serde_json::to_value(&document).map_err(CaseError::DocumentEncode)?;
        let empty_diagnosis = Value::Object(Map::new());

        let (case_doc_id, diagnosis_doc_id) = tokio::try_join!(
            self.vault
                .create_document(token, vault_id, self.cfg.cases_schema_id(), &case_json),
            self.vault
                .create_document(token, vault_id, None, &empty_diagnosis),
        )?;
        tracing::debug!(
            "case document {} and diagnosis document {} created",
            case_doc_id,
            diagnosis_doc_id
        );

        self.create_case(
            session,
            NewCase {
                case_doc_id,
                diagnosis_doc_id,
                approver_id: submission.approver_id,
                reviewer_id: submission.reviewer_id,
                blob_ids,
            },
        )
        .await
    }

    /// Records the reviewer's diagnosis and moves the case to `WAITING_FOR_APPROVAL`.
    ///
    /// The diagnosis is written with the reviewer's own credential, so the vault rejects it
    /// unless the caller is in the case's reviewer group. A case already waiting for approval
    /// may be reviewed again: the diagnosis is replaced and the first review time is kept.
    ///
    /// # Errors
    ///
    /// - `CaseError::NotAssigned` unless the caller is the case's reviewer
    /// - `CaseError::InvalidState` if the case is approved
    pub async fn review_case(
        &self,
        session: &Session,
        case_doc_id: &DocumentId,
        diagnosis: DiagnosisDocument,
    ) -> CaseResult<CaseRecord> {
        session.require(Capability::ReviewCase)?;
        let record = self.load(case_doc_id).await?;
        if &record.reviewer_id != session.user_id() {
            return Err(CaseError::NotAssigned {
                user: session.user_id().clone(),
                duty: "reviewer",
                case: case_doc_id.clone(),
            });
        }
        record.status.after_review()?;
        if record.status == CaseStatus::WaitingForApproval {
            tracing::warn!(
                "case {} reviewed again by {}; replacing the existing diagnosis",
                case_doc_id,
                session.user_id()
            );
        }

        let body = serde_json::to_value(&diagnosis).map_err(CaseError::DocumentEncode)?;
        let (_, updated) = tokio::try_join!(
            async {
                self.vault
                    .update_document(
                        session.token(),
                        self.cfg.cases_vault_id(),
                        &record.diagnosis_doc_id,
                        &body,
                    )
                    .await
                    .map_err(CaseError::from)
            },
            self.store.mark_reviewed(case_doc_id, Utc::now()),
        )?;

        tracing::info!("case {} reviewed: status={}", case_doc_id, updated.status);
        Ok(updated)
    }

    /// Approves a reviewed case and notifies its patient, if one is associated.
    ///
    /// The approval is stored before the notification is sent. If sending fails the case stays
    /// approved and `CaseError::NotificationFailed` is returned.
    ///
    /// # Errors
    ///
    /// - `CaseError::NotAssigned` unless the caller is the case's approver
    /// - `CaseError::InvalidState` unless the case is waiting for approval
    /// - `CaseError::NotificationFailed` if the patient could not be notified
    pub async fn approve_case(
        &self,
        session: &Session,
        case_doc_id: &DocumentId,
    ) -> CaseResult<CaseRecord> {
        session.require(Capability::ApproveCase)?;
        let record = self.load(case_doc_id).await?;
        if &record.approver_id != session.user_id() {
            return Err(CaseError::NotAssigned {
                user: session.user_id().clone(),
                duty: "approver",
                case: case_doc_id.clone(),
            });
        }
        record.status.after_approval()?;

        let updated = self.store.mark_approved(case_doc_id, Utc::now()).await?;
        tracing::info!("case {} approved by {}", case_doc_id, session.user_id());

        if let Some(patient) = &updated.patient_user_id {
            self.notifier
                .notify(session, patient, Notification::CaseApproved)
                .await
                .map_err(|err| {
                    tracing::error!(
                        "case {} approved but notifying patient {} failed: {:?}",
                        case_doc_id,
                        patient,
                        err
                    );
                    CaseError::NotificationFailed {
                        case: case_doc_id.clone(),
                        source: Box::new(err),
                    }
                })?;
        }

        Ok(updated)
    }

    /// Creates a patient identity for a case and invites them.
    ///
    /// The patient joins the global patients group and the case's read group, so they can read
    /// their own case and nothing else. The invitation carries the new identity's API key as a
    /// one-time credential.
    ///
    /// # Errors
    ///
    /// - `CaseError::PatientAlreadyAssociated` if the case already has a patient; no identity
    ///   is created in that case
    /// - `CaseError::NotificationFailed` if the invitation could not be sent
    pub async fn associate_patient(
        &self,
        session: &Session,
        case_doc_id: &DocumentId,
        patient: NewPatient,
    ) -> CaseResult<CaseRecord> {
        session.require(Capability::AssociatePatient)?;
        let record = self.load(case_doc_id).await?;
        if let Some(existing) = &record.patient_user_id {
            tracing::warn!(
                "refusing to replace patient {} on case {}",
                existing,
                case_doc_id
            );
            return Err(CaseError::PatientAlreadyAssociated(case_doc_id.clone()));
        }

        let token = session.token();
        let mut attributes = Map::new();
        attributes.insert(EMAIL_ATTRIBUTE.to_owned(), Value::from(patient.email.as_str()));
        attributes.insert(ROLE_ATTRIBUTE.to_owned(), Value::from(Role::Patient.as_str()));
        attributes.insert(NAME_ATTRIBUTE.to_owned(), Value::from(patient.name.as_str()));
        let created = self
            .vault
            .create_user(
                token,
                NewUser {
                    username: patient.email.as_str().to_owned(),
                    password: None,
                    attributes,
                },
            )
            .await?;
        let patient_id = created.id;
        let credential = created
            .api_key
            .ok_or_else(|| CaseError::MissingCredential(patient_id.clone()))?;

        let members = std::slice::from_ref(&patient_id);
        let (_, _, updated) = tokio::try_join!(
            async {
                self.vault
                    .add_users_to_group(token, self.cfg.patients_group_id(), members)
                    .await
                    .map_err(CaseError::from)
            },
            async {
                self.vault
                    .add_users_to_group(token, &record.read_group_id, members)
                    .await
                    .map_err(CaseError::from)
            },
            self.store.set_patient(case_doc_id, &patient_id),
        )?;
        tracing::info!("patient {} associated with case {}", patient_id, case_doc_id);

        self.notifier
            .notify(
                session,
                &patient_id,
                Notification::PatientInvite { credential },
            )
            .await
            .map_err(|err| CaseError::NotificationFailed {
                case: case_doc_id.clone(),
                source: Box::new(err),
            })?;

        Ok(updated)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Cases waiting on the calling doctor.
    pub async fn assigned_cases(&self, session: &Session) -> CaseResult<Vec<CaseRecord>> {
        session.require(Capability::ListAssignedCases)?;
        self.store.list_assigned(session.user_id()).await
    }

    /// The calling patient's case.
    pub async fn patient_case(&self, session: &Session) -> CaseResult<CaseRecord> {
        session.require(Capability::ReadOwnCase)?;
        self.store
            .find_by_patient(session.user_id())
            .await?
            .ok_or_else(|| CaseError::NoPatientCase(session.user_id().clone()))
    }

    /// Metadata for the given cases; unknown ids are skipped.
    pub async fn cases_by_ids(
        &self,
        session: &Session,
        case_doc_ids: &[DocumentId],
    ) -> CaseResult<Vec<CaseRecord>> {
        session.require(Capability::ReadCaseMetadata)?;
        self.store.get_many(case_doc_ids).await
    }

    /// The calling doctor's assigned cases with their case documents, split by what the
    /// doctor has to do next.
    pub async fn doctor_inbox(&self, session: &Session) -> CaseResult<DoctorInbox> {
        let assigned = self.assigned_cases(session).await?;
        if assigned.is_empty() {
            return Ok(DoctorInbox::default());
        }

        let ids: Vec<DocumentId> = assigned.iter().map(|r| r.case_doc_id.clone()).collect();
        let documents = self
            .vault
            .get_documents(session.token(), self.cfg.cases_vault_id(), &ids)
            .await?;
        let mut by_id: HashMap<DocumentId, StoredDocument> = documents
            .into_iter()
            .map(|doc| (doc.id.clone(), doc))
            .collect();

        let mut inbox = DoctorInbox::default();
        for record in assigned {
            let Some(stored) = by_id.remove(&record.case_doc_id) else {
                tracing::warn!("case document {} missing from vault", record.case_doc_id);
                continue;
            };
            let entry = InboxEntry {
                case: decode(stored)?,
                record,
            };
            if entry.record.status == CaseStatus::WaitingForReview {
                inbox.to_review.push(entry);
            } else {
                inbox.to_approve.push(entry);
            }
        }
        Ok(inbox)
    }

    /// A case with its documents, for one of its participants or an admin.
    ///
    /// # Errors
    ///
    /// Returns `CaseError::NotAssigned` if a doctor or patient asks for a case that is not
    /// theirs.
    pub async fn view_case(&self, session: &Session, case_doc_id: &DocumentId) -> CaseResult<CaseView> {
        let record = self.load(case_doc_id).await?;
        if !session.role().may_view_case(record.involves(session.user_id())) {
            return Err(CaseError::NotAssigned {
                user: session.user_id().clone(),
                duty: "participant",
                case: case_doc_id.clone(),
            });
        }

        let ids = [record.case_doc_id.clone(), record.diagnosis_doc_id.clone()];
        let mut documents = self
            .vault
            .get_documents(session.token(), self.cfg.cases_vault_id(), &ids)
            .await?
            .into_iter();
        let (Some(case), Some(diagnosis)) = (documents.next(), documents.next()) else {
            return Err(CaseError::Vault(td_vault::VaultError::NotFound(format!(
                "documents of case {case_doc_id}"
            ))));
        };

        let diagnosis: DiagnosisDocument = decode(diagnosis)?;
        Ok(CaseView {
            record,
            case: decode(case)?,
            diagnosis: (!diagnosis.is_empty()).then_some(diagnosis),
        })
    }

    /// Response-time statistics across all cases.
    pub async fn dashboard_stats(&self, session: &Session) -> CaseResult<DashboardStats> {
        session.require(Capability::ViewDashboardStats)?;
        let records = self.store.list_all().await?;
        Ok(DashboardStats::compute(&records))
    }
}

fn decode<T: DeserializeOwned>(stored: StoredDocument) -> CaseResult<T> {
    serde_json::from_value(stored.document).map_err(|source| CaseError::DocumentDecode {
        id: stored.id,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{provision_account, AccountSeed};
    use crate::case::CaseDetails;
    use crate::config::EmailConfig;
    use crate::notify::VaultEmailNotifier;
    use crate::repositories::MemoryCaseStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use td_types::{NonEmptyText, VaultId};
    use td_vault::memory::MemoryVault;
    use td_vault::{BlobUpload, VaultError};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(UserId, Notification)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            _session: &Session,
            recipient: &UserId,
            notification: Notification,
        ) -> CaseResult<()> {
            self.sent
                .lock()
                .await
                .push((recipient.clone(), notification));
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _: &Session, _: &UserId, _: Notification) -> CaseResult<()> {
            Err(CaseError::Vault(VaultError::Status { status: 503 }))
        }
    }

    struct Fixture {
        vault: Arc<MemoryVault>,
        store: Arc<MemoryCaseStore>,
        service: CaseService,
        admin: Session,
        doctors: Vec<Session>,
    }

    async fn fixture_with(notifier: Option<Arc<dyn Notifier>>) -> Fixture {
        let vault = Arc::new(MemoryVault::new());
        let vault_id = VaultId::parse("cases").unwrap();
        let mut seed = AccountSeed::new("test");
        seed.doctor_last_names = vec!["Johnson".into(), "Blackwell".into(), "Baker".into()];
        let account = provision_account(vault.as_ref(), vault.root_token(), &vault_id, &seed)
            .await
            .unwrap();

        let email = EmailConfig::new("sg-key", "tpl-invite", "tpl-approved", None).unwrap();
        let cfg = Arc::new(
            CoreConfig::new(
                PathBuf::from("unused"),
                vault_id,
                None,
                account.patients_group_id.clone(),
                email.clone(),
            )
            .unwrap(),
        );
        let store = Arc::new(MemoryCaseStore::new());
        let notifier = notifier.unwrap_or_else(|| {
            Arc::new(VaultEmailNotifier::new(vault.clone(), email)) as Arc<dyn Notifier>
        });
        let service = CaseService::new(cfg, vault.clone(), store.clone(), notifier);

        let admin = service
            .session(account.admin.api_key.clone().unwrap())
            .await
            .unwrap();
        let mut doctors = Vec::new();
        for doctor in &account.doctors {
            doctors.push(service.session(doctor.api_key.clone().unwrap()).await.unwrap());
        }

        Fixture {
            vault,
            store,
            service,
            admin,
            doctors,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(None).await
    }

    fn submission(approver: &Session, reviewer: &Session) -> CaseSubmission {
        CaseSubmission {
            details: CaseDetails {
                case_id: "00001".into(),
                patient_name: "James Smith".into(),
                sex: "M".into(),
                dob: NaiveDate::from_ymd_opt(1968, 3, 14).unwrap(),
                patient_height: 6,
                patient_weight: 180,
                due_date: NaiveDate::from_ymd_opt(2026, 11, 20).unwrap(),
            },
            approver_id: approver.user_id().clone(),
            reviewer_id: reviewer.user_id().clone(),
            images: vec![
                BlobUpload::new("hand.png", vec![7u8; 1024]),
                BlobUpload::new("spine.png", vec![9u8; 2048]),
            ],
        }
    }

    fn new_patient() -> NewPatient {
        NewPatient {
            email: NonEmptyText::new("james@example.com").unwrap(),
            name: NonEmptyText::new("James Smith").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_submit_case_provisions_groups_and_row() {
        let fx = fixture().await;
        let (approver, reviewer) = (&fx.doctors[0], &fx.doctors[1]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let record = fx
            .service
            .submit_case(&fx.admin, submission(approver, reviewer), Some(tx))
            .await
            .unwrap();

        assert_eq!(record.status, CaseStatus::WaitingForReview);
        assert!(record.reviewed_at.is_none());

        let read_members = fx.vault.group_members(&record.read_group_id).await.unwrap();
        assert_eq!(read_members.len(), 2);
        assert!(read_members.contains(approver.user_id()));
        assert!(read_members.contains(reviewer.user_id()));

        let reviewer_policy = fx
            .vault
            .group_policy_by_name(&reviewer_group_name(&record.case_doc_id))
            .await
            .unwrap();
        assert_eq!(reviewer_policy.entries().len(), 1);
        assert_eq!(reviewer_policy.entries()[0].activity, td_vault::Activity::Update);

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(UploadProgress {
                bytes_loaded: 3072,
                bytes_total: 3072
            })
        );
    }

    #[tokio::test]
    async fn test_same_doctor_creates_nothing() {
        let fx = fixture().await;
        let doctor = &fx.doctors[0];

        let err = fx
            .service
            .submit_case(&fx.admin, submission(doctor, doctor), None)
            .await
            .unwrap_err();

        assert!(matches!(err, CaseError::InvalidAssignment(_)));
        assert!(fx.store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_doctors_cannot_create_cases() {
        let fx = fixture().await;
        let err = fx
            .service
            .submit_case(&fx.doctors[0], submission(&fx.doctors[1], &fx.doctors[2]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CaseError::Forbidden { role: Role::Doctor, .. }));
    }

    #[tokio::test]
    async fn test_full_review_and_approval_flow() {
        let fx = fixture().await;
        let (approver, reviewer) = (&fx.doctors[0], &fx.doctors[1]);
        let record = fx
            .service
            .submit_case(&fx.admin, submission(approver, reviewer), None)
            .await
            .unwrap();
        let id = record.case_doc_id.clone();

        let inbox = fx.service.doctor_inbox(reviewer).await.unwrap();
        assert_eq!(inbox.to_review.len(), 1);
        assert_eq!(inbox.to_review[0].case.details.patient_name, "James Smith");
        assert!(inbox.to_approve.is_empty());

        // Approving before review is an invalid state.
        assert!(matches!(
            fx.service.approve_case(approver, &id).await,
            Err(CaseError::InvalidState { .. })
        ));

        let reviewed = fx
            .service
            .review_case(reviewer, &id, DiagnosisDocument::new("Osteoarthritis", "Both hands"))
            .await
            .unwrap();
        assert_eq!(reviewed.status, CaseStatus::WaitingForApproval);
        assert!(reviewed.reviewed_at.is_some());

        let view = fx.service.view_case(approver, &id).await.unwrap();
        assert_eq!(
            view.diagnosis.as_ref().map(|d| d.summary.as_str()),
            Some("Osteoarthritis")
        );

        // Only the assigned approver may sign off, even while the case is waiting for approval.
        let outsider = &fx.doctors[2];
        for doctor in [reviewer, outsider] {
            let err = fx.service.approve_case(doctor, &id).await.unwrap_err();
            assert!(matches!(err, CaseError::NotAssigned { duty: "approver", .. }));
            assert_eq!(err.kind(), crate::ErrorKind::Forbidden);
        }

        let approved = fx.service.approve_case(approver, &id).await.unwrap();
        assert_eq!(approved.status, CaseStatus::Approved);
        assert!(approved.approved_at >= approved.reviewed_at);

        let err = fx.service.approve_case(reviewer, &id).await.unwrap_err();
        assert!(matches!(err, CaseError::NotAssigned { duty: "approver", .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Forbidden);

        assert!(matches!(
            fx.service
                .review_case(reviewer, &id, DiagnosisDocument::new("late", ""))
                .await,
            Err(CaseError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_only_assigned_doctors_may_act() {
        let fx = fixture().await;
        let (approver, reviewer, outsider) = (&fx.doctors[0], &fx.doctors[1], &fx.doctors[2]);
        let id = fx
            .service
            .submit_case(&fx.admin, submission(approver, reviewer), None)
            .await
            .unwrap()
            .case_doc_id;

        for doctor in [approver, outsider] {
            assert!(matches!(
                fx.service
                    .review_case(doctor, &id, DiagnosisDocument::new("x", "y"))
                    .await,
                Err(CaseError::NotAssigned { duty: "reviewer", .. })
            ));
        }
        assert!(matches!(
            fx.service.view_case(outsider, &id).await,
            Err(CaseError::NotAssigned { .. })
        ));
    }

    #[tokio::test]
    async fn test_vault_blocks_approver_from_writing_diagnosis() {
        let fx = fixture().await;
        let (approver, reviewer) = (&fx.doctors[0], &fx.doctors[1]);
        let record = fx
            .service
            .submit_case(&fx.admin, submission(approver, reviewer), None)
            .await
            .unwrap();

        let tampered = fx
            .vault
            .update_document(
                approver.token(),
                fx.service.config().cases_vault_id(),
                &record.diagnosis_doc_id,
                &serde_json::json!({"summary": "forged"}),
            )
            .await;
        assert!(matches!(tampered, Err(VaultError::PermissionDenied { .. })));
    }

    #[tokio::test]
    async fn test_re_review_keeps_first_review_time() {
        let fx = fixture().await;
        let (approver, reviewer) = (&fx.doctors[0], &fx.doctors[1]);
        let id = fx
            .service
            .submit_case(&fx.admin, submission(approver, reviewer), None)
            .await
            .unwrap()
            .case_doc_id;

        let first = fx
            .service
            .review_case(reviewer, &id, DiagnosisDocument::new("First", ""))
            .await
            .unwrap();
        let second = fx
            .service
            .review_case(reviewer, &id, DiagnosisDocument::new("Second", ""))
            .await
            .unwrap();

        assert_eq!(second.status, CaseStatus::WaitingForApproval);
        assert_eq!(second.reviewed_at, first.reviewed_at);
        let view = fx.service.view_case(reviewer, &id).await.unwrap();
        assert_eq!(view.diagnosis.unwrap().summary, "Second");
    }

    #[tokio::test]
    async fn test_patient_invite_and_approval_emails() {
        let fx = fixture().await;
        let (approver, reviewer) = (&fx.doctors[0], &fx.doctors[1]);
        let id = fx
            .service
            .submit_case(&fx.admin, submission(approver, reviewer), None)
            .await
            .unwrap()
            .case_doc_id;

        let record = fx
            .service
            .associate_patient(&fx.admin, &id, new_patient())
            .await
            .unwrap();
        let patient_id = record.patient_user_id.clone().unwrap();

        let emails = fx.vault.sent_emails().await;
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].recipient, patient_id);
        assert_eq!(emails[0].template_id, "tpl-invite");
        assert_eq!(emails[0].to, "james@example.com");
        assert_eq!(emails[0].substitutions["{{name}}"], "James Smith");
        let credential = AccessToken::new(&emails[0].substitutions["{{api_key}}"]).unwrap();

        let patient = fx.service.session(credential).await.unwrap();
        assert_eq!(patient.role(), Role::Patient);
        assert_eq!(
            fx.service.patient_case(&patient).await.unwrap().case_doc_id,
            id
        );

        fx.service
            .review_case(reviewer, &id, DiagnosisDocument::new("Osteoarthritis", ""))
            .await
            .unwrap();
        fx.service.approve_case(approver, &id).await.unwrap();

        let emails = fx.vault.sent_emails().await;
        assert_eq!(emails.len(), 2);
        assert_eq!(emails[1].template_id, "tpl-approved");
        assert_eq!(emails[1].from, "sample-app@truevault.com");

        let view = fx.service.view_case(&patient, &id).await.unwrap();
        assert_eq!(view.case.details.patient_name, "James Smith");
    }

    #[tokio::test]
    async fn test_second_patient_is_rejected() {
        let fx = fixture().await;
        let id = fx
            .service
            .submit_case(&fx.admin, submission(&fx.doctors[0], &fx.doctors[1]), None)
            .await
            .unwrap()
            .case_doc_id;

        fx.service
            .associate_patient(&fx.admin, &id, new_patient())
            .await
            .unwrap();
        let err = fx
            .service
            .associate_patient(&fx.admin, &id, new_patient())
            .await
            .unwrap_err();
        assert!(matches!(err, CaseError::PatientAlreadyAssociated(_)));
        assert_eq!(err.kind(), crate::ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_failed_notification_keeps_approval() {
        let fx = fixture_with(Some(Arc::new(FailingNotifier))).await;
        let (approver, reviewer) = (&fx.doctors[0], &fx.doctors[1]);
        let id = fx
            .service
            .submit_case(&fx.admin, submission(approver, reviewer), None)
            .await
            .unwrap()
            .case_doc_id;
        fx.store
            .set_patient(&id, &UserId::parse("patient-x").unwrap())
            .await
            .unwrap();
        fx.service
            .review_case(reviewer, &id, DiagnosisDocument::new("Fine", ""))
            .await
            .unwrap();

        let err = fx.service.approve_case(approver, &id).await.unwrap_err();
        assert!(matches!(err, CaseError::NotificationFailed { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::UpstreamFailure);

        let stored = fx.store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, CaseStatus::Approved);
    }

    #[tokio::test]
    async fn test_approval_without_patient_sends_nothing() {
        let notifier = Arc::new(RecordingNotifier::default());
        let fx = fixture_with(Some(notifier.clone())).await;
        let (approver, reviewer) = (&fx.doctors[0], &fx.doctors[1]);
        let id = fx
            .service
            .submit_case(&fx.admin, submission(approver, reviewer), None)
            .await
            .unwrap()
            .case_doc_id;
        fx.service
            .review_case(reviewer, &id, DiagnosisDocument::new("Fine", ""))
            .await
            .unwrap();
        fx.service.approve_case(approver, &id).await.unwrap();

        assert!(notifier.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_dashboard_and_metadata_queries() {
        let fx = fixture().await;
        let (approver, reviewer) = (&fx.doctors[0], &fx.doctors[1]);
        let id = fx
            .service
            .submit_case(&fx.admin, submission(approver, reviewer), None)
            .await
            .unwrap()
            .case_doc_id;

        let stats = fx.service.dashboard_stats(&fx.admin).await.unwrap();
        assert_eq!(stats.create_to_review.cases_remaining, 1);
        assert!(matches!(
            fx.service.dashboard_stats(reviewer).await,
            Err(CaseError::Forbidden { .. })
        ));

        let found = fx
            .service
            .cases_by_ids(reviewer, &[id.clone()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(fx.service.assigned_cases(reviewer).await.unwrap().len(), 1);
        assert!(fx.service.assigned_cases(approver).await.unwrap().is_empty());

        let admin_view = fx.service.view_case(&fx.admin, &id).await.unwrap();
        assert!(admin_view.diagnosis.is_none());
    }
}
