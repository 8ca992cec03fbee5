//! # TrueDiagnostics Core
//!
//! Case review workflow logic for the TrueDiagnostics sample application.
//!
//! This crate contains the workflow rules and the non-PII case metadata:
//! - Roles, capabilities and the per-request [`Session`] context
//! - The case state machine (`WAITING_FOR_REVIEW` → `WAITING_FOR_APPROVAL` → `APPROVED`)
//! - Per-case access group provisioning on the vault
//! - Case metadata storage (in memory or as sharded YAML files under the data directory)
//! - Patient notifications sent through the vault's templated email
//! - Admin dashboard statistics
//!
//! All personally identifiable data (patient details, diagnoses, images, email addresses) lives
//! in the vault and is only ever read or written with the acting user's own credential.
//!
//! **No API concerns**: HTTP routing and wire DTOs belong in `api-rest` and `api-shared`.

pub mod account;
pub mod case;
pub mod config;
pub mod constants;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod repositories;
pub mod role;
pub mod session;
pub mod stats;

pub use case::{
    CaseDetails, CaseDocument, CaseRecord, CaseStatus, CaseSubmission, CaseView,
    DiagnosisDocument, DoctorInbox, InboxEntry, NewCase, NewPatient,
};
pub use config::{CoreConfig, EmailConfig};
pub use error::{CaseError, CaseResult, ErrorKind};
pub use lifecycle::CaseService;
pub use notify::{Notification, Notifier, VaultEmailNotifier};
pub use repositories::{CaseMetadataStore, FileCaseStore, MemoryCaseStore};
pub use role::{Capability, Role};
pub use session::Session;
pub use stats::{format_duration, DashboardStats, DoctorResponseTime, StageStats};

pub use td_vault::policy::{Activity, GroupPolicy, GroupPolicyBuilder};
