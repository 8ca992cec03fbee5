use crate::case::CaseStatus;
use crate::role::{Capability, Role};
use std::fmt;
use td_types::{DocumentId, IdError, TextError, UserId};
use td_vault::VaultError;

/// Coarse error classification shared by every caller of the workflow.
///
/// Transports map these onto their own status codes; the variants of [`CaseError`] carry the
/// detail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidAssignment,
    Forbidden,
    InvalidState,
    UpstreamFailure,
    NotFound,
    Unauthenticated,
    InvalidInput,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    #[error("approver and reviewer must be different users (both were {0})")]
    InvalidAssignment(UserId),
    #[error("role {role} does not have capability {capability}")]
    Forbidden { role: Role, capability: Capability },
    #[error("user {user} is not the {duty} of case {case}")]
    NotAssigned {
        user: UserId,
        duty: &'static str,
        case: DocumentId,
    },
    #[error("cannot {action} a case in state {status}")]
    InvalidState {
        status: CaseStatus,
        action: &'static str,
    },
    #[error("case {0} already has an associated patient")]
    PatientAlreadyAssociated(DocumentId),
    #[error("case {0} not found")]
    CaseNotFound(DocumentId),
    #[error("no case is associated with patient {0}")]
    NoPatientCase(UserId),
    #[error("case {0} already exists")]
    DuplicateCase(DocumentId),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("vault did not return a credential for new user {0}")]
    MissingCredential(UserId),
    #[error("failed to decode vault document {id}: {source}")]
    DocumentDecode {
        id: DocumentId,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode vault document: {0}")]
    DocumentEncode(serde_json::Error),
    #[error("case {case} was updated but the patient notification failed: {source}")]
    NotificationFailed {
        case: DocumentId,
        #[source]
        source: Box<CaseError>,
    },

    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to write case file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to read case file: {0}")]
    FileRead(std::io::Error),
    #[error("case storage task failed: {0}")]
    StorageTask(#[from] tokio::task::JoinError),
    #[error("failed to serialize YAML: {0}")]
    YamlSerialization(serde_yaml::Error),
    #[error("failed to deserialize YAML: {0}")]
    YamlDeserialization(serde_yaml::Error),
}

impl CaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAssignment(_) => ErrorKind::InvalidAssignment,
            Self::Forbidden { .. } | Self::NotAssigned { .. } => ErrorKind::Forbidden,
            Self::InvalidState { .. } | Self::PatientAlreadyAssociated(_) => {
                ErrorKind::InvalidState
            }
            Self::CaseNotFound(_) | Self::NoPatientCase(_) => ErrorKind::NotFound,
            Self::DuplicateCase(_) | Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::Vault(err) => vault_error_kind(err),
            Self::MissingCredential(_)
            | Self::DocumentDecode { .. }
            | Self::NotificationFailed { .. } => ErrorKind::UpstreamFailure,
            Self::DocumentEncode(_)
            | Self::StorageDirCreation(_)
            | Self::FileWrite(_)
            | Self::FileRead(_)
            | Self::StorageTask(_)
            | Self::YamlSerialization(_)
            | Self::YamlDeserialization(_) => ErrorKind::Internal,
        }
    }
}

fn vault_error_kind(err: &VaultError) -> ErrorKind {
    match err {
        VaultError::PermissionDenied { .. } | VaultError::Denied(_) => ErrorKind::Forbidden,
        VaultError::Unauthenticated => ErrorKind::Unauthenticated,
        VaultError::NotFound(_) => ErrorKind::NotFound,
        VaultError::InvalidInput(_) | VaultError::Conflict(_) => ErrorKind::InvalidInput,
        VaultError::Api { .. }
        | VaultError::Http(_)
        | VaultError::Status { .. }
        | VaultError::NonJsonResponse(_)
        | VaultError::Decode(_)
        | VaultError::Json(_) => ErrorKind::UpstreamFailure,
    }
}

impl From<IdError> for CaseError {
    fn from(err: IdError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<TextError> for CaseError {
    fn from(err: TextError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

pub type CaseResult<T> = std::result::Result<T, CaseError>;
