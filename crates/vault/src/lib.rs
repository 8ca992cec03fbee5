//! # TrueDiagnostics Vault
//!
//! Boundary to the external vault provider that holds all personally identifiable data:
//! identities, groups, documents, blobs and templated email.
//!
//! - [`VaultClient`]: the operations the workflow consumes, each performed with the acting
//!   user's credential so the vault's own group policies decide what is allowed
//! - [`policy`]: group policy builder and resource-path helpers
//! - [`http::HttpVaultClient`]: HTTPS client for the TrueVault v1 API
//! - [`memory::MemoryVault`]: in-process vault that enforces group policies, for tests and demos
//! - [`upload`]: concurrent blob upload with a progress channel
//!
//! **No workflow concerns**: case state, roles and notifications belong in `td-core`.

pub mod http;
pub mod memory;
pub mod model;
pub mod policy;
pub mod upload;

mod client;

pub use client::VaultClient;
pub use model::{
    BlobUpload, CreatedUser, Group, NewUser, SentEmail, StoredDocument, TemplatedEmail,
    ValueSpec, VaultUser,
};
pub use policy::{Activity, GroupPolicy, GroupPolicyBuilder, PolicyEntry};
pub use upload::{upload_blobs, BlobProgress, UploadProgress};

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("vault API error ({kind}): {message}")]
    Api { kind: String, message: String },
    #[error("vault request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("vault returned HTTP {status}")]
    Status { status: u16 },
    #[error("non-JSON response from vault: {0}")]
    NonJsonResponse(String),
    #[error("failed to decode vault payload: {0}")]
    Decode(String),
    #[error("failed to (de)serialize vault payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid or expired credential")]
    Unauthenticated,
    #[error("permission denied: {activity} on {resource}")]
    PermissionDenied { activity: Activity, resource: String },
    /// The provider refused the call (HTTP 403) without naming the activity.
    #[error("access denied by vault: {0}")]
    Denied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type VaultResult<T> = std::result::Result<T, VaultError>;
