use crate::model::{
    BlobUpload, CreatedUser, Group, NewUser, StoredDocument, TemplatedEmail, VaultUser,
};
use crate::policy::GroupPolicy;
use crate::upload::BlobProgress;
use crate::VaultResult;
use async_trait::async_trait;
use serde_json::Value;
use td_types::{AccessToken, BlobId, DocumentId, GroupId, SchemaId, UserId, VaultId};

/// Operations consumed from the vault provider.
///
/// Every call carries the credential of the user it is made on behalf of. Authorisation is the
/// vault's job: a call the caller's group policies do not allow fails with
/// [`crate::VaultError::PermissionDenied`] or [`crate::VaultError::Denied`].
#[async_trait]
pub trait VaultClient: Send + Sync {
    /// Reads the user owning `token`, including attributes.
    async fn read_current_user(&self, token: &AccessToken) -> VaultResult<VaultUser>;

    async fn list_users(&self, token: &AccessToken) -> VaultResult<Vec<VaultUser>>;

    async fn create_user(&self, token: &AccessToken, user: NewUser) -> VaultResult<CreatedUser>;

    async fn create_document(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        schema_id: Option<&SchemaId>,
        document: &Value,
    ) -> VaultResult<DocumentId>;

    async fn update_document(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        document_id: &DocumentId,
        document: &Value,
    ) -> VaultResult<()>;

    /// Fetches documents, returned in the order requested.
    async fn get_documents(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        document_ids: &[DocumentId],
    ) -> VaultResult<Vec<StoredDocument>>;

    /// Uploads one blob, reporting cumulative bytes sent through `progress` if given.
    async fn create_blob(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        blob: BlobUpload,
        progress: Option<BlobProgress>,
    ) -> VaultResult<BlobId>;

    async fn get_blob(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        blob_id: &BlobId,
    ) -> VaultResult<Vec<u8>>;

    async fn create_group(
        &self,
        token: &AccessToken,
        name: &str,
        policy: &GroupPolicy,
        members: &[UserId],
    ) -> VaultResult<Group>;

    async fn add_users_to_group(
        &self,
        token: &AccessToken,
        group_id: &GroupId,
        user_ids: &[UserId],
    ) -> VaultResult<()>;

    /// Sends a templated email to `recipient` and returns the provider's message id.
    async fn send_email(
        &self,
        token: &AccessToken,
        recipient: &UserId,
        email: &TemplatedEmail,
    ) -> VaultResult<String>;
}
