//! In-process vault.
//!
//! `MemoryVault` keeps identities, groups, documents and blobs in memory and enforces group
//! policies the way the hosted provider does: a user may perform an activity on a resource only
//! if some group they belong to grants it. A root credential (see [`MemoryVault::root_token`])
//! bypasses policy checks and stands in for the account's full-admin API key.
//!
//! Emails are not delivered; they are resolved and recorded (see [`MemoryVault::sent_emails`]).

use crate::model::{
    BlobUpload, CreatedUser, Group, NewUser, SentEmail, StoredDocument, TemplatedEmail,
    ValueSpec, VaultUser,
};
use crate::policy::{resources, Activity, GroupPolicy};
use crate::upload::BlobProgress;
use crate::{VaultClient, VaultError, VaultResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use td_types::{AccessToken, BlobId, DocumentId, GroupId, SchemaId, UserId, VaultId};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Chunk size used when simulating upload progress.
pub const PROGRESS_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Caller {
    Root,
    User(UserId),
}

#[derive(Debug)]
struct StoredUser {
    user: VaultUser,
}

#[derive(Debug)]
struct StoredGroup {
    name: String,
    policy: GroupPolicy,
    members: BTreeSet<UserId>,
}

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<UserId, StoredUser>,
    tokens: HashMap<String, Caller>,
    groups: BTreeMap<GroupId, StoredGroup>,
    documents: HashMap<(VaultId, DocumentId), Value>,
    blobs: HashMap<(VaultId, BlobId), Vec<u8>>,
    outbox: Vec<SentEmail>,
}

impl State {
    fn caller(&self, token: &AccessToken) -> VaultResult<Caller> {
        self.tokens
            .get(token.expose())
            .cloned()
            .ok_or(VaultError::Unauthenticated)
    }

    fn authorize(&self, caller: &Caller, activity: Activity, resource: &str) -> VaultResult<()> {
        let user_id = match caller {
            Caller::Root => return Ok(()),
            Caller::User(id) => id,
        };

        let allowed = self
            .groups
            .values()
            .filter(|group| group.members.contains(user_id))
            .any(|group| group.policy.permits(activity, resource, user_id));

        if allowed {
            Ok(())
        } else {
            Err(VaultError::PermissionDenied {
                activity,
                resource: resource.to_owned(),
            })
        }
    }

    fn check(&self, token: &AccessToken, activity: Activity, resource: &str) -> VaultResult<()> {
        let caller = self.caller(token)?;
        self.authorize(&caller, activity, resource)
    }

    fn resolve(&self, recipient: &VaultUser, spec: &ValueSpec) -> VaultResult<String> {
        match spec {
            ValueSpec::LiteralValue(value) => Ok(value.clone()),
            ValueSpec::UserAttribute(key) => recipient
                .attribute(key)
                .map(str::to_owned)
                .ok_or_else(|| {
                    VaultError::InvalidInput(format!(
                        "user {} has no attribute {key}",
                        recipient.id
                    ))
                }),
        }
    }
}

/// In-memory [`VaultClient`] with real policy enforcement.
pub struct MemoryVault {
    state: Mutex<State>,
    root: AccessToken,
}

impl Default for MemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVault {
    pub fn new() -> Self {
        let mut state = State::default();
        let root = new_secret("root");
        state.tokens.insert(root.expose().to_owned(), Caller::Root);
        Self {
            state: Mutex::new(state),
            root,
        }
    }

    /// Full-admin credential that bypasses group policies.
    pub fn root_token(&self) -> &AccessToken {
        &self.root
    }

    /// Emails accepted so far, oldest first.
    pub async fn sent_emails(&self) -> Vec<SentEmail> {
        self.state.lock().await.outbox.clone()
    }

    /// Reads a document without any policy check.
    pub async fn peek_document(&self, vault_id: &VaultId, document_id: &DocumentId) -> Option<Value> {
        self.state
            .lock()
            .await
            .documents
            .get(&(vault_id.clone(), document_id.clone()))
            .cloned()
    }

    /// Members of a group, without any policy check.
    pub async fn group_members(&self, group_id: &GroupId) -> Option<Vec<UserId>> {
        self.state
            .lock()
            .await
            .groups
            .get(group_id)
            .map(|group| group.members.iter().cloned().collect())
    }

    /// Policy of a group looked up by name, without any policy check.
    pub async fn group_policy_by_name(&self, name: &str) -> Option<GroupPolicy> {
        self.state
            .lock()
            .await
            .groups
            .values()
            .find(|group| group.name == name)
            .map(|group| group.policy.clone())
    }
}

fn new_id<T>() -> VaultResult<T>
where
    T: TryFrom<String, Error = td_types::IdError>,
{
    T::try_from(Uuid::new_v4().to_string()).map_err(|e| VaultError::InvalidInput(e.to_string()))
}

fn new_secret(prefix: &str) -> AccessToken {
    AccessToken::generated(prefix, Uuid::new_v4().simple())
}

#[async_trait]
impl VaultClient for MemoryVault {
    async fn read_current_user(&self, token: &AccessToken) -> VaultResult<VaultUser> {
        let state = self.state.lock().await;
        match state.caller(token)? {
            Caller::Root => Err(VaultError::InvalidInput(
                "the account credential is not bound to a user".into(),
            )),
            Caller::User(id) => state
                .users
                .get(&id)
                .map(|stored| stored.user.clone())
                .ok_or_else(|| VaultError::NotFound(format!("user {id}"))),
        }
    }

    async fn list_users(&self, token: &AccessToken) -> VaultResult<Vec<VaultUser>> {
        let state = self.state.lock().await;
        let caller = state.caller(token)?;
        state.authorize(&caller, Activity::Read, &resources::users())?;

        Ok(state
            .users
            .values()
            .filter(|stored| {
                state
                    .authorize(&caller, Activity::Read, &resources::user(&stored.user.id))
                    .is_ok()
            })
            .map(|stored| stored.user.clone())
            .collect())
    }

    async fn create_user(&self, token: &AccessToken, user: NewUser) -> VaultResult<CreatedUser> {
        let mut state = self.state.lock().await;
        state.check(token, Activity::Create, &resources::users())?;

        if state
            .users
            .values()
            .any(|stored| stored.user.username == user.username)
        {
            return Err(VaultError::Conflict(format!(
                "username already exists: {}",
                user.username
            )));
        }

        let id = new_id::<UserId>()?;
        let api_key = new_secret("apikey");
        state
            .tokens
            .insert(api_key.expose().to_owned(), Caller::User(id.clone()));
        state.users.insert(
            id.clone(),
            StoredUser {
                user: VaultUser {
                    id: id.clone(),
                    username: user.username.clone(),
                    attributes: user.attributes,
                },
            },
        );

        Ok(CreatedUser {
            id,
            username: user.username,
            api_key: Some(api_key),
        })
    }

    async fn create_document(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        _schema_id: Option<&SchemaId>,
        document: &Value,
    ) -> VaultResult<DocumentId> {
        let mut state = self.state.lock().await;
        state.check(token, Activity::Create, &resources::documents(vault_id))?;

        let id = new_id::<DocumentId>()?;
        state
            .documents
            .insert((vault_id.clone(), id.clone()), document.clone());
        Ok(id)
    }

    async fn update_document(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        document_id: &DocumentId,
        document: &Value,
    ) -> VaultResult<()> {
        let mut state = self.state.lock().await;
        state.check(
            token,
            Activity::Update,
            &resources::document(vault_id, document_id),
        )?;

        match state
            .documents
            .get_mut(&(vault_id.clone(), document_id.clone()))
        {
            Some(existing) => {
                *existing = document.clone();
                Ok(())
            }
            None => Err(VaultError::NotFound(format!("document {document_id}"))),
        }
    }

    async fn get_documents(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        document_ids: &[DocumentId],
    ) -> VaultResult<Vec<StoredDocument>> {
        let state = self.state.lock().await;
        let caller = state.caller(token)?;

        document_ids
            .iter()
            .map(|id| {
                state.authorize(&caller, Activity::Read, &resources::document(vault_id, id))?;
                state
                    .documents
                    .get(&(vault_id.clone(), id.clone()))
                    .map(|document| StoredDocument {
                        id: id.clone(),
                        document: document.clone(),
                    })
                    .ok_or_else(|| VaultError::NotFound(format!("document {id}")))
            })
            .collect()
    }

    async fn create_blob(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        blob: BlobUpload,
        progress: Option<BlobProgress>,
    ) -> VaultResult<BlobId> {
        self.state
            .lock()
            .await
            .check(token, Activity::Create, &resources::blobs(vault_id))?;

        if let Some(progress) = &progress {
            let mut sent = 0u64;
            for chunk in blob.bytes.chunks(PROGRESS_CHUNK_SIZE) {
                sent += chunk.len() as u64;
                progress.report(sent);
                tokio::task::yield_now().await;
            }
        }

        let id = new_id::<BlobId>()?;
        self.state
            .lock()
            .await
            .blobs
            .insert((vault_id.clone(), id.clone()), blob.bytes);
        Ok(id)
    }

    async fn get_blob(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        blob_id: &BlobId,
    ) -> VaultResult<Vec<u8>> {
        let state = self.state.lock().await;
        state.check(token, Activity::Read, &resources::blob(vault_id, blob_id))?;
        state
            .blobs
            .get(&(vault_id.clone(), blob_id.clone()))
            .cloned()
            .ok_or_else(|| VaultError::NotFound(format!("blob {blob_id}")))
    }

    async fn create_group(
        &self,
        token: &AccessToken,
        name: &str,
        policy: &GroupPolicy,
        members: &[UserId],
    ) -> VaultResult<Group> {
        let mut state = self.state.lock().await;
        state.check(token, Activity::Create, &resources::groups())?;

        if state.groups.values().any(|group| group.name == name) {
            return Err(VaultError::Conflict(format!(
                "group name already exists: {name}"
            )));
        }
        if let Some(missing) = members.iter().find(|id| !state.users.contains_key(*id)) {
            return Err(VaultError::NotFound(format!("user {missing}")));
        }

        let id = new_id::<GroupId>()?;
        state.groups.insert(
            id.clone(),
            StoredGroup {
                name: name.to_owned(),
                policy: policy.clone(),
                members: members.iter().cloned().collect(),
            },
        );

        Ok(Group {
            id,
            name: name.to_owned(),
        })
    }

    async fn add_users_to_group(
        &self,
        token: &AccessToken,
        group_id: &GroupId,
        user_ids: &[UserId],
    ) -> VaultResult<()> {
        let mut state = self.state.lock().await;
        let caller = state.caller(token)?;
        for user_id in user_ids {
            state.authorize(
                &caller,
                Activity::Create,
                &resources::group_membership(group_id, user_id),
            )?;
            if !state.users.contains_key(user_id) {
                return Err(VaultError::NotFound(format!("user {user_id}")));
            }
        }

        let group = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| VaultError::NotFound(format!("group {group_id}")))?;
        group.members.extend(user_ids.iter().cloned());
        Ok(())
    }

    async fn send_email(
        &self,
        token: &AccessToken,
        recipient: &UserId,
        email: &TemplatedEmail,
    ) -> VaultResult<String> {
        let mut state = self.state.lock().await;
        state.check(token, Activity::Create, &resources::user_messages(recipient))?;

        let recipient_user = state
            .users
            .get(recipient)
            .map(|stored| stored.user.clone())
            .ok_or_else(|| VaultError::NotFound(format!("user {recipient}")))?;

        let substitutions = email
            .substitutions
            .iter()
            .map(|(key, spec)| -> VaultResult<(String, String)> {
                Ok((key.clone(), state.resolve(&recipient_user, spec)?))
            })
            .collect::<VaultResult<BTreeMap<_, _>>>()?;

        let sent = SentEmail {
            recipient: recipient.clone(),
            template_id: email.template_id.clone(),
            from: state.resolve(&recipient_user, &email.from)?,
            to: state.resolve(&recipient_user, &email.to)?,
            substitutions,
        };
        state.outbox.push(sent);

        Ok(format!("memory-{}", Uuid::new_v4().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::GroupPolicyBuilder;
    use serde_json::json;

    fn attributes(role: &str, name: &str) -> serde_json::Map<String, Value> {
        match json!({ "role": role, "name": name, "email": format!("{name}@example.com") }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    async fn user(vault: &MemoryVault, username: &str) -> CreatedUser {
        vault
            .create_user(
                vault.root_token(),
                NewUser {
                    username: username.into(),
                    password: None,
                    attributes: attributes("doctor", username),
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_token_is_unauthenticated() {
        let vault = MemoryVault::new();
        let token = AccessToken::new("nope").unwrap();
        let err = vault.read_current_user(&token).await.unwrap_err();
        assert!(matches!(err, VaultError::Unauthenticated));
    }

    #[tokio::test]
    async fn api_key_authenticates_as_created_user() {
        let vault = MemoryVault::new();
        let created = user(&vault, "dr-baker").await;
        let me = vault
            .read_current_user(created.api_key.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(me.id, created.id);
        assert_eq!(me.attribute("role"), Some("doctor"));
    }

    #[tokio::test]
    async fn group_policy_controls_document_access() {
        let vault = MemoryVault::new();
        let vault_id = VaultId::parse("cases").unwrap();
        let writer = user(&vault, "writer").await;
        let reader = user(&vault, "reader").await;

        let doc = vault
            .create_document(vault.root_token(), &vault_id, None, &json!({}))
            .await
            .unwrap();

        let read = GroupPolicyBuilder::new()
            .read([resources::document(&vault_id, &doc)])
            .build();
        let write = GroupPolicyBuilder::new()
            .update([resources::document(&vault_id, &doc)])
            .build();
        vault
            .create_group(
                vault.root_token(),
                "read",
                &read,
                &[writer.id.clone(), reader.id.clone()],
            )
            .await
            .unwrap();
        vault
            .create_group(vault.root_token(), "write", &write, &[writer.id.clone()])
            .await
            .unwrap();

        let writer_key = writer.api_key.unwrap();
        let reader_key = reader.api_key.unwrap();

        vault
            .update_document(&writer_key, &vault_id, &doc, &json!({ "summary": "ok" }))
            .await
            .unwrap();
        let err = vault
            .update_document(&reader_key, &vault_id, &doc, &json!({ "summary": "no" }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VaultError::PermissionDenied {
                activity: Activity::Update,
                ..
            }
        ));

        let docs = vault
            .get_documents(&reader_key, &vault_id, std::slice::from_ref(&doc))
            .await
            .unwrap();
        assert_eq!(docs[0].document, json!({ "summary": "ok" }));
    }

    #[tokio::test]
    async fn duplicate_group_names_conflict() {
        let vault = MemoryVault::new();
        let policy = GroupPolicy::default();
        vault
            .create_group(vault.root_token(), "g", &policy, &[])
            .await
            .unwrap();
        let err = vault
            .create_group(vault.root_token(), "g", &policy, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Conflict(_)));
    }

    #[tokio::test]
    async fn email_values_are_resolved_from_recipient_attributes() {
        let vault = MemoryVault::new();
        let patient = user(&vault, "pat").await;

        let email = TemplatedEmail {
            provider_api_key: "sg".into(),
            template_id: "tmpl".into(),
            from: ValueSpec::LiteralValue("noreply@example.com".into()),
            to: ValueSpec::UserAttribute("email".into()),
            substitutions: BTreeMap::from([(
                "{{name}}".to_owned(),
                ValueSpec::UserAttribute("name".into()),
            )]),
        };
        vault
            .send_email(vault.root_token(), &patient.id, &email)
            .await
            .unwrap();

        let sent = vault.sent_emails().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "pat@example.com");
        assert_eq!(sent[0].substitutions["{{name}}"], "pat");
    }
}
