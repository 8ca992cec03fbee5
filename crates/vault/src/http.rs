//! HTTPS client for the TrueVault v1 API.
//!
//! TrueVault accepts documents, group policies and user attributes as base64-encoded JSON inside
//! multipart forms, and wraps every JSON response in an envelope whose `result` field is either
//! `"success"` or `"error"`. Fetching a single document returns the raw base64 payload instead
//! of an envelope.

use crate::model::{
    BlobUpload, CreatedUser, Group, NewUser, StoredDocument, TemplatedEmail, ValueSpec,
    VaultUser,
};
use crate::policy::GroupPolicy;
use crate::upload::BlobProgress;
use crate::{VaultClient, VaultError, VaultResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use td_types::{AccessToken, BlobId, DocumentId, GroupId, SchemaId, UserId, VaultId};

pub const DEFAULT_BASE_URL: &str = "https://api.truevault.com/v1/";

/// Size of the multipart body chunks used for upload progress reporting.
const UPLOAD_CHUNK: usize = 64 * 1024;

/// Longest slice of a non-JSON body kept in an error message.
const BODY_EXCERPT: usize = 200;

#[derive(Clone, Debug)]
pub struct HttpVaultClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpVaultClient {
    /// Creates a client for the public TrueVault endpoint.
    pub fn new() -> VaultResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates a client against a custom base URL (for example a local mock).
    ///
    /// A trailing slash is added when missing so that relative paths join under it.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::InvalidInput` if `base_url` is not a valid absolute URL, or
    /// `VaultError::Http` if the underlying client cannot be built.
    pub fn with_base_url(base_url: &str) -> VaultResult<Self> {
        let normalised = if base_url.ends_with('/') {
            base_url.to_owned()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalised)
            .map_err(|e| VaultError::InvalidInput(format!("vault base URL {base_url:?}: {e}")))?;
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, token: &AccessToken) -> VaultResult<RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| VaultError::InvalidInput(format!("vault path {path:?}: {e}")))?;
        Ok(self
            .http
            .request(method, url)
            .basic_auth(token.expose(), None::<&str>))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> VaultResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        let json = parse_envelope(status, &body)?;
        Ok(serde_json::from_value(json)?)
    }
}

// ============================================================================
// Wire format
// ============================================================================

/// Parses a TrueVault response body into its JSON envelope.
///
/// # Errors
///
/// - `VaultError::NonJsonResponse` if the body is not JSON
/// - `VaultError::Unauthenticated` for an HTTP 401
/// - `VaultError::Denied` for an HTTP 403, carrying the envelope message if any
/// - `VaultError::NotFound` for an HTTP 404, carrying the envelope message if any
/// - `VaultError::Api` if the envelope reports `"result": "error"`
/// - `VaultError::Status` for any other unsuccessful status without an error envelope
pub fn parse_envelope(status: StatusCode, body: &str) -> VaultResult<Value> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(VaultError::Unauthenticated);
    }
    let parsed = serde_json::from_str::<Value>(body);

    if status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND {
        let detail = match &parsed {
            Ok(json) => envelope_error(json)
                .map(|(kind, message)| format!("{kind}: {message}"))
                .unwrap_or_else(|| status.to_string()),
            Err(_) => excerpt(body),
        };
        return Err(if status == StatusCode::FORBIDDEN {
            VaultError::Denied(detail)
        } else {
            VaultError::NotFound(detail)
        });
    }

    let json = parsed.map_err(|_| VaultError::NonJsonResponse(excerpt(body)))?;
    if let Some((kind, message)) = envelope_error(&json) {
        return Err(VaultError::Api { kind, message });
    }
    if !status.is_success() {
        return Err(VaultError::Status {
            status: status.as_u16(),
        });
    }
    Ok(json)
}

/// `(type, message)` of an error envelope, or `None` if the envelope is not an error.
fn envelope_error(json: &Value) -> Option<(String, String)> {
    if json.get("result").and_then(Value::as_str) != Some("error") {
        return None;
    }
    let error = json.get("error");
    let field = |name: &str| {
        error
            .and_then(|e| e.get(name))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    };
    Some((field("type"), field("message")))
}

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_owned(),
    }
}

/// Encodes a value as base64 JSON, the form TrueVault expects for documents and attributes.
pub fn encode_b64_json<T: Serialize + ?Sized>(value: &T) -> VaultResult<String> {
    Ok(STANDARD.encode(serde_json::to_vec(value)?))
}

pub fn decode_b64_json<T: DeserializeOwned>(encoded: &str) -> VaultResult<T> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| VaultError::Decode(format!("invalid base64: {e}")))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn decode_attributes(encoded: Option<&str>) -> VaultResult<Map<String, Value>> {
    match encoded {
        None | Some("") => Ok(Map::new()),
        Some(encoded) => decode_b64_json(encoded),
    }
}

/// Some responses carry both `id` and a typed key such as `user_id`; either is accepted.
fn pick_id<T>(id: Option<String>, typed: Option<String>, what: &str) -> VaultResult<T>
where
    T: TryFrom<String, Error = td_types::IdError>,
{
    let raw = typed
        .or(id)
        .ok_or_else(|| VaultError::Decode(format!("response is missing the {what} id")))?;
    T::try_from(raw).map_err(|e| VaultError::Decode(e.to_string()))
}

#[derive(Deserialize)]
struct WireUser {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    username: String,
    #[serde(default)]
    attributes: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
}

impl WireUser {
    fn into_user(self) -> VaultResult<VaultUser> {
        Ok(VaultUser {
            attributes: decode_attributes(self.attributes.as_deref())?,
            id: pick_id(self.id, self.user_id, "user")?,
            username: self.username,
        })
    }
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: WireUser,
}

#[derive(Deserialize)]
struct UsersEnvelope {
    users: Vec<WireUser>,
}

#[derive(Deserialize)]
struct DocumentCreated {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    document_id: Option<String>,
}

#[derive(Deserialize)]
struct WireDocument {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    document_id: Option<String>,
    document: String,
}

#[derive(Deserialize)]
struct DocumentsEnvelope {
    documents: Vec<WireDocument>,
}

#[derive(Deserialize)]
struct BlobCreated {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    blob_id: Option<String>,
}

#[derive(Deserialize)]
struct WireGroup {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    group_id: Option<String>,
    name: String,
}

#[derive(Deserialize)]
struct GroupEnvelope {
    group: WireGroup,
}

#[derive(Deserialize)]
struct EmailSent {
    provider_message_id: String,
}

#[derive(Serialize)]
struct MembershipRequest<'a> {
    user_ids: &'a [UserId],
}

#[derive(Serialize)]
struct SendgridAuth<'a> {
    sendgrid_api_key: &'a str,
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    provider: &'static str,
    auth: SendgridAuth<'a>,
    template_id: &'a str,
    from_email_address: &'a ValueSpec,
    to_email_address: &'a ValueSpec,
    substitutions: &'a BTreeMap<String, ValueSpec>,
}

impl<'a> EmailRequest<'a> {
    fn sendgrid(email: &'a TemplatedEmail) -> Self {
        Self {
            provider: "SENDGRID",
            auth: SendgridAuth {
                sendgrid_api_key: &email.provider_api_key,
            },
            template_id: &email.template_id,
            from_email_address: &email.from,
            to_email_address: &email.to,
            substitutions: &email.substitutions,
        }
    }
}

fn join_ids<T: AsRef<str>>(ids: &[T]) -> String {
    ids.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(",")
}

/// Decodes the body of a document fetch. A single-document fetch answers with the bare
/// base64 payload; a multi-document fetch answers with a `documents` envelope.
fn decode_documents(
    status: StatusCode,
    body: &str,
    requested: &[DocumentId],
) -> VaultResult<Vec<StoredDocument>> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') || !status.is_success() {
        let envelope: DocumentsEnvelope = serde_json::from_value(parse_envelope(status, body)?)?;
        return envelope
            .documents
            .into_iter()
            .map(|doc| {
                Ok(StoredDocument {
                    document: decode_b64_json(&doc.document)?,
                    id: pick_id(doc.id, doc.document_id, "document")?,
                })
            })
            .collect();
    }

    match requested {
        [only] => Ok(vec![StoredDocument {
            id: only.clone(),
            document: decode_b64_json(body)?,
        }]),
        _ => Err(VaultError::NonJsonResponse(excerpt(body))),
    }
}

/// Reorders fetched documents to match the requested ids.
fn in_requested_order(
    mut fetched: Vec<StoredDocument>,
    requested: &[DocumentId],
) -> VaultResult<Vec<StoredDocument>> {
    requested
        .iter()
        .map(|id| {
            fetched
                .iter()
                .position(|doc| &doc.id == id)
                .map(|index| fetched.swap_remove(index))
                .ok_or_else(|| VaultError::NotFound(format!("document {id}")))
        })
        .collect()
}

fn blob_part(blob: BlobUpload, progress: Option<BlobProgress>) -> VaultResult<Part> {
    let length = blob.len();
    let chunks: Vec<Vec<u8>> = blob.bytes.chunks(UPLOAD_CHUNK).map(<[u8]>::to_vec).collect();
    let stream = futures::stream::iter(chunks.into_iter().scan(0u64, move |sent, chunk| {
        *sent += chunk.len() as u64;
        if let Some(progress) = &progress {
            progress.report(*sent);
        }
        Some(Ok::<_, std::io::Error>(chunk))
    }));

    let part = Part::stream_with_length(Body::wrap_stream(stream), length).file_name(blob.filename);
    match blob.content_type {
        Some(content_type) => Ok(part.mime_str(&content_type)?),
        None => Ok(part),
    }
}

// ============================================================================
// VaultClient
// ============================================================================

#[async_trait]
impl VaultClient for HttpVaultClient {
    async fn read_current_user(&self, token: &AccessToken) -> VaultResult<VaultUser> {
        let envelope: UserEnvelope = self
            .send(self.request(Method::GET, "auth/me?full=true", token)?)
            .await?;
        envelope.user.into_user()
    }

    async fn list_users(&self, token: &AccessToken) -> VaultResult<Vec<VaultUser>> {
        let envelope: UsersEnvelope = self
            .send(self.request(Method::GET, "users?full=true", token)?)
            .await?;
        envelope
            .users
            .into_iter()
            .map(WireUser::into_user)
            .collect()
    }

    async fn create_user(&self, token: &AccessToken, user: NewUser) -> VaultResult<CreatedUser> {
        let mut form = Form::new()
            .text("username", user.username)
            .text("attributes", encode_b64_json(&user.attributes)?);
        if let Some(password) = user.password {
            form = form.text("password", password);
        }

        let envelope: UserEnvelope = self
            .send(self.request(Method::POST, "users", token)?.multipart(form))
            .await?;
        let wire = envelope.user;
        let api_key = wire
            .api_key
            .as_deref()
            .map(AccessToken::new)
            .transpose()
            .map_err(|e| VaultError::Decode(format!("api key: {e}")))?;
        Ok(CreatedUser {
            id: pick_id(wire.id, wire.user_id, "user")?,
            username: wire.username,
            api_key,
        })
    }

    async fn create_document(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        schema_id: Option<&SchemaId>,
        document: &Value,
    ) -> VaultResult<DocumentId> {
        let mut form = Form::new().text("document", encode_b64_json(document)?);
        if let Some(schema_id) = schema_id {
            form = form.text("schema_id", schema_id.to_string());
        }

        let path = format!("vaults/{vault_id}/documents");
        let created: DocumentCreated = self
            .send(self.request(Method::POST, &path, token)?.multipart(form))
            .await?;
        pick_id(created.id, created.document_id, "document")
    }

    async fn update_document(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        document_id: &DocumentId,
        document: &Value,
    ) -> VaultResult<()> {
        let form = Form::new().text("document", encode_b64_json(document)?);
        let path = format!("vaults/{vault_id}/documents/{document_id}");
        let _: Value = self
            .send(self.request(Method::PUT, &path, token)?.multipart(form))
            .await?;
        Ok(())
    }

    async fn get_documents(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        document_ids: &[DocumentId],
    ) -> VaultResult<Vec<StoredDocument>> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }

        let path = format!("vaults/{vault_id}/documents/{}", join_ids(document_ids));
        let response = self.request(Method::GET, &path, token)?.send().await?;
        let status = response.status();
        let body = response.text().await?;
        let fetched = decode_documents(status, &body, document_ids)?;
        in_requested_order(fetched, document_ids)
    }

    async fn create_blob(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        blob: BlobUpload,
        progress: Option<BlobProgress>,
    ) -> VaultResult<BlobId> {
        let form = Form::new().part("file", blob_part(blob, progress)?);
        let path = format!("vaults/{vault_id}/blobs");
        let created: BlobCreated = self
            .send(self.request(Method::POST, &path, token)?.multipart(form))
            .await?;
        pick_id(created.id, created.blob_id, "blob")
    }

    async fn get_blob(
        &self,
        token: &AccessToken,
        vault_id: &VaultId,
        blob_id: &BlobId,
    ) -> VaultResult<Vec<u8>> {
        let path = format!("vaults/{vault_id}/blobs/{blob_id}");
        let response = self.request(Method::GET, &path, token)?.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            parse_envelope(status, &body)?;
            return Err(VaultError::Status {
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn create_group(
        &self,
        token: &AccessToken,
        name: &str,
        policy: &GroupPolicy,
        members: &[UserId],
    ) -> VaultResult<Group> {
        let mut form = Form::new()
            .text("name", name.to_owned())
            .text("policy", encode_b64_json(policy)?);
        if !members.is_empty() {
            form = form.text("user_ids", join_ids(members));
        }

        let envelope: GroupEnvelope = self
            .send(self.request(Method::POST, "groups", token)?.multipart(form))
            .await?;
        let wire = envelope.group;
        Ok(Group {
            id: pick_id(wire.id, wire.group_id, "group")?,
            name: wire.name,
        })
    }

    async fn add_users_to_group(
        &self,
        token: &AccessToken,
        group_id: &GroupId,
        user_ids: &[UserId],
    ) -> VaultResult<()> {
        let path = format!("groups/{group_id}/membership");
        let _: Value = self
            .send(
                self.request(Method::POST, &path, token)?
                    .json(&MembershipRequest { user_ids }),
            )
            .await?;
        Ok(())
    }

    async fn send_email(
        &self,
        token: &AccessToken,
        recipient: &UserId,
        email: &TemplatedEmail,
    ) -> VaultResult<String> {
        let path = format!("users/{recipient}/message/email");
        let sent: EmailSent = self
            .send(
                self.request(Method::POST, &path, token)?
                    .json(&EmailRequest::sendgrid(email)),
            )
            .await?;
        Ok(sent.provider_message_id)
    }
}
