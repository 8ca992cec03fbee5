//! Data carried across the vault boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use td_types::{AccessToken, DocumentId, GroupId, UserId};

/// A vault identity with its decoded attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct VaultUser {
    pub id: UserId,
    pub username: String,
    pub attributes: Map<String, Value>,
}

impl VaultUser {
    /// Returns a string attribute, if present.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

/// Request to create a vault identity.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    /// `None` creates a user that can only authenticate with its API key.
    pub password: Option<String>,
    pub attributes: Map<String, Value>,
}

/// A freshly created identity.
///
/// `api_key` is a long-lived credential for the new user; it is only ever returned here.
#[derive(Clone, Debug)]
pub struct CreatedUser {
    pub id: UserId,
    pub username: String,
    pub api_key: Option<AccessToken>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}

/// A document as returned by the vault, JSON-decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub document: Value,
}

/// A binary artifact to upload.
#[derive(Clone, Debug)]
pub struct BlobUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl BlobUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Where the vault should take a value from when rendering an email.
///
/// `UserAttribute` lets the vault look up a value (such as the recipient's email address) that
/// this service never sees.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSpec {
    LiteralValue(String),
    UserAttribute(String),
}

/// A templated email addressed to a vault user.
#[derive(Clone, Debug)]
pub struct TemplatedEmail {
    pub provider_api_key: String,
    pub template_id: String,
    pub from: ValueSpec,
    pub to: ValueSpec,
    pub substitutions: BTreeMap<String, ValueSpec>,
}

/// An email accepted by [`crate::memory::MemoryVault`], with every value resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentEmail {
    pub recipient: UserId,
    pub template_id: String,
    pub from: String,
    pub to: String,
    pub substitutions: BTreeMap<String, String>,
}
