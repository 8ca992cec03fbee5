//! Group policy builder.
//!
//! A group policy is a list of grants, each naming one activity (create/read/update/delete) and
//! the resource-path patterns it applies to. The vault provider evaluates these policies; this
//! module only assembles them, so patterns are treated as opaque strings here.
//!
//! ```
//! use td_vault::policy::GroupPolicyBuilder;
//!
//! let policy = GroupPolicyBuilder::new()
//!     .read(["User::.*"])
//!     .create(["User::.*::Message"])
//!     .build();
//! assert_eq!(policy.entries().len(), 2);
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use td_types::UserId;

/// Placeholder the vault substitutes with the caller's own user id.
pub const SELF_ID_TOKEN: &str = "$[id=self.id]";

/// An activity a policy entry can grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Activity {
    #[serde(rename = "C")]
    Create,
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "U")]
    Update,
    #[serde(rename = "D")]
    Delete,
}

impl Activity {
    /// Fixed output order of [`GroupPolicyBuilder::build`].
    pub const ALL: [Activity; 4] = [
        Activity::Create,
        Activity::Read,
        Activity::Update,
        Activity::Delete,
    ];

    fn index(self) -> usize {
        match self {
            Activity::Create => 0,
            Activity::Read => 1,
            Activity::Update => 2,
            Activity::Delete => 3,
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activity::Create => "create",
            Activity::Read => "read",
            Activity::Update => "update",
            Activity::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One grant of a policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    #[serde(rename = "Activities")]
    pub activity: Activity,
    #[serde(rename = "Resources")]
    pub resources: Vec<String>,
}

impl PolicyEntry {
    /// Whether any of this entry's patterns matches `resource` for the given caller.
    ///
    /// Patterns are anchored regular expressions. Patterns that fail to compile never match.
    pub fn matches(&self, resource: &str, caller: &UserId) -> bool {
        self.resources
            .iter()
            .any(|pattern| pattern_matches(pattern, resource, caller))
    }
}

fn pattern_matches(pattern: &str, resource: &str, caller: &UserId) -> bool {
    let expanded = pattern.replace(SELF_ID_TOKEN, &regex::escape(caller.as_str()));
    match Regex::new(&format!("^(?:{expanded})$")) {
        Ok(re) => re.is_match(resource),
        Err(e) => {
            tracing::warn!("ignoring invalid policy pattern {:?}: {}", pattern, e);
            false
        }
    }
}

/// A finalised group policy, serialised as the vault's JSON policy document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupPolicy(Vec<PolicyEntry>);

impl GroupPolicy {
    pub fn entries(&self) -> &[PolicyEntry] {
        &self.0
    }

    /// Whether this policy grants `activity` on `resource` to `caller`.
    pub fn permits(&self, activity: Activity, resource: &str, caller: &UserId) -> bool {
        self.0
            .iter()
            .any(|entry| entry.activity == activity && entry.matches(resource, caller))
    }
}

/// Accumulates grants per activity.
///
/// Each method appends patterns for one activity and returns the builder, so calls chain.
/// The builder is pure: it performs no validation of pattern syntax and has no side effects.
#[derive(Clone, Debug, Default)]
pub struct GroupPolicyBuilder {
    grants: [Vec<String>; 4],
}

impl GroupPolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends patterns granted for `activity`.
    pub fn grant<I, S>(mut self, activity: Activity, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grants[activity.index()].extend(resources.into_iter().map(Into::into));
        self
    }

    pub fn create<I, S>(self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grant(Activity::Create, resources)
    }

    pub fn read<I, S>(self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grant(Activity::Read, resources)
    }

    pub fn update<I, S>(self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grant(Activity::Update, resources)
    }

    pub fn delete<I, S>(self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grant(Activity::Delete, resources)
    }

    /// Emits one entry per activity with at least one pattern, in the order C, R, U, D.
    pub fn build(&self) -> GroupPolicy {
        GroupPolicy(
            Activity::ALL
                .iter()
                .filter(|activity| !self.grants[activity.index()].is_empty())
                .map(|activity| PolicyEntry {
                    activity: *activity,
                    resources: self.grants[activity.index()].clone(),
                })
                .collect(),
        )
    }
}

/// Resource-path helpers for the vault's hierarchical resource names.
pub mod resources {
    use td_types::{BlobId, DocumentId, GroupId, UserId, VaultId};

    /// Any document in the vault.
    pub const ANY: &str = ".*";

    pub fn documents(vault_id: &VaultId) -> String {
        format!("Vault::{vault_id}::Document::")
    }

    pub fn document(vault_id: &VaultId, document_id: &DocumentId) -> String {
        format!("Vault::{vault_id}::Document::{document_id}")
    }

    pub fn blobs(vault_id: &VaultId) -> String {
        format!("Vault::{vault_id}::Blob::")
    }

    pub fn blob(vault_id: &VaultId, blob_id: &BlobId) -> String {
        format!("Vault::{vault_id}::Blob::{blob_id}")
    }

    pub fn search(vault_id: &VaultId) -> String {
        format!("Vault::{vault_id}::Search::")
    }

    pub fn groups() -> String {
        "Group::".to_owned()
    }

    pub fn group_membership(group_id: &GroupId, user_id: &UserId) -> String {
        format!("Group::{group_id}::GroupMembership::{user_id}")
    }

    pub fn users() -> String {
        "User::".to_owned()
    }

    pub fn user(user_id: &UserId) -> String {
        format!("User::{user_id}")
    }

    pub fn user_messages(user_id: &UserId) -> String {
        format!("User::{user_id}::Message")
    }
}
