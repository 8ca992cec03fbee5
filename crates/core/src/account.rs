//! Standing vault groups and users for a TrueDiagnostics account.
//!
//! The per-case groups created by the workflow only grant access to one case's documents.
//! Everything else a role may do is granted by the three standing groups built here.

use crate::constants::{
    DEFAULT_ADMIN_NAME, DEFAULT_DOCTOR_LAST_NAMES, NAME_ATTRIBUTE, ROLE_ATTRIBUTE,
};
use crate::role::Role;
use crate::{CaseError, CaseResult};
use futures::future::try_join_all;
use serde_json::{Map, Value};
use td_types::{AccessToken, GroupId, UserId, VaultId};
use td_vault::policy::{resources, GroupPolicy, GroupPolicyBuilder, SELF_ID_TOKEN};
use td_vault::{NewUser, VaultClient};

/// Policy for admins: create cases and their groups, read and update every case document,
/// create patients and add them to groups, and message any user.
pub fn admins_policy(vault_id: &VaultId) -> GroupPolicy {
    GroupPolicyBuilder::new()
        .create([
            resources::documents(vault_id),
            resources::blobs(vault_id),
            resources::groups(),
        ])
        .read([
            format!("{}{}", resources::documents(vault_id), resources::ANY),
            resources::search(vault_id),
        ])
        .update([format!("{}{}", resources::documents(vault_id), resources::ANY)])
        .read([format!("{}{}", resources::blobs(vault_id), resources::ANY)])
        .read([resources::users(), format!("User::{}", resources::ANY)])
        .create([
            resources::users(),
            format!("User::{}::Message", resources::ANY),
        ])
        .create([format!(
            "Group::{any}::GroupMembership::{any}",
            any = resources::ANY
        )])
        .build()
}

/// Policy for doctors: look up users and notify patients. Case access comes from the per-case
/// groups.
pub fn doctors_policy() -> GroupPolicy {
    GroupPolicyBuilder::new()
        .read([resources::users(), format!("User::{}", resources::ANY)])
        .create([format!("User::{}::Message", resources::ANY)])
        .build()
}

/// Policy for patients: read and update their own user only.
pub fn patients_policy() -> GroupPolicy {
    let own_user = format!("User::{SELF_ID_TOKEN}");
    GroupPolicyBuilder::new()
        .read([own_user.clone()])
        .update([own_user])
        .build()
}

/// What to create when provisioning an account.
#[derive(Clone, Debug)]
pub struct AccountSeed {
    /// Appended to every username and group name; vault names must be unique.
    pub name_suffix: String,
    /// `None` creates API-key-only users.
    pub password: Option<String>,
    pub admin_name: String,
    pub doctor_last_names: Vec<String>,
}

impl AccountSeed {
    pub fn new(name_suffix: impl Into<String>) -> Self {
        Self {
            name_suffix: name_suffix.into(),
            password: None,
            admin_name: DEFAULT_ADMIN_NAME.to_owned(),
            doctor_last_names: DEFAULT_DOCTOR_LAST_NAMES
                .iter()
                .map(|name| (*name).to_owned())
                .collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProvisionedUser {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub api_key: Option<AccessToken>,
}

#[derive(Clone, Debug)]
pub struct ProvisionedAccount {
    pub admin: ProvisionedUser,
    pub doctors: Vec<ProvisionedUser>,
    pub admins_group_id: GroupId,
    pub doctors_group_id: GroupId,
    pub patients_group_id: GroupId,
}

/// Creates the admin user, the doctor users and the three standing groups.
///
/// `root_token` must belong to a vault user allowed to create users and groups. Nothing is
/// rolled back if a step fails part way.
///
/// # Errors
///
/// Returns `CaseError::InvalidInput` if the seed has no doctors or an empty suffix, or
/// `CaseError::Vault` if any vault call fails.
pub async fn provision_account(
    vault: &dyn VaultClient,
    root_token: &AccessToken,
    vault_id: &VaultId,
    seed: &AccountSeed,
) -> CaseResult<ProvisionedAccount> {
    let suffix = seed.name_suffix.trim();
    if suffix.is_empty() {
        return Err(CaseError::InvalidInput("name suffix cannot be empty".into()));
    }
    if seed.doctor_last_names.is_empty() {
        return Err(CaseError::InvalidInput(
            "at least one doctor is required".into(),
        ));
    }

    let admin = create_user(
        vault,
        root_token,
        format!("truediagnostics-admin-{suffix}"),
        seed.admin_name.clone(),
        Role::Admin,
        seed.password.clone(),
    )
    .await?;
    tracing::info!("created admin user {} ({})", admin.username, admin.id);

    let doctors = try_join_all(seed.doctor_last_names.iter().map(|last_name| {
        create_user(
            vault,
            root_token,
            format!(
                "truediagnostics-dr-{}-{suffix}",
                last_name.to_lowercase()
            ),
            format!("Dr. {last_name}"),
            Role::Doctor,
            seed.password.clone(),
        )
    }))
    .await?;
    for doctor in &doctors {
        tracing::info!("created doctor user {} ({})", doctor.name, doctor.id);
    }

    let patients_group = vault
        .create_group(
            root_token,
            &format!("truediagnostics-patients-{suffix}"),
            &patients_policy(),
            &[],
        )
        .await?;
    let admins_group = vault
        .create_group(
            root_token,
            &format!("truediagnostics-admins-{suffix}"),
            &admins_policy(vault_id),
            std::slice::from_ref(&admin.id),
        )
        .await?;
    let doctor_ids: Vec<UserId> = doctors.iter().map(|d| d.id.clone()).collect();
    let doctors_group = vault
        .create_group(
            root_token,
            &format!("truediagnostics-doctors-{suffix}"),
            &doctors_policy(),
            &doctor_ids,
        )
        .await?;
    tracing::info!(
        "created groups: admins={} doctors={} patients={}",
        admins_group.id,
        doctors_group.id,
        patients_group.id
    );

    Ok(ProvisionedAccount {
        admin,
        doctors,
        admins_group_id: admins_group.id,
        doctors_group_id: doctors_group.id,
        patients_group_id: patients_group.id,
    })
}

async fn create_user(
    vault: &dyn VaultClient,
    root_token: &AccessToken,
    username: String,
    name: String,
    role: Role,
    password: Option<String>,
) -> CaseResult<ProvisionedUser> {
    let mut attributes = Map::new();
    attributes.insert(ROLE_ATTRIBUTE.to_owned(), Value::from(role.as_str()));
    attributes.insert(NAME_ATTRIBUTE.to_owned(), Value::from(name.clone()));

    let created = vault
        .create_user(
            root_token,
            NewUser {
                username,
                password,
                attributes,
            },
        )
        .await?;

    Ok(ProvisionedUser {
        id: created.id,
        username: created.username,
        name,
        api_key: created.api_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use td_vault::memory::MemoryVault;
    use td_vault::Activity;

    #[test]
    fn test_policies_match_wire_form() {
        let vault_id = VaultId::parse("v1").unwrap();
        let admins = serde_json::to_value(admins_policy(&vault_id)).unwrap();
        assert_eq!(
            admins[0],
            json!({
                "Activities": "C",
                "Resources": [
                    "Vault::v1::Document::",
                    "Vault::v1::Blob::",
                    "Group::",
                    "User::",
                    "User::.*::Message",
                    "Group::.*::GroupMembership::.*",
                ]
            })
        );
        assert_eq!(admins[1]["Activities"], json!("R"));
        assert_eq!(admins[2]["Activities"], json!("U"));

        let patients = serde_json::to_value(patients_policy()).unwrap();
        assert_eq!(
            patients,
            json!([
                {"Activities": "R", "Resources": ["User::$[id=self.id]"]},
                {"Activities": "U", "Resources": ["User::$[id=self.id]"]},
            ])
        );
    }

    #[test]
    fn test_patients_can_only_read_themselves() {
        let me = UserId::parse("p1").unwrap();
        let policy = patients_policy();
        assert!(policy.permits(Activity::Read, "User::p1", &me));
        assert!(!policy.permits(Activity::Read, "User::p2", &me));
        assert!(!policy.permits(Activity::Delete, "User::p1", &me));
    }

    #[tokio::test]
    async fn test_provision_account_creates_users_and_groups() {
        let vault = MemoryVault::new();
        let vault_id = VaultId::parse("cases").unwrap();
        let mut seed = AccountSeed::new("t1");
        seed.doctor_last_names = vec!["House".into(), "Grey".into()];

        let account = provision_account(&vault, vault.root_token(), &vault_id, &seed)
            .await
            .unwrap();

        assert_eq!(account.admin.name, "Alex Administrator");
        assert_eq!(account.admin.username, "truediagnostics-admin-t1");
        let names: Vec<_> = account.doctors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Dr. House", "Dr. Grey"]);
        assert!(account.doctors.iter().all(|d| d.api_key.is_some()));

        let members = vault
            .group_members(&account.doctors_group_id)
            .await
            .unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(
            vault.group_members(&account.patients_group_id).await,
            Some(Vec::new())
        );

        let admin_key = account.admin.api_key.unwrap();
        let admin = vault.read_current_user(&admin_key).await.unwrap();
        assert_eq!(admin.attribute("role"), Some("admin"));
    }

    #[tokio::test]
    async fn test_provision_requires_doctors() {
        let vault = MemoryVault::new();
        let mut seed = AccountSeed::new("t2");
        seed.doctor_last_names.clear();
        let result = provision_account(
            &vault,
            vault.root_token(),
            &VaultId::parse("cases").unwrap(),
            &seed,
        )
        .await;
        assert!(matches!(result, Err(CaseError::InvalidInput(_))));
    }
}
