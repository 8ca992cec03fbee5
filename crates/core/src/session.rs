//! Per-request caller context.

use crate::constants::{NAME_ATTRIBUTE, ROLE_ATTRIBUTE};
use crate::role::{Capability, Role};
use crate::{CaseError, CaseResult};
use td_types::{AccessToken, UserId};
use td_vault::{VaultClient, VaultError};

/// The authenticated caller of a workflow operation.
///
/// A session is established once per request from the caller's vault credential. The same
/// credential is used for every vault call made on the caller's behalf, so the vault's group
/// policies apply to everything the workflow does for them.
#[derive(Clone, Debug)]
pub struct Session {
    token: AccessToken,
    user_id: UserId,
    role: Role,
    name: String,
}

impl Session {
    /// Reads the vault user behind `token` and builds a session from its attributes.
    ///
    /// # Errors
    ///
    /// Returns `CaseError::Unauthenticated` if the vault rejects the token, or the user has no
    /// recognised `role` or no `name` attribute. Transport failures are returned as
    /// `CaseError::Vault`.
    pub async fn establish(vault: &dyn VaultClient, token: AccessToken) -> CaseResult<Self> {
        let user = vault.read_current_user(&token).await.map_err(|err| match err {
            VaultError::Unauthenticated
            | VaultError::Api { .. }
            | VaultError::NotFound(_)
            | VaultError::PermissionDenied { .. }
            | VaultError::Denied(_)
            | VaultError::InvalidInput(_) => CaseError::Unauthenticated(err.to_string()),
            other => CaseError::Vault(other),
        })?;

        let role = user
            .attribute(ROLE_ATTRIBUTE)
            .ok_or_else(|| CaseError::Unauthenticated(format!("user {} has no role", user.id)))?
            .parse::<Role>()?;
        let name = user
            .attribute(NAME_ATTRIBUTE)
            .ok_or_else(|| CaseError::Unauthenticated(format!("user {} has no name", user.id)))?
            .to_owned();

        Ok(Self {
            token,
            user_id: user.id,
            role,
            name,
        })
    }

    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fails with `CaseError::Forbidden` unless the caller's role grants `capability`.
    pub fn require(&self, capability: Capability) -> CaseResult<()> {
        if self.role.can(capability) {
            Ok(())
        } else {
            tracing::warn!(
                "user {} ({}) denied capability: {}",
                self.user_id,
                self.role,
                capability
            );
            Err(CaseError::Forbidden {
                role: self.role,
                capability,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};
    use td_vault::memory::MemoryVault;
    use td_vault::NewUser;

    async fn user_with(vault: &MemoryVault, attributes: Value) -> AccessToken {
        let attributes: Map<String, Value> = serde_json::from_value(attributes).unwrap();
        let created = vault
            .create_user(
                vault.root_token(),
                NewUser {
                    username: format!("user-{}", attributes.len()),
                    password: None,
                    attributes,
                },
            )
            .await
            .unwrap();
        created.api_key.unwrap()
    }

    #[tokio::test]
    async fn test_establish_reads_role_and_name() {
        let vault = MemoryVault::new();
        let token = user_with(&vault, json!({"role": "doctor", "name": "Dr. Baker"})).await;

        let session = Session::establish(&vault, token).await.unwrap();
        assert_eq!(session.role(), Role::Doctor);
        assert_eq!(session.name(), "Dr. Baker");
        assert!(session.require(Capability::ReviewCase).is_ok());
        assert!(matches!(
            session.require(Capability::CreateCase),
            Err(CaseError::Forbidden { role: Role::Doctor, .. })
        ));
    }

    #[tokio::test]
    async fn test_establish_rejects_unknown_token() {
        let vault = MemoryVault::new();
        let token = AccessToken::new("not-a-real-key").unwrap();
        let err = Session::establish(&vault, token).await.unwrap_err();
        assert!(matches!(err, CaseError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_establish_requires_name() {
        let vault = MemoryVault::new();
        let token = user_with(&vault, json!({"role": "admin"})).await;
        let err = Session::establish(&vault, token).await.unwrap_err();
        assert!(matches!(err, CaseError::Unauthenticated(msg) if msg.contains("no name")));
    }
}
