//! Patient notifications.
//!
//! Notifications are addressed by vault user id only. [`VaultEmailNotifier`] asks the vault to
//! look up the recipient's email address and name, so neither ever reaches this service.

use crate::config::EmailConfig;
use crate::constants::{API_KEY_SUBSTITUTION, EMAIL_ATTRIBUTE, NAME_ATTRIBUTE, NAME_SUBSTITUTION};
use crate::session::Session;
use crate::CaseResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use td_types::{AccessToken, UserId};
use td_vault::{TemplatedEmail, ValueSpec, VaultClient};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// The patient's case has been approved.
    CaseApproved,
    /// The patient has been invited; `credential` lets them sign up.
    PatientInvite { credential: AccessToken },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends `notification` to `recipient`, acting as the session's user.
    async fn notify(
        &self,
        session: &Session,
        recipient: &UserId,
        notification: Notification,
    ) -> CaseResult<()>;
}

/// Sends notifications as templated email through the vault.
pub struct VaultEmailNotifier {
    vault: Arc<dyn VaultClient>,
    email: EmailConfig,
}

impl VaultEmailNotifier {
    pub fn new(vault: Arc<dyn VaultClient>, email: EmailConfig) -> Self {
        Self { vault, email }
    }

    /// Builds the templated email for a notification.
    pub fn email_for(&self, notification: &Notification) -> TemplatedEmail {
        let mut substitutions = BTreeMap::from([(
            NAME_SUBSTITUTION.to_owned(),
            ValueSpec::UserAttribute(NAME_ATTRIBUTE.to_owned()),
        )]);

        let template_id = match notification {
            Notification::CaseApproved => self.email.approved_template_id(),
            Notification::PatientInvite { credential } => {
                substitutions.insert(
                    API_KEY_SUBSTITUTION.to_owned(),
                    ValueSpec::LiteralValue(credential.expose().to_owned()),
                );
                self.email.invite_patient_template_id()
            }
        };

        TemplatedEmail {
            provider_api_key: self.email.provider_api_key().to_owned(),
            template_id: template_id.to_owned(),
            from: ValueSpec::LiteralValue(self.email.from_address().to_owned()),
            to: ValueSpec::UserAttribute(EMAIL_ATTRIBUTE.to_owned()),
            substitutions,
        }
    }
}

#[async_trait]
impl Notifier for VaultEmailNotifier {
    async fn notify(
        &self,
        session: &Session,
        recipient: &UserId,
        notification: Notification,
    ) -> CaseResult<()> {
        let email = self.email_for(&notification);
        tracing::info!(
            "sending {} email to user {} (template {})",
            notification.label(),
            recipient,
            email.template_id
        );
        let message_id = self
            .vault
            .send_email(session.token(), recipient, &email)
            .await?;
        tracing::debug!("email accepted by provider: {}", message_id);
        Ok(())
    }
}

impl Notification {
    fn label(&self) -> &'static str {
        match self {
            Notification::CaseApproved => "case approved",
            Notification::PatientInvite { .. } => "patient invite",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use td_vault::memory::MemoryVault;

    fn notifier() -> VaultEmailNotifier {
        VaultEmailNotifier::new(
            Arc::new(MemoryVault::new()),
            EmailConfig::new("sg-key", "tpl-invite", "tpl-approved", None).unwrap(),
        )
    }

    #[test]
    fn test_approved_email_has_name_only() {
        let email = notifier().email_for(&Notification::CaseApproved);
        assert_eq!(email.template_id, "tpl-approved");
        assert_eq!(email.to, ValueSpec::UserAttribute("email".into()));
        assert_eq!(
            email.from,
            ValueSpec::LiteralValue("sample-app@truevault.com".into())
        );
        assert_eq!(email.substitutions.len(), 1);
        assert_eq!(
            email.substitutions.get("{{name}}"),
            Some(&ValueSpec::UserAttribute("name".into()))
        );
    }

    #[test]
    fn test_invite_email_carries_credential() {
        let credential = AccessToken::new("apikey-123").unwrap();
        let email = notifier().email_for(&Notification::PatientInvite { credential });
        assert_eq!(email.template_id, "tpl-invite");
        assert_eq!(
            email.substitutions.get("{{api_key}}"),
            Some(&ValueSpec::LiteralValue("apikey-123".into()))
        );
    }
}
