//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services. The
//! intent is to avoid reading process-wide environment variables during request handling, which
//! can lead to inconsistent behaviour in multi-threaded runtimes and test harnesses.

use crate::constants::{CASES_DIR_NAME, DEFAULT_EMAIL_FROM};
use crate::{CaseError, CaseResult};
use std::path::{Path, PathBuf};
use td_types::{GroupId, NonEmptyText, SchemaId, VaultId};

/// Templated email settings used for patient notifications.
#[derive(Clone, Debug)]
pub struct EmailConfig {
    provider_api_key: NonEmptyText,
    invite_patient_template_id: NonEmptyText,
    approved_template_id: NonEmptyText,
    from_address: NonEmptyText,
}

impl EmailConfig {
    /// Create a new `EmailConfig`.
    ///
    /// `from_address` falls back to the sample sender when `None`.
    ///
    /// # Errors
    ///
    /// Returns `CaseError::InvalidInput` if any value is empty.
    pub fn new(
        provider_api_key: &str,
        invite_patient_template_id: &str,
        approved_template_id: &str,
        from_address: Option<&str>,
    ) -> CaseResult<Self> {
        let required = |name: &str, value: &str| {
            NonEmptyText::new(value)
                .map_err(|_| CaseError::InvalidInput(format!("{name} cannot be empty")))
        };

        Ok(Self {
            provider_api_key: required("email provider API key", provider_api_key)?,
            invite_patient_template_id: required(
                "invite patient template id",
                invite_patient_template_id,
            )?,
            approved_template_id: required("approved template id", approved_template_id)?,
            from_address: required("from address", from_address.unwrap_or(DEFAULT_EMAIL_FROM))?,
        })
    }

    pub fn provider_api_key(&self) -> &str {
        self.provider_api_key.as_str()
    }

    pub fn invite_patient_template_id(&self) -> &str {
        self.invite_patient_template_id.as_str()
    }

    pub fn approved_template_id(&self) -> &str {
        self.approved_template_id.as_str()
    }

    pub fn from_address(&self) -> &str {
        self.from_address.as_str()
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    cases_vault_id: VaultId,
    cases_schema_id: Option<SchemaId>,
    patients_group_id: GroupId,
    email: EmailConfig,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `CaseError::InvalidInput` if `data_dir` is empty.
    pub fn new(
        data_dir: PathBuf,
        cases_vault_id: VaultId,
        cases_schema_id: Option<SchemaId>,
        patients_group_id: GroupId,
        email: EmailConfig,
    ) -> CaseResult<Self> {
        if data_dir.as_os_str().is_empty() {
            return Err(CaseError::InvalidInput("data_dir cannot be empty".into()));
        }

        Ok(Self {
            data_dir,
            cases_vault_id,
            cases_schema_id,
            patients_group_id,
            email,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn cases_dir(&self) -> PathBuf {
        self.data_dir.join(CASES_DIR_NAME)
    }

    pub fn cases_vault_id(&self) -> &VaultId {
        &self.cases_vault_id
    }

    pub fn cases_schema_id(&self) -> Option<&SchemaId> {
        self.cases_schema_id.as_ref()
    }

    pub fn patients_group_id(&self) -> &GroupId {
        &self.patients_group_id
    }

    pub fn email(&self) -> &EmailConfig {
        &self.email
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_config_defaults_sender() {
        let email = EmailConfig::new("sg-key", "invite", "approved", None).unwrap();
        assert_eq!(email.from_address(), DEFAULT_EMAIL_FROM);
    }

    #[test]
    fn test_email_config_rejects_blank_values() {
        let err = EmailConfig::new("  ", "invite", "approved", None).unwrap_err();
        assert!(matches!(err, CaseError::InvalidInput(msg) if msg.contains("API key")));
    }

    #[test]
    fn test_core_config_rejects_empty_data_dir() {
        let email = EmailConfig::new("sg-key", "invite", "approved", None).unwrap();
        let result = CoreConfig::new(
            PathBuf::new(),
            VaultId::parse("cases").unwrap(),
            None,
            GroupId::parse("patients").unwrap(),
            email,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_cases_dir_is_under_data_dir() {
        let email = EmailConfig::new("sg-key", "invite", "approved", Some("a@b.c")).unwrap();
        let cfg = CoreConfig::new(
            PathBuf::from("/srv/td"),
            VaultId::parse("cases").unwrap(),
            Some(SchemaId::parse("schema-1").unwrap()),
            GroupId::parse("patients").unwrap(),
            email,
        )
        .unwrap();
        assert_eq!(cfg.cases_dir(), PathBuf::from("/srv/td/cases"));
        assert_eq!(cfg.cases_schema_id().map(SchemaId::as_str), Some("schema-1"));
    }
}
