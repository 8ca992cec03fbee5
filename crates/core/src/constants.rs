//! Constants used throughout the TrueDiagnostics core crate.

/// Default directory for case metadata when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "td_data";

/// Directory name for case metadata storage, under the data directory.
pub const CASES_DIR_NAME: &str = "cases";

/// Filename for a case metadata row.
pub const CASE_YAML_FILENAME: &str = "case.yaml";

/// Sender address used when none is configured.
pub const DEFAULT_EMAIL_FROM: &str = "sample-app@truevault.com";

/// Vault user attribute holding the user's role (`admin`, `doctor` or `patient`).
pub const ROLE_ATTRIBUTE: &str = "role";

/// Vault user attribute holding the user's display name.
pub const NAME_ATTRIBUTE: &str = "name";

/// Vault user attribute holding the user's email address. Only the vault ever reads it.
pub const EMAIL_ATTRIBUTE: &str = "email";

/// Email template placeholder for the recipient's name.
pub const NAME_SUBSTITUTION: &str = "{{name}}";

/// Email template placeholder for the invited patient's one-time credential.
pub const API_KEY_SUBSTITUTION: &str = "{{api_key}}";

/// Doctors created by account provisioning when no names are given.
pub const DEFAULT_DOCTOR_LAST_NAMES: [&str; 4] = ["Johnson", "Blackwell", "Baker", "Smith"];

/// Display name of the provisioned admin user.
pub const DEFAULT_ADMIN_NAME: &str = "Alex Administrator";
