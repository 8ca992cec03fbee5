//! Roles and the capability table.
//!
//! Every workflow operation names the [`Capability`] it needs and the session checks it
//! against this table, so role rules live in one place instead of at each call site.

use crate::{CaseError, CaseResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Doctor,
    Patient,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    CreateCase,
    AssociatePatient,
    ViewDashboardStats,
    ListAssignedCases,
    ReviewCase,
    ApproveCase,
    ReadCaseMetadata,
    ReadOwnCase,
    ViewAnyCase,
    ViewInvolvedCase,
}

const ADMIN_CAPABILITIES: &[Capability] = &[
    Capability::CreateCase,
    Capability::AssociatePatient,
    Capability::ViewDashboardStats,
    Capability::ReadCaseMetadata,
    Capability::ViewAnyCase,
];

const DOCTOR_CAPABILITIES: &[Capability] = &[
    Capability::ListAssignedCases,
    Capability::ReviewCase,
    Capability::ApproveCase,
    Capability::ReadCaseMetadata,
    Capability::ViewInvolvedCase,
];

const PATIENT_CAPABILITIES: &[Capability] =
    &[Capability::ReadOwnCase, Capability::ViewInvolvedCase];

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Doctor => "doctor",
            Role::Patient => "patient",
        }
    }

    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            Role::Admin => ADMIN_CAPABILITIES,
            Role::Doctor => DOCTOR_CAPABILITIES,
            Role::Patient => PATIENT_CAPABILITIES,
        }
    }

    pub fn can(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Whether this role may open a case with its documents. `involved` says whether the
    /// caller is one of the case's doctors or its patient.
    pub fn may_view_case(self, involved: bool) -> bool {
        self.can(Capability::ViewAnyCase) || (involved && self.can(Capability::ViewInvolvedCase))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CaseError;

    /// Parses the vault `role` attribute. Unknown roles cannot act at all.
    fn from_str(s: &str) -> CaseResult<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "doctor" => Ok(Role::Doctor),
            "patient" => Ok(Role::Patient),
            other => Err(CaseError::Unauthenticated(format!("unknown role {other:?}"))),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::CreateCase => "create cases",
            Capability::AssociatePatient => "associate patients",
            Capability::ViewDashboardStats => "view dashboard statistics",
            Capability::ListAssignedCases => "list assigned cases",
            Capability::ReviewCase => "review cases",
            Capability::ApproveCase => "approve cases",
            Capability::ReadCaseMetadata => "read case metadata",
            Capability::ReadOwnCase => "read own case",
            Capability::ViewAnyCase => "view any case",
            Capability::ViewInvolvedCase => "view involved cases",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_table() {
        assert!(Role::Admin.can(Capability::CreateCase));
        assert!(Role::Admin.can(Capability::ReadCaseMetadata));
        assert!(!Role::Admin.can(Capability::ReviewCase));

        assert!(Role::Doctor.can(Capability::ApproveCase));
        assert!(!Role::Doctor.can(Capability::AssociatePatient));

        assert_eq!(
            Role::Patient.capabilities(),
            &[Capability::ReadOwnCase, Capability::ViewInvolvedCase]
        );
    }

    #[test]
    fn test_case_view_rule() {
        assert!(Role::Admin.may_view_case(false));
        assert!(Role::Admin.may_view_case(true));
        for role in [Role::Doctor, Role::Patient] {
            assert!(role.may_view_case(true));
            assert!(!role.may_view_case(false));
        }
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("doctor".parse::<Role>().unwrap(), Role::Doctor);
        let err = "nurse".parse::<Role>().unwrap_err();
        assert!(matches!(err, CaseError::Unauthenticated(_)));
    }
}
