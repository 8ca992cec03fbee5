use crate::dto::HealthRes;

/// Health check shared by every API surface.
#[derive(Clone, Default)]
pub struct HealthService;

impl HealthService {
    pub fn new() -> Self {
        Self
    }

    /// Reports that the service is up. Does not contact the vault.
    pub fn check_health() -> HealthRes {
        HealthRes {
            ok: true,
            message: "TrueDiagnostics is alive".into(),
        }
    }
}
