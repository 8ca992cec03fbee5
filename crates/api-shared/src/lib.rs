//! # API Shared
//!
//! Shared definitions for the TrueDiagnostics internal metadata API.
//!
//! Contains:
//! - Wire DTOs (`dto` module) with camelCase JSON and OpenAPI schemas
//! - Shared services like `HealthService`
//! - Access-token header parsing
//!
//! Used by `api-rest`; conversion from `td-core` types lives here so every surface renders a
//! case the same way.

pub mod auth;
pub mod dto;
pub mod health;

pub use auth::{parse_access_token, AuthError, ACCESS_TOKEN_HEADER};
pub use dto::*;
pub use health::HealthService;
