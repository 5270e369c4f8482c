//! JWT configuration types for bearer token authentication.
//!
//! Warren only validates tokens; they are minted by an external identity
//! provider that shares the HMAC secret. The username carried in
//! `username_claim` must name an existing, enabled gateway user.
//!
//! # Validation Requirements
//!
//! When `enabled: true`, the following are required:
//! - `secret` must be non-empty (validated in [`Config::validate()`])
//! - `algorithm` must be one of HS256, HS384, HS512
//!
//! [`Config::validate()`]: super::Config::validate

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_USERNAME_CLAIM;

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_username_claim() -> String {
    DEFAULT_USERNAME_CLAIM.to_string()
}

/// Supported HMAC algorithms
pub const SUPPORTED_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512"];

/// JWT authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Whether bearer tokens are accepted at all.
    pub enabled: bool,
    /// Shared HMAC secret.
    #[serde(default)]
    pub secret: String,
    /// Signing algorithm (default: HS256).
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Claim holding the gateway username (default: `sub`).
    #[serde(default = "default_username_claim")]
    pub username_claim: String,
    /// Expected `iss` claim; not checked when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}
