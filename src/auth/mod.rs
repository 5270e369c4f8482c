// Authentication module
//
// Callers authenticate with HTTP Basic credentials checked against the
// stored Argon2id hash, or with an HMAC-signed bearer JWT minted by an
// external identity provider. Either way the result is a `Principal`
// naming an existing, enabled gateway user.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub mod password;

pub use password::{hash_password, verify_password, PasswordError};

use crate::config::JwtConfig;
use crate::model::{Role, User, UserId};
use crate::store::Store;

/// Realm advertised in `WWW-Authenticate`
pub const AUTH_REALM: &str = "warren";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Option<String>,
    pub exp: Option<u64>,
    pub iat: Option<u64>,
    pub nbf: Option<u64>,
    pub iss: Option<String>,
    #[serde(flatten)]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    /// Value of `claim` as a string; `sub` and `iss` are read from their fields
    pub fn string_claim(&self, claim: &str) -> Option<String> {
        match claim {
            "sub" => self.sub.clone(),
            "iss" => self.iss.clone(),
            other => self
                .custom
                .get(other)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
        }
    }
}

/// Why authentication failed. Only the metric label differs; the caller
/// always sees a plain 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingCredentials,
    MalformedHeader,
    InvalidCredentials,
    InvalidToken,
    TokensDisabled,
    UnknownUser,
    UserDisabled,
    Internal,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::MissingCredentials => "missing_credentials",
            AuthFailure::MalformedHeader => "malformed_header",
            AuthFailure::InvalidCredentials => "invalid_credentials",
            AuthFailure::InvalidToken => "invalid_token",
            AuthFailure::TokensDisabled => "tokens_disabled",
            AuthFailure::UnknownUser => "unknown_user",
            AuthFailure::UserDisabled => "user_disabled",
            AuthFailure::Internal => "internal",
        }
    }
}

// Helper function to get header value with case-insensitive matching
fn get_header_case_insensitive(
    headers: &HashMap<String, String>,
    header_name: &str,
) -> Option<String> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(header_name))
        .map(|(_, value)| value.to_string())
}

fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let (given, rest) = value.trim().split_once(' ')?;
    given.eq_ignore_ascii_case(scheme).then_some(rest.trim())
}

pub fn extract_bearer_token(headers: &HashMap<String, String>) -> Option<String> {
    get_header_case_insensitive(headers, "Authorization")
        .and_then(|value| strip_scheme(&value, "Bearer").map(|s| s.to_string()))
        .filter(|token| !token.is_empty())
}

/// Decode `Authorization: Basic base64(user:pass)`.
///
/// Returns `Some(Err(()))` when the scheme is Basic but the payload is malformed.
pub fn extract_basic_credentials(
    headers: &HashMap<String, String>,
) -> Option<Result<(String, String), ()>> {
    let value = get_header_case_insensitive(headers, "Authorization")?;
    let encoded = strip_scheme(&value, "Basic")?;

    let decoded = match STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(_) => return Some(Err(())),
    };
    let Ok(text) = String::from_utf8(decoded) else {
        return Some(Err(()));
    };
    match text.split_once(':') {
        Some((user, pass)) if !user.is_empty() => Some(Ok((user.to_string(), pass.to_string()))),
        _ => Some(Err(())),
    }
}

fn algorithm_for(name: &str) -> Algorithm {
    match name {
        "HS384" => Algorithm::HS384,
        "HS512" => Algorithm::HS512,
        _ => Algorithm::HS256,
    }
}

/// Validate signature, `exp` and (when configured) `iss`
pub fn validate_jwt(
    token: &str,
    config: &JwtConfig,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(algorithm_for(&config.algorithm));
    validation.validate_exp = true;
    validation.set_required_spec_claims(&["exp"]);
    if let Some(issuer) = &config.issuer {
        validation.set_issuer(&[issuer]);
    }

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_ref()),
        &validation,
    )?;

    Ok(token_data.claims)
}

/// Resolves request credentials to a `Principal`
pub struct Authenticator {
    store: Arc<dyn Store>,
    jwt: Option<JwtConfig>,
}

impl Authenticator {
    pub fn new(store: Arc<dyn Store>, jwt: Option<JwtConfig>) -> Self {
        Self {
            store,
            jwt: jwt.filter(|j| j.enabled),
        }
    }

    pub async fn authenticate(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<Principal, AuthFailure> {
        if let Some(basic) = extract_basic_credentials(headers) {
            let (username, password) = basic.map_err(|_| AuthFailure::MalformedHeader)?;
            return self.authenticate_basic(&username, password).await;
        }
        if let Some(token) = extract_bearer_token(headers) {
            return self.authenticate_bearer(&token).await;
        }
        Err(AuthFailure::MissingCredentials)
    }

    async fn authenticate_basic(
        &self,
        username: &str,
        password: String,
    ) -> Result<Principal, AuthFailure> {
        let user = self.load_enabled_user(username, AuthFailure::InvalidCredentials).await?;

        let hash = user.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Password verification task failed");
                AuthFailure::Internal
            })?
            .map_err(|e| {
                tracing::error!(
                    username = %user.username,
                    error = %e,
                    "Stored password hash is unusable"
                );
                AuthFailure::Internal
            })?;

        if !matches {
            return Err(AuthFailure::InvalidCredentials);
        }
        Ok(Principal::from(&user))
    }

    async fn authenticate_bearer(&self, token: &str) -> Result<Principal, AuthFailure> {
        let config = self.jwt.as_ref().ok_or(AuthFailure::TokensDisabled)?;
        let claims = validate_jwt(token, config).map_err(|e| {
            tracing::debug!(error = %e, "Bearer token rejected");
            AuthFailure::InvalidToken
        })?;
        let username = claims
            .string_claim(&config.username_claim)
            .ok_or(AuthFailure::InvalidToken)?;

        let user = self.load_enabled_user(&username, AuthFailure::UnknownUser).await?;
        Ok(Principal::from(&user))
    }

    async fn load_enabled_user(
        &self,
        username: &str,
        missing: AuthFailure,
    ) -> Result<User, AuthFailure> {
        let user = self
            .store
            .find_user_by_username(username)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "User lookup failed during authentication");
                AuthFailure::Internal
            })?
            .ok_or(missing)?;
        if !user.enabled {
            return Err(AuthFailure::UserDisabled);
        }
        Ok(user)
    }
}
