//! Domain model: gateway users and RabbitMQ cluster connections.
//!
//! Entities are stored as-is; API responses use the `*View` projections so
//! password hashes and cluster secrets never leave the process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod cluster;
pub mod user;

pub use cluster::{ClusterConnection, ClusterPatch, ClusterView, NewCluster};
pub use user::{Role, User, UserPatch, UserView};

use crate::constants::MIN_PASSWORD_LENGTH;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(UserId);
uuid_id!(ClusterId);

/// Maximum username length
pub const MAX_USERNAME_LENGTH: usize = 50;
/// Minimum username length
pub const MIN_USERNAME_LENGTH: usize = 3;
/// Maximum cluster name length
pub const MAX_CLUSTER_NAME_LENGTH: usize = 100;

/// Usernames are 3-50 characters of `[A-Za-z0-9_.-]`
pub fn validate_username(username: &str) -> Result<(), String> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        return Err(format!(
            "username must be between {} and {} characters",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(
            "username may only contain letters, digits, '_', '.' and '-'".to_string(),
        );
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_cluster_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("cluster name cannot be empty".to_string());
    }
    if trimmed.chars().count() > MAX_CLUSTER_NAME_LENGTH {
        return Err(format!(
            "cluster name must be at most {} characters",
            MAX_CLUSTER_NAME_LENGTH
        ));
    }
    Ok(())
}

/// Management API URLs must be absolute http(s) URIs with a non-empty host
pub fn validate_api_url(url: &str) -> Result<(), String> {
    let uri: http::Uri = url
        .trim()
        .parse()
        .map_err(|e| format!("api_url '{}' is not a valid URI: {}", url, e))?;

    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => {
            return Err(format!(
                "api_url must start with http:// or https:// (got '{}')",
                url
            ))
        }
    }

    let host = uri
        .host()
        .unwrap_or_default()
        .trim_start_matches('[')
        .trim_end_matches(']');
    if host.is_empty() {
        return Err("api_url must include a host".to_string());
    }
    Ok(())
}
