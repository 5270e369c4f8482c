//! Request guards applied before authentication.
//!
//! Status codes:
//! - 413 Payload Too Large: declared body exceeds the limit
//! - 431 Request Header Fields Too Large: headers exceed the limit
//! - 414 URI Too Long
//! - 400 Bad Request: path traversal or NUL bytes in the path

use crate::config::SecurityLimitsConfig;
use crate::constants::{DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_HEADER_SIZE, DEFAULT_MAX_URI_LENGTH};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityError {
    #[error("Request payload size {size} exceeds limit {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("Total header size {total_size} exceeds limit {limit}")]
    HeadersTooLarge { total_size: usize, limit: usize },
    #[error("Path traversal attempt detected: {path}")]
    PathTraversal { path: String },
    #[error("URI length {length} exceeds limit {limit}")]
    UriTooLong { length: usize, limit: usize },
}

impl SecurityError {
    pub fn status(&self) -> u16 {
        match self {
            SecurityError::PayloadTooLarge { .. } => 413,
            SecurityError::HeadersTooLarge { .. } => 431,
            SecurityError::PathTraversal { .. } => 400,
            SecurityError::UriTooLong { .. } => 414,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SecurityError::PayloadTooLarge { .. } => "payload_too_large",
            SecurityError::HeadersTooLarge { .. } => "headers_too_large",
            SecurityError::PathTraversal { .. } => "bad_request",
            SecurityError::UriTooLong { .. } => "uri_too_long",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityLimits {
    pub max_body_size: usize,
    pub max_header_size: usize,
    pub max_uri_length: usize,
}

impl Default for SecurityLimits {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_uri_length: DEFAULT_MAX_URI_LENGTH,
        }
    }
}

impl From<&SecurityLimitsConfig> for SecurityLimits {
    fn from(config: &SecurityLimitsConfig) -> Self {
        Self {
            max_body_size: config.max_body_size,
            max_header_size: config.max_header_size,
            max_uri_length: config.max_uri_length,
        }
    }
}

pub fn validate_body_size(
    content_length: Option<usize>,
    limit: usize,
) -> Result<(), SecurityError> {
    if let Some(size) = content_length {
        if size > limit {
            return Err(SecurityError::PayloadTooLarge { size, limit });
        }
    }
    Ok(())
}

pub fn validate_header_size(total_size: usize, limit: usize) -> Result<(), SecurityError> {
    if total_size > limit {
        return Err(SecurityError::HeadersTooLarge { total_size, limit });
    }
    Ok(())
}

pub fn validate_uri_length(uri: &str, limit: usize) -> Result<(), SecurityError> {
    let length = uri.len();
    if length > limit {
        return Err(SecurityError::UriTooLong { length, limit });
    }
    Ok(())
}

/// Reject `..` segments in raw or percent-encoded form, and NUL bytes.
///
/// A literal `%2F` inside a segment is legitimate (the default vhost), so
/// only dot-dot sequences followed by a separator are rejected.
pub fn check_path_traversal(path: &str) -> Result<(), SecurityError> {
    let lower = path.to_lowercase();
    let traversal = lower.contains("../")
        || lower.contains("..\\")
        || lower.contains("%2e%2e%2f")
        || lower.contains("%2e%2e%5c")
        || lower.contains("%2e%2e/")
        || lower.contains("%2e%2e\\")
        || lower.contains("..%2f")
        || lower.contains("..%5c")
        || lower.ends_with("/..")
        || lower.ends_with("/%2e%2e");

    if traversal || path.contains('\0') || lower.contains("%00") {
        return Err(SecurityError::PathTraversal {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Run every guard in the order the gateway reports them
pub fn validate_request(
    uri: &str,
    path: &str,
    header_size: usize,
    content_length: Option<usize>,
    limits: &SecurityLimits,
) -> Result<(), SecurityError> {
    validate_uri_length(uri, limits.max_uri_length)?;
    validate_header_size(header_size, limits.max_header_size)?;
    validate_body_size(content_length, limits.max_body_size)?;
    check_path_traversal(path)
}
