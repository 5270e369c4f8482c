// Error types module
//
// Every handler returns `ApiError`; the gateway turns it into a JSON body and
// an HTTP status via `ApiError::status()` and `ApiError::to_body()`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Longest upstream body fragment echoed back to the caller
const MAX_UPSTREAM_BODY_IN_MESSAGE: usize = 512;

/// Failure of a single call to a cluster's Management API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The Management API rejected the credentials stored for the cluster (401/403)
    #[error("management API rejected the stored cluster credentials")]
    Unauthorized,

    /// The requested object does not exist upstream (404)
    #[error("resource not found on the management API")]
    NotFound,

    /// Connect, read or write did not finish in time
    #[error("management API request timed out")]
    Timeout,

    /// TCP or TLS connection could not be established
    #[error("could not connect to the management API: {0}")]
    ConnectFailed(String),

    /// Any other non-2xx response
    #[error("management API returned HTTP {status}")]
    Http { status: u16, body: String },

    /// Undecodable response or unclassified transport failure
    #[error("unexpected management API failure: {0}")]
    Unknown(String),
}

impl UpstreamError {
    /// Classify a non-success status. Returns `None` for 2xx.
    pub fn from_status(status: u16, body: String) -> Option<Self> {
        match status {
            200..=299 => None,
            401 | 403 => Some(UpstreamError::Unauthorized),
            404 => Some(UpstreamError::NotFound),
            _ => Some(UpstreamError::Http { status, body }),
        }
    }

    /// Classify a transport-level reqwest failure
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else if err.is_connect() {
            UpstreamError::ConnectFailed(err.to_string())
        } else if let Some(status) = err.status() {
            UpstreamError::from_status(status.as_u16(), String::new())
                .unwrap_or_else(|| UpstreamError::Unknown(err.to_string()))
        } else {
            UpstreamError::Unknown(err.to_string())
        }
    }

    /// Label used for the `outcome` dimension of upstream metrics
    pub fn outcome_label(&self) -> &'static str {
        match self {
            UpstreamError::Unauthorized => "unauthorized",
            UpstreamError::NotFound => "not_found",
            UpstreamError::Timeout => "timeout",
            UpstreamError::ConnectFailed(_) => "connect_failed",
            UpstreamError::Http { .. } => "http_error",
            UpstreamError::Unknown(_) => "unknown",
        }
    }
}

/// Authentication and authorization failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("you are not assigned to this cluster")]
    Forbidden,

    #[error("cluster is inactive")]
    ClusterInactive,

    #[error("cluster not found")]
    ClusterNotFound,

    #[error("administrator role required")]
    AdminRequired,
}

/// Top-level error returned by every gateway handler
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("too many requests")]
    RateLimited,

    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error payload written for every failed request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub status: u16,
    pub request_id: String,
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::Internal(msg.into())
    }

    /// HTTP status code returned to the caller
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Access(AccessError::Unauthenticated) => 401,
            ApiError::Access(AccessError::Forbidden) => 403,
            ApiError::Access(AccessError::AdminRequired) => 403,
            ApiError::Access(AccessError::ClusterNotFound) => 404,
            ApiError::Access(AccessError::ClusterInactive) => 409,
            // Stored cluster credentials were rejected; not the caller's fault
            ApiError::Upstream(UpstreamError::Unauthorized) => 502,
            ApiError::Upstream(UpstreamError::NotFound) => 404,
            ApiError::Upstream(UpstreamError::Timeout) => 504,
            ApiError::Upstream(UpstreamError::ConnectFailed(_)) => 502,
            ApiError::Upstream(UpstreamError::Http { status, .. }) => {
                if (400..500).contains(status) {
                    *status
                } else {
                    502
                }
            }
            ApiError::Upstream(UpstreamError::Unknown(_)) => 502,
            ApiError::Store(StoreError::NotFound(_)) => 404,
            ApiError::Store(StoreError::Conflict(_)) => 409,
            ApiError::Store(StoreError::Persistence(_)) => 500,
            ApiError::Validation(_) | ApiError::BadRequest(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::MethodNotAllowed => 405,
            ApiError::RateLimited => 429,
            ApiError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Access(AccessError::Unauthenticated) => "unauthenticated",
            ApiError::Access(AccessError::Forbidden) => "forbidden",
            ApiError::Access(AccessError::AdminRequired) => "admin_required",
            ApiError::Access(AccessError::ClusterNotFound) => "cluster_not_found",
            ApiError::Access(AccessError::ClusterInactive) => "cluster_inactive",
            ApiError::Upstream(UpstreamError::Unauthorized) => "upstream_unauthorized",
            ApiError::Upstream(UpstreamError::NotFound) => "upstream_not_found",
            ApiError::Upstream(UpstreamError::Timeout) => "upstream_timeout",
            ApiError::Upstream(UpstreamError::ConnectFailed(_)) => "upstream_connect_failed",
            ApiError::Upstream(UpstreamError::Http { .. }) => "upstream_http_error",
            ApiError::Upstream(UpstreamError::Unknown(_)) => "upstream_unknown",
            ApiError::Store(StoreError::NotFound(_)) => "not_found",
            ApiError::Store(StoreError::Conflict(_)) => "conflict",
            ApiError::Store(StoreError::Persistence(_)) => "internal",
            ApiError::Validation(_) => "validation",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::MethodNotAllowed => "method_not_allowed",
            ApiError::RateLimited => "rate_limited",
            ApiError::Internal(_) => "internal",
        }
    }

    /// Message shown to the caller. Internal details are not exposed.
    pub fn message(&self) -> String {
        match self {
            ApiError::Upstream(UpstreamError::Http { status, body }) if !body.is_empty() => {
                let mut snippet: String =
                    body.chars().take(MAX_UPSTREAM_BODY_IN_MESSAGE).collect();
                if snippet.len() < body.len() {
                    snippet.push_str("...");
                }
                format!("management API returned HTTP {}: {}", status, snippet)
            }
            ApiError::Store(StoreError::Persistence(_)) | ApiError::Internal(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn to_body(&self, request_id: &str) -> ErrorBody {
        ErrorBody {
            error: self.kind().to_string(),
            message: self.message(),
            status: self.status(),
            request_id: request_id.to_string(),
        }
    }
}
