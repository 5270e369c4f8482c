//! Management API client and pagination configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE, DEFAULT_UPSTREAM_CONNECT_TIMEOUT_MS,
    DEFAULT_UPSTREAM_REQUEST_TIMEOUT_MS,
};

fn default_request_timeout_ms() -> u64 {
    DEFAULT_UPSTREAM_REQUEST_TIMEOUT_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_UPSTREAM_CONNECT_TIMEOUT_MS
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_max_page_size() -> usize {
    DEFAULT_MAX_PAGE_SIZE
}

/// Settings shared by every pooled Management API client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Whole-request timeout in milliseconds (default: 10000)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// TCP connect timeout in milliseconds (default: 3000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Skip TLS certificate verification for self-signed management endpoints
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            accept_invalid_certs: false,
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Client-side pagination limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Page size used when the request does not specify one (default: 50)
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Largest accepted page size (default: 500)
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}
