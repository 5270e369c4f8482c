//! Server configuration types.
//!
//! This module defines the server-level configuration including:
//! - Address and port bindings
//! - Concurrency limits and worker threads
//! - Security validation limits (body size, header size, URI length)
//! - Global and per-IP rate limiting settings
//! - Reverse proxies whose `X-Forwarded-For` is believed
//!
//! Default values are sourced from `crate::constants`.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::constants::{
    DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_MAX_HEADER_SIZE,
    DEFAULT_MAX_URI_LENGTH, DEFAULT_THREADS,
};

use super::rate_limit::RateLimitConfigYaml;

fn default_max_concurrent_requests() -> usize {
    DEFAULT_MAX_CONCURRENT_REQUESTS
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

fn default_max_body_size() -> usize {
    DEFAULT_MAX_BODY_SIZE
}

fn default_max_header_size() -> usize {
    DEFAULT_MAX_HEADER_SIZE
}

fn default_max_uri_length() -> usize {
    DEFAULT_MAX_URI_LENGTH
}

/// Security validation limits configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityLimitsConfig {
    /// Maximum request body size in bytes (default: 10 MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// Maximum total header size in bytes (default: 64 KB)
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
    /// Maximum URI length in bytes (default: 8 KB)
    #[serde(default = "default_max_uri_length")]
    pub max_uri_length: usize,
}

impl Default for SecurityLimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
            max_header_size: default_max_header_size(),
            max_uri_length: default_max_uri_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    /// Number of worker threads (default: 4)
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfigYaml>,
    #[serde(default)]
    pub security_limits: SecurityLimitsConfig,
    /// Peers allowed to report the client address via `X-Forwarded-For`.
    /// Empty means the header is ignored and the socket peer is the client.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl ServerConfig {
    /// Socket address string the gateway listens on
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
