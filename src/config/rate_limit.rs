//! Rate limiting configuration types.
//!
//! This module defines rate limiting configuration at two levels:
//! - Global rate limits (gateway-wide)
//! - Per-IP rate limits (client throttling)

use serde::{Deserialize, Serialize};

/// Rate limiting configuration for server (global and per-IP)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfigYaml {
    /// Enable rate limiting
    #[serde(default)]
    pub enabled: bool,
    /// Global rate limit (requests per second across all clients)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalRateLimitConfigYaml>,
    /// Per-IP rate limit (requests per second per client IP)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_ip: Option<PerIpRateLimitConfigYaml>,
}

/// Global rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalRateLimitConfigYaml {
    /// Requests per second (global limit)
    pub requests_per_second: u32,
}

/// Per-IP rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerIpRateLimitConfigYaml {
    /// Requests per second per IP address
    pub requests_per_second: u32,
}
