// Constants module - centralized default values for configuration
//
// This module defines all default values used throughout the codebase.
// Using constants instead of magic numbers improves maintainability
// and makes it easier to understand and modify defaults.

// =============================================================================
// Server defaults
// =============================================================================

/// Default maximum concurrent requests
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 1000;

/// Default number of worker threads
pub const DEFAULT_THREADS: usize = 4;

/// Seconds suggested to clients in `Retry-After` when the gateway is saturated
pub const RETRY_AFTER_SECS: u64 = 5;

// =============================================================================
// Upstream (Management API) defaults
// =============================================================================

/// Default timeout for a single Management API request in milliseconds
pub const DEFAULT_UPSTREAM_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default TCP connect timeout for the Management API in milliseconds
pub const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_MS: u64 = 3_000;

// =============================================================================
// Pagination defaults
// =============================================================================

/// Default number of items per page
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Largest page size a client may request
pub const DEFAULT_MAX_PAGE_SIZE: usize = 500;

/// Upper bound on messages fetched by a single queue "get"
pub const MAX_MESSAGES_PER_GET: u32 = 100;

// =============================================================================
// Security defaults
// =============================================================================

/// Default maximum request body size (10 MB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Default maximum header size (64 KB)
pub const DEFAULT_MAX_HEADER_SIZE: usize = 64 * 1024;

/// Default maximum URI length (8 KB)
pub const DEFAULT_MAX_URI_LENGTH: usize = 8192;

/// Minimum accepted password length for gateway users
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Failed authentications allowed per client IP per minute
pub const AUTH_FAILURES_PER_MINUTE: u32 = 10;

/// How long a client IP is refused after exhausting its failure budget
pub const AUTH_LOCKOUT_SECS: u64 = 60;

// =============================================================================
// JWT defaults
// =============================================================================

/// Claim holding the gateway username when none is configured
pub const DEFAULT_USERNAME_CLAIM: &str = "sub";

// =============================================================================
// Audit defaults
// =============================================================================

/// Default number of audit records retained by the store
pub const DEFAULT_AUDIT_MAX_RECORDS: usize = 10_000;
