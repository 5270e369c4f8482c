//! Audit logging configuration types.
//!
//! Audit records are always emitted as `tracing` events on the `audit`
//! target; `max_records` bounds how many are kept in the store for the
//! audit query API.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_AUDIT_MAX_RECORDS;

fn default_enabled() -> bool {
    true
}

fn default_max_records() -> usize {
    DEFAULT_AUDIT_MAX_RECORDS
}

/// Audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable/disable audit recording (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum number of records retained; the oldest are evicted first (default: 10000)
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_records: default_max_records(),
        }
    }
}
