// Configuration module

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub mod audit;
pub mod jwt;
pub mod rate_limit;
pub mod server;
pub mod upstream;

pub use audit::AuditConfig;
pub use jwt::JwtConfig;
pub use rate_limit::{GlobalRateLimitConfigYaml, PerIpRateLimitConfigYaml, RateLimitConfigYaml};
pub use server::{SecurityLimitsConfig, ServerConfig};
pub use upstream::{PaginationConfig, UpstreamConfig};

use crate::model::{validate_api_url, validate_password, validate_username};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_admin: Option<BootstrapAdminConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    /// Clusters registered at start-up when the store does not know them yet
    #[serde(default)]
    pub clusters: Vec<SeedClusterConfig>,
}

/// Administrator created on first start when the store holds no users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapAdminConfig {
    pub username: String,
    pub password: String,
}

/// Persistence settings for the in-memory store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON snapshot written after every mutation and loaded on start-up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
}

fn default_seed_active() -> bool {
    true
}

/// Cluster connection declared in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedClusterConfig {
    pub name: String,
    pub api_url: String,
    pub username: String,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_seed_active")]
    pub active: bool,
    /// Gateway usernames granted access to this cluster
    #[serde(default)]
    pub assigned_users: Vec<String>,
}

impl Config {
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, String> {
        // Replace ${VAR_NAME} with environment variable values
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").map_err(|e| e.to_string())?;

        // First, check that all referenced environment variables exist
        for caps in re.captures_iter(yaml) {
            let var_name = &caps[1];
            std::env::var(var_name).map_err(|_| {
                format!(
                    "Environment variable '{}' is referenced but not set",
                    var_name
                )
            })?;
        }

        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        });

        serde_yaml::from_str(&substituted).map_err(|e| e.to_string())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_yaml_with_env(&yaml)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.address.trim().is_empty() {
            return Err("server.address cannot be empty".to_string());
        }
        if self.server.max_concurrent_requests == 0 {
            return Err("server.max_concurrent_requests must be > 0".to_string());
        }
        if self.server.threads == 0 {
            return Err("server.threads must be > 0".to_string());
        }

        if self.upstream.request_timeout_ms == 0 || self.upstream.connect_timeout_ms == 0 {
            return Err("upstream timeouts must be > 0 milliseconds".to_string());
        }

        if self.pagination.default_page_size == 0 {
            return Err("pagination.default_page_size must be > 0".to_string());
        }
        if self.pagination.default_page_size > self.pagination.max_page_size {
            return Err(format!(
                "pagination.default_page_size ({}) exceeds pagination.max_page_size ({})",
                self.pagination.default_page_size, self.pagination.max_page_size
            ));
        }

        if let Some(jwt) = &self.jwt {
            if jwt.enabled {
                if jwt.secret.is_empty() {
                    return Err("jwt.secret cannot be empty when JWT is enabled".to_string());
                }
                if !jwt::SUPPORTED_ALGORITHMS.contains(&jwt.algorithm.as_str()) {
                    return Err(format!(
                        "Unsupported JWT algorithm '{}'. Supported: {}",
                        jwt.algorithm,
                        jwt::SUPPORTED_ALGORITHMS.join(", ")
                    ));
                }
                if jwt.username_claim.trim().is_empty() {
                    return Err("jwt.username_claim cannot be empty".to_string());
                }
            }
        }

        if let Some(admin) = &self.bootstrap_admin {
            validate_username(&admin.username).map_err(|e| format!("bootstrap_admin: {}", e))?;
            validate_password(&admin.password).map_err(|e| format!("bootstrap_admin: {}", e))?;
        }

        if self.audit.enabled && self.audit.max_records == 0 {
            return Err("audit.max_records must be > 0 when audit is enabled".to_string());
        }

        let mut seen_names = HashSet::new();
        for cluster in &self.clusters {
            if cluster.name.trim().is_empty() {
                return Err("Cluster name cannot be empty".to_string());
            }
            if !seen_names.insert(cluster.name.to_lowercase()) {
                return Err(format!("Duplicate cluster name '{}'", cluster.name));
            }
            validate_api_url(&cluster.api_url)
                .map_err(|e| format!("Cluster '{}': {}", cluster.name, e))?;
            if cluster.username.trim().is_empty() {
                return Err(format!("Cluster '{}' has empty username", cluster.name));
            }
            if cluster.secret.is_empty() {
                return Err(format!("Cluster '{}' has empty secret", cluster.name));
            }
        }

        Ok(())
    }
}
