use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{validate_api_url, validate_cluster_name, ClusterId, UserId};

/// Stored connection to one RabbitMQ Management API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConnection {
    pub id: ClusterId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub api_url: String,
    pub username: String,
    pub secret: String,
    pub active: bool,
    /// Non-admin users allowed to call this cluster
    #[serde(default)]
    pub assigned_users: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClusterConnection {
    pub fn is_assigned(&self, user_id: &UserId) -> bool {
        self.assigned_users.contains(user_id)
    }

    pub fn view(&self) -> ClusterView {
        ClusterView {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            api_url: self.api_url.clone(),
            username: self.username.clone(),
            has_secret: !self.secret.is_empty(),
            active: self.active,
            assigned_user_count: self.assigned_users.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Public projection of a cluster connection; the secret is never exposed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterView {
    pub id: ClusterId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub api_url: String,
    pub username: String,
    pub has_secret: bool,
    pub active: bool,
    pub assigned_user_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

/// Body of a cluster creation request
#[derive(Debug, Clone, Deserialize)]
pub struct NewCluster {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(alias = "apiUrl")]
    pub api_url: String,
    pub username: String,
    pub secret: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl NewCluster {
    pub fn validate(&self) -> Result<(), String> {
        validate_cluster_name(&self.name)?;
        validate_api_url(&self.api_url)?;
        if self.username.trim().is_empty() {
            return Err("username cannot be empty".to_string());
        }
        if self.secret.is_empty() {
            return Err("secret cannot be empty".to_string());
        }
        Ok(())
    }

    pub fn into_cluster(self) -> ClusterConnection {
        let now = Utc::now();
        ClusterConnection {
            id: ClusterId::new(),
            name: self.name.trim().to_string(),
            description: self.description.filter(|d| !d.trim().is_empty()),
            api_url: self.api_url,
            username: self.username,
            secret: self.secret,
            active: self.active,
            assigned_users: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Body of a cluster update request; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "apiUrl")]
    pub api_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl ClusterPatch {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            validate_cluster_name(name)?;
        }
        if let Some(url) = &self.api_url {
            validate_api_url(url)?;
        }
        if matches!(&self.username, Some(u) if u.trim().is_empty()) {
            return Err("username cannot be empty".to_string());
        }
        if matches!(&self.secret, Some(s) if s.is_empty()) {
            return Err("secret cannot be empty".to_string());
        }
        Ok(())
    }

    pub fn apply(self, cluster: &mut ClusterConnection) {
        if let Some(name) = self.name {
            cluster.name = name.trim().to_string();
        }
        if let Some(description) = self.description {
            cluster.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if let Some(url) = self.api_url {
            cluster.api_url = url;
        }
        if let Some(username) = self.username {
            cluster.username = username;
        }
        if let Some(secret) = self.secret {
            cluster.secret = secret;
        }
        if let Some(active) = self.active {
            cluster.active = active;
        }
        cluster.updated_at = Utc::now();
    }
}
