//! Audit trail for every state-changing operation.
//!
//! Records are emitted as structured `tracing` events on the `audit` target
//! and retained in the store (bounded by `audit.max_records`) for the admin
//! query API. A failure to persist a record is logged and never fails the
//! audited request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AuditConfig;
use crate::error::ApiError;
use crate::metrics::Metrics;
use crate::model::ClusterId;
use crate::pagination::{Page, PageRequest};
use crate::store::Store;

/// Audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    UserCreate,
    UserUpdate,
    UserDelete,
    PasswordChange,
    ClusterCreate,
    ClusterUpdate,
    ClusterDelete,
    ClusterAssignUser,
    ClusterUnassignUser,
    QueueCreate,
    QueueDelete,
    QueuePurge,
    ExchangeCreate,
    ExchangeDelete,
    BindingCreate,
    MessagePublish,
    MessageGet,
    ConnectionClose,
    PassthroughWrite,
}

impl AuditOperation {
    pub const ALL: [AuditOperation; 19] = [
        AuditOperation::UserCreate,
        AuditOperation::UserUpdate,
        AuditOperation::UserDelete,
        AuditOperation::PasswordChange,
        AuditOperation::ClusterCreate,
        AuditOperation::ClusterUpdate,
        AuditOperation::ClusterDelete,
        AuditOperation::ClusterAssignUser,
        AuditOperation::ClusterUnassignUser,
        AuditOperation::QueueCreate,
        AuditOperation::QueueDelete,
        AuditOperation::QueuePurge,
        AuditOperation::ExchangeCreate,
        AuditOperation::ExchangeDelete,
        AuditOperation::BindingCreate,
        AuditOperation::MessagePublish,
        AuditOperation::MessageGet,
        AuditOperation::ConnectionClose,
        AuditOperation::PassthroughWrite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::UserCreate => "user_create",
            AuditOperation::UserUpdate => "user_update",
            AuditOperation::UserDelete => "user_delete",
            AuditOperation::PasswordChange => "password_change",
            AuditOperation::ClusterCreate => "cluster_create",
            AuditOperation::ClusterUpdate => "cluster_update",
            AuditOperation::ClusterDelete => "cluster_delete",
            AuditOperation::ClusterAssignUser => "cluster_assign_user",
            AuditOperation::ClusterUnassignUser => "cluster_unassign_user",
            AuditOperation::QueueCreate => "queue_create",
            AuditOperation::QueueDelete => "queue_delete",
            AuditOperation::QueuePurge => "queue_purge",
            AuditOperation::ExchangeCreate => "exchange_create",
            AuditOperation::ExchangeDelete => "exchange_delete",
            AuditOperation::BindingCreate => "binding_create",
            AuditOperation::MessagePublish => "message_publish",
            AuditOperation::MessageGet => "message_get",
            AuditOperation::ConnectionClose => "connection_close",
            AuditOperation::PassthroughWrite => "passthrough_write",
        }
    }

    /// Kind of object the operation acts on
    pub fn target_type(&self) -> &'static str {
        match self {
            AuditOperation::UserCreate
            | AuditOperation::UserUpdate
            | AuditOperation::UserDelete
            | AuditOperation::PasswordChange => "user",
            AuditOperation::ClusterCreate
            | AuditOperation::ClusterUpdate
            | AuditOperation::ClusterDelete
            | AuditOperation::ClusterAssignUser
            | AuditOperation::ClusterUnassignUser => "cluster",
            AuditOperation::QueueCreate
            | AuditOperation::QueueDelete
            | AuditOperation::QueuePurge
            | AuditOperation::MessageGet => "queue",
            AuditOperation::ExchangeCreate
            | AuditOperation::ExchangeDelete
            | AuditOperation::MessagePublish => "exchange",
            AuditOperation::BindingCreate => "binding",
            AuditOperation::ConnectionClose => "connection",
            AuditOperation::PassthroughWrite => "passthrough",
        }
    }
}

impl FromStr for AuditOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditOperation::ALL
            .iter()
            .find(|op| op.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown audit operation '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        }
    }
}

impl FromStr for AuditOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditOutcome::Success),
            "failure" => Ok(AuditOutcome::Failure),
            other => Err(format!("unknown audit outcome '{}'", other)),
        }
    }
}

/// One audited operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,

    /// RFC3339 on the wire
    pub timestamp: DateTime<Utc>,

    pub request_id: String,

    /// Authenticated gateway user
    pub username: String,

    pub operation: AuditOperation,

    pub target_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,

    /// Affected object, e.g. `vhost/queue` or a username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    pub outcome: AuditOutcome,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub client_ip: String,
}

impl AuditRecord {
    pub fn new(
        operation: AuditOperation,
        username: impl Into<String>,
        request_id: impl Into<String>,
        client_ip: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            request_id: request_id.into(),
            username: username.into(),
            operation,
            target_type: operation.target_type().to_string(),
            cluster_id: None,
            resource: None,
            outcome: AuditOutcome::Success,
            error: None,
            client_ip: client_ip.into(),
        }
    }

    pub fn with_cluster(mut self, cluster_id: ClusterId) -> Self {
        self.cluster_id = Some(cluster_id);
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_failure(mut self, error: impl Into<String>) -> Self {
        self.outcome = AuditOutcome::Failure;
        self.error = Some(error.into());
        self
    }

    /// Set outcome from the result of the audited operation
    pub fn with_result<T>(self, result: &Result<T, ApiError>) -> Self {
        match result {
            Ok(_) => self,
            Err(e) => self.with_failure(e.message()),
        }
    }
}

/// Filters accepted by the audit query endpoint
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub username: Option<String>,
    pub cluster_id: Option<ClusterId>,
    pub operation: Option<AuditOperation>,
    pub outcome: Option<AuditOutcome>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ApiError::validation(format!("{} must be an RFC3339 timestamp", field)))
}

impl AuditFilter {
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self, ApiError> {
        let cluster_id = params
            .get("clusterId")
            .or_else(|| params.get("cluster_id"))
            .map(|raw| {
                raw.parse::<ClusterId>()
                    .map_err(|_| ApiError::validation("clusterId must be a UUID"))
            })
            .transpose()?;
        let operation = params
            .get("operation")
            .map(|raw| raw.parse::<AuditOperation>().map_err(ApiError::Validation))
            .transpose()?;
        let outcome = params
            .get("outcome")
            .map(|raw| raw.parse::<AuditOutcome>().map_err(ApiError::Validation))
            .transpose()?;
        let from = params
            .get("from")
            .map(|raw| parse_timestamp(raw, "from"))
            .transpose()?;
        let to = params
            .get("to")
            .map(|raw| parse_timestamp(raw, "to"))
            .transpose()?;

        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(ApiError::validation("from must not be after to"));
            }
        }

        Ok(Self {
            username: params.get("username").filter(|u| !u.is_empty()).cloned(),
            cluster_id,
            operation,
            outcome,
            from,
            to,
        })
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(username) = &self.username {
            if !record.username.eq_ignore_ascii_case(username) {
                return false;
            }
        }
        if self.cluster_id.is_some() && record.cluster_id != self.cluster_id {
            return false;
        }
        if self.operation.is_some_and(|op| op != record.operation) {
            return false;
        }
        if self.outcome.is_some_and(|o| o != record.outcome) {
            return false;
        }
        if self.from.is_some_and(|from| record.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| record.timestamp > to) {
            return false;
        }
        true
    }
}

/// Writes and queries audit records
pub struct AuditService {
    store: Arc<dyn Store>,
    config: AuditConfig,
    metrics: Arc<Metrics>,
}

impl AuditService {
    pub fn new(store: Arc<dyn Store>, config: AuditConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Emit and persist a record. Never fails.
    pub async fn record(&self, record: AuditRecord) {
        if !self.config.enabled {
            return;
        }

        let cluster_id = record.cluster_id.map(|id| id.to_string());
        tracing::info!(
            target: "audit",
            audit_id = %record.id,
            request_id = %record.request_id,
            username = %record.username,
            operation = record.operation.as_str(),
            target_type = %record.target_type,
            cluster_id = cluster_id.as_deref(),
            resource = record.resource.as_deref(),
            outcome = record.outcome.as_str(),
            error = record.error.as_deref(),
            client_ip = %record.client_ip,
            "audit"
        );
        self.metrics.record_audit(record.outcome.as_str());

        let request_id = record.request_id.clone();
        if let Err(e) = self
            .store
            .append_audit(record, self.config.max_records)
            .await
        {
            tracing::error!(
                request_id = %request_id,
                error = %e,
                "Failed to persist audit record"
            );
        }
    }

    /// Matching records, newest first
    pub async fn query(
        &self,
        filter: &AuditFilter,
        page: &PageRequest,
    ) -> Result<Page<AuditRecord>, ApiError> {
        let records: Vec<AuditRecord> = self
            .store
            .audit_records()
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        Ok(Page::from_items(records, page.page, page.page_size))
    }
}
