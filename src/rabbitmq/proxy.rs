//! Authorizing proxy in front of every Management API call.
//!
//! `resolve` loads the cluster, checks that the caller is an administrator or
//! assigned to it, then checks that it is active. Only after both checks pass
//! is a pooled client fetched and exactly one HTTP request made.

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use super::client::{ManagementClient, UpstreamResponse};
use super::pool::ClientPool;
use crate::access::{check_cluster_callable, require_admin};
use crate::auth::Principal;
use crate::error::{AccessError, ApiError, UpstreamError};
use crate::metrics::Metrics;
use crate::model::{ClusterConnection, ClusterId};
use crate::store::{Store, StoreError};

/// Result of probing a cluster's stored credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTest {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rabbitmq_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ProxyService {
    store: Arc<dyn Store>,
    pool: Arc<ClientPool>,
    metrics: Arc<Metrics>,
}

impl ProxyService {
    pub fn new(store: Arc<dyn Store>, pool: Arc<ClientPool>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            pool,
            metrics,
        }
    }

    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.pool
    }

    async fn load_cluster(&self, cluster_id: &ClusterId) -> Result<ClusterConnection, ApiError> {
        match self.store.get_cluster(cluster_id).await {
            Ok(cluster) => Ok(cluster),
            Err(StoreError::NotFound(_)) => Err(AccessError::ClusterNotFound.into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the cluster and run the access and active checks, in that order
    pub async fn resolve(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
    ) -> Result<ClusterConnection, ApiError> {
        let cluster = self.load_cluster(cluster_id).await?;
        if let Err(denied) = check_cluster_callable(principal, &cluster) {
            if denied == AccessError::Forbidden {
                self.metrics.record_access_denied();
            }
            tracing::warn!(
                username = %principal.username,
                cluster_id = %cluster_id,
                reason = %denied,
                "Cluster access denied"
            );
            return Err(denied.into());
        }
        Ok(cluster)
    }

    fn observe<T>(
        &self,
        cluster: &ClusterConnection,
        started: Instant,
        result: &Result<T, UpstreamError>,
    ) {
        let outcome = match result {
            Ok(_) => "success",
            Err(e) => e.outcome_label(),
        };
        self.metrics
            .record_upstream(&cluster.name, outcome, started.elapsed());
        if let Err(e) = result {
            tracing::warn!(
                cluster_id = %cluster.id,
                cluster = %cluster.name,
                error = %e,
                "Management API call failed"
            );
        }
    }

    fn client(&self, cluster: &ClusterConnection) -> Result<Arc<ManagementClient>, ApiError> {
        Ok(self.pool.client_for(cluster)?)
    }

    /// GET a JSON document from an authorized cluster
    pub async fn get_json(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        path: &str,
    ) -> Result<Value, ApiError> {
        let cluster = self.resolve(principal, cluster_id).await?;
        let client = self.client(&cluster)?;
        let started = Instant::now();
        let result = client.get_json(path).await;
        self.observe(&cluster, started, &result);
        Ok(result?)
    }

    /// GET a JSON array from an authorized cluster
    pub async fn get_list(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        path: &str,
    ) -> Result<Vec<Value>, ApiError> {
        let cluster = self.resolve(principal, cluster_id).await?;
        let client = self.client(&cluster)?;
        let started = Instant::now();
        let result = client.get_list(path).await;
        self.observe(&cluster, started, &result);
        Ok(result?)
    }

    /// Any method against an authorized cluster
    pub async fn send(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<UpstreamResponse, ApiError> {
        let cluster = self.resolve(principal, cluster_id).await?;
        let client = self.client(&cluster)?;
        let started = Instant::now();
        let result = client.send(method, path, body).await;
        self.observe(&cluster, started, &result);
        Ok(result?)
    }

    /// Probe stored credentials with `GET /api/overview`.
    ///
    /// Admin only; works for inactive clusters and bypasses the pool so a
    /// failing probe leaves the pooled client untouched.
    pub async fn test_connection(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
    ) -> Result<ConnectionTest, ApiError> {
        require_admin(principal)?;
        let cluster = self.load_cluster(cluster_id).await?;
        let client = ManagementClient::new(&cluster, self.pool.config())?;

        let started = Instant::now();
        let result = client.get_json("/overview").await;
        self.observe(&cluster, started, &result);

        Ok(match result {
            Ok(overview) => ConnectionTest {
                reachable: true,
                rabbitmq_version: overview
                    .get("rabbitmq_version")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                error: None,
            },
            Err(e) => ConnectionTest {
                reachable: false,
                rabbitmq_version: None,
                error: Some(e.to_string()),
            },
        })
    }
}
