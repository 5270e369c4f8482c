//! One long-lived Management API client per cluster.
//!
//! Each entry remembers a fingerprint of the URL and credentials it was
//! built from. A lookup with a changed fingerprint rebuilds the client, so
//! credential rotation takes effect even if an explicit invalidation is missed.
//! Deleted clusters are remembered so a request that raced the deletion
//! cannot put their client back.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::client::ManagementClient;
use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::metrics::Metrics;
use crate::model::{ClusterConnection, ClusterId};

struct PooledClient {
    fingerprint: String,
    client: Arc<ManagementClient>,
}

#[derive(Default)]
struct Entries {
    clients: HashMap<ClusterId, PooledClient>,
    /// Cluster ids are never reused, so tombstones are kept for good
    evicted: HashSet<ClusterId>,
}

/// SHA-256 over URL, username and secret
pub fn fingerprint(cluster: &ClusterConnection) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cluster.api_url.as_bytes());
    hasher.update([0u8]);
    hasher.update(cluster.username.as_bytes());
    hasher.update([0u8]);
    hasher.update(cluster.secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct ClientPool {
    entries: RwLock<Entries>,
    config: UpstreamConfig,
    metrics: Arc<Metrics>,
}

impl ClientPool {
    pub fn new(config: UpstreamConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    fn cached(&self, cluster_id: &ClusterId, wanted: &str) -> Option<Arc<ManagementClient>> {
        self.entries
            .read()
            .clients
            .get(cluster_id)
            .filter(|entry| entry.fingerprint == wanted)
            .map(|entry| Arc::clone(&entry.client))
    }

    /// Cached client for `cluster`, rebuilt when its URL or credentials changed.
    /// A deleted cluster still gets a client, but it is not pooled.
    pub fn client_for(
        &self,
        cluster: &ClusterConnection,
    ) -> Result<Arc<ManagementClient>, UpstreamError> {
        let wanted = fingerprint(cluster);
        if let Some(client) = self.cached(&cluster.id, &wanted) {
            return Ok(client);
        }

        // Built before locking: client setup loads TLS roots
        let client = Arc::new(ManagementClient::new(cluster, &self.config)?);

        let mut entries = self.entries.write();
        if entries.evicted.contains(&cluster.id) {
            tracing::debug!(
                cluster_id = %cluster.id,
                cluster = %cluster.name,
                "Cluster was deleted, management API client not pooled"
            );
            return Ok(client);
        }
        // Another task may have built one while we were building ours
        if let Some(entry) = entries.clients.get(&cluster.id) {
            if entry.fingerprint == wanted {
                return Ok(Arc::clone(&entry.client));
            }
        }

        let replaced = entries
            .clients
            .insert(
                cluster.id,
                PooledClient {
                    fingerprint: wanted,
                    client: Arc::clone(&client),
                },
            )
            .is_some();
        self.metrics.set_pooled_clients(entries.clients.len());
        tracing::debug!(
            cluster_id = %cluster.id,
            cluster = %cluster.name,
            replaced,
            "Built management API client"
        );
        Ok(client)
    }

    /// Drop the cached client after a cluster update or deactivation
    pub fn invalidate(&self, cluster_id: &ClusterId) {
        let mut entries = self.entries.write();
        if entries.clients.remove(cluster_id).is_some() {
            tracing::debug!(cluster_id = %cluster_id, "Invalidated management API client");
        }
        self.metrics.set_pooled_clients(entries.clients.len());
    }

    /// Drop the cached client of a deleted cluster and never pool it again
    pub fn evict(&self, cluster_id: &ClusterId) {
        let mut entries = self.entries.write();
        entries.evicted.insert(*cluster_id);
        if entries.clients.remove(cluster_id).is_some() {
            tracing::debug!(cluster_id = %cluster_id, "Evicted management API client");
        }
        self.metrics.set_pooled_clients(entries.clients.len());
    }

    pub fn contains(&self, cluster_id: &ClusterId) -> bool {
        self.entries.read().clients.contains_key(cluster_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
