//! In-memory store with optional JSON snapshot persistence.
//!
//! All state lives behind a single `tokio::sync::RwLock`, so cascading
//! operations (user deletion removing assignments) are atomic. When a
//! snapshot path is configured, a mutation is applied to a copy of the
//! state, the copy is written out (temp file + rename) and only then
//! replaces the live state. A failed write leaves memory unchanged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use super::{Store, StoreError, StoreResult};
use crate::audit::AuditRecord;
use crate::model::{ClusterConnection, ClusterId, ClusterPatch, User, UserId, UserPatch};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default)]
struct State {
    users: HashMap<UserId, User>,
    clusters: HashMap<ClusterId, ClusterConnection>,
    /// Oldest first
    audit: VecDeque<AuditRecord>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    users: Vec<&'a User>,
    clusters: Vec<&'a ClusterConnection>,
    audit: &'a VecDeque<AuditRecord>,
}

#[derive(Deserialize)]
struct SnapshotOwned {
    version: u32,
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    clusters: Vec<ClusterConnection>,
    #[serde(default)]
    audit: VecDeque<AuditRecord>,
}

pub struct MemoryStore {
    state: RwLock<State>,
    snapshot_path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store; everything is lost on restart
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            snapshot_path: None,
        }
    }

    /// Store backed by a JSON snapshot, loaded if the file exists
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: SnapshotOwned = serde_json::from_slice(&bytes).map_err(|e| {
                    StoreError::Persistence(format!(
                        "invalid snapshot {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                if snapshot.version != SNAPSHOT_VERSION {
                    return Err(StoreError::Persistence(format!(
                        "unsupported snapshot version {} in {}",
                        snapshot.version,
                        path.display()
                    )));
                }
                tracing::info!(
                    path = %path.display(),
                    users = snapshot.users.len(),
                    clusters = snapshot.clusters.len(),
                    "Loaded store snapshot"
                );
                State {
                    users: snapshot.users.into_iter().map(|u| (u.id, u)).collect(),
                    clusters: snapshot.clusters.into_iter().map(|c| (c.id, c)).collect(),
                    audit: snapshot.audit,
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No store snapshot found, starting empty");
                State::default()
            }
            Err(e) => {
                return Err(StoreError::Persistence(format!(
                    "failed to read snapshot {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
        })
    }

    /// Runs `change` under the write lock. With a snapshot configured the
    /// change is made on a clone that is only published after it has been
    /// written to disk.
    async fn commit<T, F>(&self, change: F) -> StoreResult<T>
    where
        T: Send,
        F: FnOnce(&mut State) -> StoreResult<T> + Send,
    {
        let mut state = self.state.write().await;
        if self.snapshot_path.is_none() {
            return change(&mut *state);
        }

        let mut next = State::clone(&state);
        let value = change(&mut next)?;
        self.persist(&next).await?;
        *state = next;
        Ok(value)
    }

    async fn persist(&self, state: &State) -> StoreResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let mut users: Vec<&User> = state.users.values().collect();
        users.sort_by_key(|u| u.created_at);
        let mut clusters: Vec<&ClusterConnection> = state.clusters.values().collect();
        clusters.sort_by_key(|c| c.created_at);

        let bytes = serde_json::to_vec_pretty(&SnapshotRef {
            version: SNAPSHOT_VERSION,
            users,
            clusters,
            audit: &state.audit,
        })
        .map_err(|e| StoreError::Persistence(format!("failed to encode snapshot: {}", e)))?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| {
            StoreError::Persistence(format!("failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            StoreError::Persistence(format!("failed to replace {}: {}", path.display(), e))
        })
    }
}

fn username_taken(state: &State, username: &str, except: Option<&UserId>) -> bool {
    state
        .users
        .values()
        .any(|u| Some(&u.id) != except && u.username.eq_ignore_ascii_case(username))
}

fn cluster_name_taken(state: &State, name: &str, except: Option<&ClusterId>) -> bool {
    state
        .clusters
        .values()
        .any(|c| Some(&c.id) != except && c.name.to_lowercase() == name.to_lowercase())
}

#[async_trait]
impl Store for MemoryStore {
    async fn user_count(&self) -> StoreResult<usize> {
        Ok(self.state.read().await.users.len())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by(|a, b| a.username.to_lowercase().cmp(&b.username.to_lowercase()));
        Ok(users)
    }

    async fn get_user(&self, id: &UserId) -> StoreResult<User> {
        self.state
            .read()
            .await
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn create_user(&self, user: User) -> StoreResult<User> {
        self.commit(|state| {
            if username_taken(state, &user.username, None) {
                return Err(StoreError::Conflict(format!(
                    "username '{}' already exists",
                    user.username
                )));
            }
            state.users.insert(user.id, user.clone());
            Ok(user)
        })
        .await
    }

    async fn update_user(&self, id: &UserId, patch: UserPatch) -> StoreResult<User> {
        self.commit(|state| {
            let user = state
                .users
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))?;
            patch.apply(user);
            Ok(user.clone())
        })
        .await
    }

    async fn delete_user(&self, id: &UserId) -> StoreResult<()> {
        self.commit(|state| {
            if state.users.remove(id).is_none() {
                return Err(StoreError::NotFound(format!("user {}", id)));
            }
            for cluster in state.clusters.values_mut() {
                cluster.assigned_users.remove(id);
            }
            Ok(())
        })
        .await
    }

    async fn list_clusters(&self) -> StoreResult<Vec<ClusterConnection>> {
        let state = self.state.read().await;
        let mut clusters: Vec<ClusterConnection> = state.clusters.values().cloned().collect();
        clusters.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(clusters)
    }

    async fn get_cluster(&self, id: &ClusterId) -> StoreResult<ClusterConnection> {
        self.state
            .read()
            .await
            .clusters
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("cluster {}", id)))
    }

    async fn find_cluster_by_name(&self, name: &str) -> StoreResult<Option<ClusterConnection>> {
        let wanted = name.to_lowercase();
        Ok(self
            .state
            .read()
            .await
            .clusters
            .values()
            .find(|c| c.name.to_lowercase() == wanted)
            .cloned())
    }

    async fn create_cluster(&self, cluster: ClusterConnection) -> StoreResult<ClusterConnection> {
        self.commit(|state| {
            if cluster_name_taken(state, &cluster.name, None) {
                return Err(StoreError::Conflict(format!(
                    "cluster name '{}' already exists",
                    cluster.name
                )));
            }
            state.clusters.insert(cluster.id, cluster.clone());
            Ok(cluster)
        })
        .await
    }

    async fn update_cluster(
        &self,
        id: &ClusterId,
        patch: ClusterPatch,
    ) -> StoreResult<ClusterConnection> {
        self.commit(|state| {
            if let Some(name) = &patch.name {
                if cluster_name_taken(state, name.trim(), Some(id)) {
                    return Err(StoreError::Conflict(format!(
                        "cluster name '{}' already exists",
                        name.trim()
                    )));
                }
            }
            let cluster = state
                .clusters
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(format!("cluster {}", id)))?;
            patch.apply(cluster);
            Ok(cluster.clone())
        })
        .await
    }

    async fn delete_cluster(&self, id: &ClusterId) -> StoreResult<()> {
        self.commit(|state| match state.clusters.remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("cluster {}", id))),
        })
        .await
    }

    async fn assign_user(
        &self,
        cluster_id: &ClusterId,
        user_id: &UserId,
    ) -> StoreResult<ClusterConnection> {
        self.commit(|state| {
            if !state.users.contains_key(user_id) {
                return Err(StoreError::NotFound(format!("user {}", user_id)));
            }
            let cluster = state
                .clusters
                .get_mut(cluster_id)
                .ok_or_else(|| StoreError::NotFound(format!("cluster {}", cluster_id)))?;
            if cluster.assigned_users.insert(*user_id) {
                cluster.updated_at = chrono::Utc::now();
            }
            Ok(cluster.clone())
        })
        .await
    }

    async fn unassign_user(
        &self,
        cluster_id: &ClusterId,
        user_id: &UserId,
    ) -> StoreResult<ClusterConnection> {
        self.commit(|state| {
            let cluster = state
                .clusters
                .get_mut(cluster_id)
                .ok_or_else(|| StoreError::NotFound(format!("cluster {}", cluster_id)))?;
            if !cluster.assigned_users.remove(user_id) {
                return Err(StoreError::NotFound(format!(
                    "user {} is not assigned to cluster {}",
                    user_id, cluster_id
                )));
            }
            cluster.updated_at = chrono::Utc::now();
            Ok(cluster.clone())
        })
        .await
    }

    async fn append_audit(&self, record: AuditRecord, max_records: usize) -> StoreResult<()> {
        self.commit(|state| {
            state.audit.push_back(record);
            while state.audit.len() > max_records {
                state.audit.pop_front();
            }
            Ok(())
        })
        .await
    }

    async fn audit_records(&self) -> StoreResult<Vec<AuditRecord>> {
        Ok(self.state.read().await.audit.iter().rev().cloned().collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        if let Some(path) = &self.snapshot_path {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            if !dir.is_dir() {
                return Err(StoreError::Persistence(format!(
                    "snapshot directory {} does not exist",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    fn is_durable(&self) -> bool {
        self.snapshot_path.is_some()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
