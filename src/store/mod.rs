//! Persistence boundary for users, cluster connections, assignments and audit records.

use async_trait::async_trait;
use thiserror::Error;

use crate::audit::AuditRecord;
use crate::model::{ClusterConnection, ClusterId, ClusterPatch, User, UserId, UserPatch};

pub mod memory;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn user_count(&self) -> StoreResult<usize>;
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    async fn get_user(&self, id: &UserId) -> StoreResult<User>;
    /// Case-insensitive lookup
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn create_user(&self, user: User) -> StoreResult<User>;
    async fn update_user(&self, id: &UserId, patch: UserPatch) -> StoreResult<User>;
    /// Removes the user and every cluster assignment referring to it
    async fn delete_user(&self, id: &UserId) -> StoreResult<()>;

    async fn list_clusters(&self) -> StoreResult<Vec<ClusterConnection>>;
    async fn get_cluster(&self, id: &ClusterId) -> StoreResult<ClusterConnection>;
    /// Case-insensitive lookup
    async fn find_cluster_by_name(&self, name: &str) -> StoreResult<Option<ClusterConnection>>;
    async fn create_cluster(&self, cluster: ClusterConnection) -> StoreResult<ClusterConnection>;
    async fn update_cluster(
        &self,
        id: &ClusterId,
        patch: ClusterPatch,
    ) -> StoreResult<ClusterConnection>;
    async fn delete_cluster(&self, id: &ClusterId) -> StoreResult<()>;

    async fn assign_user(
        &self,
        cluster_id: &ClusterId,
        user_id: &UserId,
    ) -> StoreResult<ClusterConnection>;
    async fn unassign_user(
        &self,
        cluster_id: &ClusterId,
        user_id: &UserId,
    ) -> StoreResult<ClusterConnection>;

    /// Append a record, evicting the oldest ones beyond `max_records`
    async fn append_audit(&self, record: AuditRecord, max_records: usize) -> StoreResult<()>;
    /// All retained audit records, newest first
    async fn audit_records(&self) -> StoreResult<Vec<AuditRecord>>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
