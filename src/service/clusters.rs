//! Cluster connection management and user assignments.

use std::collections::HashMap;
use std::sync::Arc;

use crate::access::{check_cluster_access, require_admin, visible_clusters};
use crate::auth::Principal;
use crate::config::PaginationConfig;
use crate::error::{AccessError, ApiError};
use crate::model::{
    ClusterConnection, ClusterId, ClusterPatch, ClusterView, NewCluster, UserId, UserView,
};
use crate::pagination::{paginate, Page, PageRequest};
use crate::rabbitmq::{ConnectionTest, ProxyService};
use crate::store::{Store, StoreError};

fn cluster_lookup(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound(_) => AccessError::ClusterNotFound.into(),
        other => other.into(),
    }
}

pub struct ClusterService {
    store: Arc<dyn Store>,
    proxy: Arc<ProxyService>,
    pagination: PaginationConfig,
}

impl ClusterService {
    pub fn new(
        store: Arc<dyn Store>,
        proxy: Arc<ProxyService>,
        pagination: PaginationConfig,
    ) -> Self {
        Self {
            store,
            proxy,
            pagination,
        }
    }

    /// Clusters visible to the caller, paginated and filterable by name
    pub async fn list(
        &self,
        principal: &Principal,
        query: &HashMap<String, String>,
    ) -> Result<Page<ClusterView>, ApiError> {
        let request = PageRequest::from_query(query, &self.pagination)?;
        let clusters = visible_clusters(principal, self.store.list_clusters().await?);
        Ok(paginate(clusters, &request, |c| Some(c.name.as_str()))?.map(|c| c.view()))
    }

    async fn load(&self, id: &ClusterId) -> Result<ClusterConnection, ApiError> {
        self.store.get_cluster(id).await.map_err(cluster_lookup)
    }

    pub async fn get(
        &self,
        principal: &Principal,
        id: &ClusterId,
    ) -> Result<ClusterView, ApiError> {
        let cluster = self.load(id).await?;
        check_cluster_access(principal, &cluster)?;
        Ok(cluster.view())
    }

    pub async fn create(
        &self,
        principal: &Principal,
        request: NewCluster,
    ) -> Result<ClusterView, ApiError> {
        require_admin(principal)?;
        request.validate().map_err(ApiError::Validation)?;
        let cluster = self.store.create_cluster(request.into_cluster()).await?;
        tracing::info!(
            username = %principal.username,
            cluster_id = %cluster.id,
            cluster = %cluster.name,
            "Cluster connection created"
        );
        Ok(cluster.view())
    }

    /// Any subset of fields; the pooled client is dropped so the next call
    /// uses the new URL and credentials
    pub async fn update(
        &self,
        principal: &Principal,
        id: &ClusterId,
        patch: ClusterPatch,
    ) -> Result<ClusterView, ApiError> {
        require_admin(principal)?;
        patch.validate().map_err(ApiError::Validation)?;
        let cluster = self.store.update_cluster(id, patch).await.map_err(cluster_lookup)?;
        self.proxy.pool().invalidate(id);
        Ok(cluster.view())
    }

    pub async fn delete(&self, principal: &Principal, id: &ClusterId) -> Result<(), ApiError> {
        require_admin(principal)?;
        self.store.delete_cluster(id).await.map_err(cluster_lookup)?;
        self.proxy.pool().evict(id);
        Ok(())
    }

    pub async fn assign_user(
        &self,
        principal: &Principal,
        id: &ClusterId,
        user_id: &UserId,
    ) -> Result<ClusterView, ApiError> {
        require_admin(principal)?;
        // Distinguish a missing cluster from a missing user
        self.load(id).await?;
        Ok(self.store.assign_user(id, user_id).await?.view())
    }

    pub async fn unassign_user(
        &self,
        principal: &Principal,
        id: &ClusterId,
        user_id: &UserId,
    ) -> Result<ClusterView, ApiError> {
        require_admin(principal)?;
        self.load(id).await?;
        Ok(self.store.unassign_user(id, user_id).await?.view())
    }

    pub async fn assigned_users(
        &self,
        principal: &Principal,
        id: &ClusterId,
    ) -> Result<Vec<UserView>, ApiError> {
        require_admin(principal)?;
        let cluster = self.load(id).await?;
        Ok(self
            .store
            .list_users()
            .await?
            .iter()
            .filter(|u| cluster.is_assigned(&u.id))
            .map(|u| u.view())
            .collect())
    }

    pub async fn test_connection(
        &self,
        principal: &Principal,
        id: &ClusterId,
    ) -> Result<ConnectionTest, ApiError> {
        self.proxy.test_connection(principal, id).await
    }
}
