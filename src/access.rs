//! Cluster access control.
//!
//! Administrators may call every cluster. Other users may call only the
//! clusters they are assigned to. The assignment check always runs before
//! the `active` check, so an unassigned user cannot learn whether a cluster
//! is active.

use crate::auth::Principal;
use crate::error::AccessError;
use crate::model::ClusterConnection;

pub fn require_admin(principal: &Principal) -> Result<(), AccessError> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(AccessError::AdminRequired)
    }
}

pub fn check_cluster_access(
    principal: &Principal,
    cluster: &ClusterConnection,
) -> Result<(), AccessError> {
    if principal.is_admin() || cluster.is_assigned(&principal.user_id) {
        Ok(())
    } else {
        Err(AccessError::Forbidden)
    }
}

/// Access check followed by the `active` check
pub fn check_cluster_callable(
    principal: &Principal,
    cluster: &ClusterConnection,
) -> Result<(), AccessError> {
    check_cluster_access(principal, cluster)?;
    if !cluster.active {
        return Err(AccessError::ClusterInactive);
    }
    Ok(())
}

/// Clusters the principal may see: all for admins, assigned ones otherwise
pub fn visible_clusters(
    principal: &Principal,
    clusters: Vec<ClusterConnection>,
) -> Vec<ClusterConnection> {
    if principal.is_admin() {
        return clusters;
    }
    clusters
        .into_iter()
        .filter(|c| c.is_assigned(&principal.user_id))
        .collect()
}
