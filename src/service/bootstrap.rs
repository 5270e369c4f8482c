//! Start-up seeding of the store from configuration.

use crate::config::{BootstrapAdminConfig, Config, SeedClusterConfig};
use crate::model::{NewCluster, Role, User};
use crate::store::Store;

use super::hash_blocking;

/// What [`bootstrap`] changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub admin_created: bool,
    pub clusters_created: usize,
    pub assignments_created: usize,
}

/// Create the bootstrap administrator when the store holds no users, then
/// register configured clusters the store does not know yet.
pub async fn bootstrap(store: &dyn Store, config: &Config) -> anyhow::Result<BootstrapReport> {
    let mut report = BootstrapReport::default();

    if let Some(admin) = &config.bootstrap_admin {
        report.admin_created = bootstrap_admin(store, admin).await?;
    } else if store.user_count().await? == 0 {
        tracing::warn!("No users exist and no bootstrap_admin is configured; nobody can log in");
    }

    for seed in &config.clusters {
        let (created, assigned) = seed_cluster(store, seed).await?;
        report.clusters_created += usize::from(created);
        report.assignments_created += assigned;
    }

    Ok(report)
}

async fn bootstrap_admin(store: &dyn Store, admin: &BootstrapAdminConfig) -> anyhow::Result<bool> {
    if store.user_count().await? > 0 {
        return Ok(false);
    }
    let hash = hash_blocking(admin.password.clone()).await?;
    let user = store
        .create_user(User::new(admin.username.clone(), Role::Admin, hash))
        .await?;
    tracing::info!(username = %user.username, "Created bootstrap administrator");
    Ok(true)
}

async fn seed_cluster(
    store: &dyn Store,
    seed: &SeedClusterConfig,
) -> anyhow::Result<(bool, usize)> {
    let (cluster, created) = match store.find_cluster_by_name(&seed.name).await? {
        Some(existing) => (existing, false),
        None => {
            let cluster = NewCluster {
                name: seed.name.clone(),
                description: seed.description.clone(),
                api_url: seed.api_url.clone(),
                username: seed.username.clone(),
                secret: seed.secret.clone(),
                active: seed.active,
            }
            .into_cluster();
            let cluster = store.create_cluster(cluster).await?;
            tracing::info!(
                cluster_id = %cluster.id,
                cluster = %cluster.name,
                "Registered configured cluster"
            );
            (cluster, true)
        }
    };

    let mut assigned = 0;
    for username in &seed.assigned_users {
        match store.find_user_by_username(username).await? {
            Some(user) if !cluster.is_assigned(&user.id) => {
                store.assign_user(&cluster.id, &user.id).await?;
                assigned += 1;
            }
            Some(_) => {}
            None => tracing::warn!(
                cluster = %cluster.name,
                username = %username,
                "Configured assignment names an unknown user, skipping"
            ),
        }
    }
    Ok((created, assigned))
}
