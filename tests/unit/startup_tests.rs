// Start-up seeding, authentication and snapshot persistence

use base64::Engine as _;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

use warren::auth::{AuthFailure, Authenticator};
use warren::config::Config;
use warren::service::bootstrap;
use warren::store::{MemoryStore, Store};

const CONFIG: &str = r#"
server:
  address: "127.0.0.1"
  port: 15680
bootstrap_admin:
  username: admin
  password: "change-me-please"
clusters:
  - name: prod
    api_url: http://rabbit:15672
    username: guest
    secret: guest
    assigned_users: [admin, ghost]
"#;

fn basic(user: &str, pass: &str) -> HashMap<String, String> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
    HashMap::from([("authorization".to_string(), format!("Basic {}", encoded))])
}

#[tokio::test]
async fn test_bootstrap_admin_can_authenticate() {
    let config: Config = serde_yaml::from_str(CONFIG).unwrap();
    let store = Arc::new(MemoryStore::new());

    let report = bootstrap(store.as_ref(), &config).await.unwrap();
    assert!(report.admin_created);
    assert_eq!(report.clusters_created, 1);
    // "ghost" does not exist and is skipped
    assert_eq!(report.assignments_created, 1);

    let auth = Authenticator::new(store.clone(), None);
    let principal = auth
        .authenticate(&basic("admin", "change-me-please"))
        .await
        .unwrap();
    assert!(principal.is_admin());

    assert_eq!(
        auth.authenticate(&basic("admin", "wrong")).await.unwrap_err(),
        AuthFailure::InvalidCredentials
    );
    assert_eq!(
        auth.authenticate(&HashMap::new()).await.unwrap_err(),
        AuthFailure::MissingCredentials
    );
}

#[tokio::test]
async fn test_bootstrap_is_idempotent() {
    let config: Config = serde_yaml::from_str(CONFIG).unwrap();
    let store = MemoryStore::new();

    bootstrap(&store, &config).await.unwrap();
    let again = bootstrap(&store, &config).await.unwrap();

    assert!(!again.admin_created);
    assert_eq!(again.clusters_created, 0);
    assert_eq!(again.assignments_created, 0);
    assert_eq!(store.list_clusters().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let config: Config = serde_yaml::from_str(CONFIG).unwrap();

    {
        let store = MemoryStore::open(&path).await.unwrap();
        bootstrap(&store, &config).await.unwrap();
    }
    assert!(path.exists());

    let reopened = MemoryStore::open(&path).await.unwrap();
    let admin = reopened
        .find_user_by_username("admin")
        .await
        .unwrap()
        .unwrap();
    let cluster = reopened.find_cluster_by_name("prod").await.unwrap().unwrap();
    assert!(cluster.is_assigned(&admin.id));
    assert_eq!(cluster.secret, "guest");

    let report = bootstrap(&reopened, &config).await.unwrap();
    assert!(!report.admin_created);
    assert_eq!(report.clusters_created, 0);
}

#[tokio::test]
async fn test_corrupt_snapshot_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, b"{not json").unwrap();

    assert!(MemoryStore::open(&path).await.is_err());
}
