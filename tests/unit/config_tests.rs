// Configuration loading tests

use std::io::Write;
use tempfile::NamedTempFile;
use warren::config::Config;

const FULL: &str = r#"
server:
  address: "0.0.0.0"
  port: 15680
  threads: 2
  max_concurrent_requests: 64
  rate_limit:
    enabled: true
    global:
      requests_per_second: 500
    per_ip:
      requests_per_second: 20
  security_limits:
    max_body_size: 1048576
    max_header_size: 16384
    max_uri_length: 2048
upstream:
  request_timeout_ms: 5000
  connect_timeout_ms: 1000
  accept_invalid_certs: true
pagination:
  default_page_size: 25
  max_page_size: 200
jwt:
  enabled: true
  secret: "${WARREN_TEST_JWT_SECRET}"
  algorithm: HS384
  username_claim: preferred_username
  issuer: https://sso.example.com
bootstrap_admin:
  username: admin
  password: "long-enough-password"
storage:
  snapshot_path: /var/lib/warren/state.json
audit:
  enabled: true
  max_records: 500
clusters:
  - name: prod
    api_url: https://rabbit.prod.example.com:15671
    username: monitoring
    secret: "${WARREN_TEST_CLUSTER_SECRET}"
    description: Production brokers
    assigned_users: [alice, bob]
  - name: staging
    api_url: http://rabbit.staging:15672
    username: guest
    secret: guest
    active: false
"#;

fn load_full() -> Config {
    std::env::set_var("WARREN_TEST_JWT_SECRET", "jwt-secret-value");
    std::env::set_var("WARREN_TEST_CLUSTER_SECRET", "cluster-secret-value");
    Config::from_yaml_with_env(FULL).unwrap()
}

#[test]
fn test_full_config_round_trips_every_section() {
    let config = load_full();
    config.validate().unwrap();

    assert_eq!(config.server.listen_addr(), "0.0.0.0:15680");
    assert_eq!(config.server.threads, 2);
    let rate_limit = config.server.rate_limit.as_ref().unwrap();
    assert!(rate_limit.enabled);
    assert_eq!(rate_limit.per_ip.as_ref().unwrap().requests_per_second, 20);
    assert_eq!(config.server.security_limits.max_uri_length, 2048);

    assert_eq!(config.upstream.request_timeout().as_millis(), 5000);
    assert!(config.upstream.accept_invalid_certs);
    assert_eq!(config.pagination.default_page_size, 25);

    let jwt = config.jwt.as_ref().unwrap();
    assert_eq!(jwt.secret, "jwt-secret-value");
    assert_eq!(jwt.algorithm, "HS384");
    assert_eq!(jwt.issuer.as_deref(), Some("https://sso.example.com"));

    assert_eq!(config.audit.max_records, 500);
    assert_eq!(config.clusters.len(), 2);
    assert_eq!(config.clusters[0].secret, "cluster-secret-value");
    assert_eq!(config.clusters[0].assigned_users, vec!["alice", "bob"]);
    assert!(config.clusters[0].active);
    assert!(!config.clusters[1].active);
}

#[test]
fn test_config_loads_from_file() {
    std::env::set_var("WARREN_TEST_JWT_SECRET", "jwt-secret-value");
    std::env::set_var("WARREN_TEST_CLUSTER_SECRET", "cluster-secret-value");
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(FULL.as_bytes()).unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.server.port, 15680);
    assert_eq!(
        config.storage.snapshot_path.as_deref(),
        Some(std::path::Path::new("/var/lib/warren/state.json"))
    );
}

#[test]
fn test_invalid_yaml_is_an_error() {
    let err = Config::from_yaml_with_env("server: [not, a, map").unwrap_err();
    assert!(!err.is_empty());
}

#[test]
fn test_validation_rejects_zero_upstream_timeout() {
    let mut config = load_full();
    config.upstream.connect_timeout_ms = 0;
    assert!(config.validate().unwrap_err().contains("timeouts"));
}

#[test]
fn test_validation_rejects_default_page_size_above_max() {
    let mut config = load_full();
    config.pagination.default_page_size = 300;
    assert!(config.validate().unwrap_err().contains("max_page_size"));
}

#[test]
fn test_validation_rejects_empty_cluster_secret() {
    let mut config = load_full();
    config.clusters[1].secret.clear();
    assert!(config.validate().unwrap_err().contains("staging"));
}

#[test]
fn test_validation_rejects_case_insensitive_duplicate_names() {
    let mut config = load_full();
    config.clusters[1].name = "PROD".to_string();
    assert!(config.validate().unwrap_err().contains("Duplicate"));
}
