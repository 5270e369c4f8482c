// Route table tests

use http::Method;
use warren::model::{ClusterId, UserId};
use warren::router::{resolve, Route};

#[test]
fn test_every_endpoint_resolves_to_its_named_route() {
    let c = ClusterId::new();
    let u = UserId::new();
    let table = [
        (Method::GET, "/health".to_string(), "health"),
        (Method::GET, "/ready".to_string(), "ready"),
        (Method::GET, "/metrics".to_string(), "metrics"),
        (Method::GET, "/api/me".to_string(), "me"),
        (Method::PUT, "/api/me/password".to_string(), "change_own_password"),
        (Method::GET, "/api/users".to_string(), "list_users"),
        (Method::POST, "/api/users".to_string(), "create_user"),
        (Method::GET, format!("/api/users/{}", u), "get_user"),
        (Method::PUT, format!("/api/users/{}", u), "update_user"),
        (Method::DELETE, format!("/api/users/{}", u), "delete_user"),
        (Method::GET, "/api/clusters".to_string(), "list_clusters"),
        (Method::POST, "/api/clusters".to_string(), "create_cluster"),
        (Method::GET, format!("/api/clusters/{}", c), "get_cluster"),
        (Method::PUT, format!("/api/clusters/{}", c), "update_cluster"),
        (Method::DELETE, format!("/api/clusters/{}", c), "delete_cluster"),
        (Method::POST, format!("/api/clusters/{}/test", c), "test_cluster"),
        (Method::GET, format!("/api/clusters/{}/users", c), "cluster_users"),
        (Method::PUT, format!("/api/clusters/{}/users/{}", c, u), "assign_user"),
        (Method::DELETE, format!("/api/clusters/{}/users/{}", c, u), "unassign_user"),
        (Method::GET, format!("/api/clusters/{}/overview", c), "overview"),
        (Method::GET, format!("/api/clusters/{}/metrics", c), "cluster_metrics"),
        (Method::GET, format!("/api/clusters/{}/consumers", c), "list_resources"),
        (Method::GET, format!("/api/clusters/{}/queues/%2F/q", c), "get_queue"),
        (Method::PUT, format!("/api/clusters/{}/queues/%2F/q", c), "create_queue"),
        (Method::DELETE, format!("/api/clusters/{}/queues/%2F/q", c), "delete_queue"),
        (Method::DELETE, format!("/api/clusters/{}/queues/%2F/q/contents", c), "purge_queue"),
        (Method::POST, format!("/api/clusters/{}/queues/%2F/q/get", c), "get_messages"),
        (Method::GET, format!("/api/clusters/{}/exchanges/%2F/x", c), "get_exchange"),
        (Method::PUT, format!("/api/clusters/{}/exchanges/%2F/x", c), "create_exchange"),
        (Method::DELETE, format!("/api/clusters/{}/exchanges/%2F/x", c), "delete_exchange"),
        (Method::POST, format!("/api/clusters/{}/exchanges/%2F/x/publish", c), "publish"),
        (Method::POST, format!("/api/clusters/{}/bindings/%2F/e/x/q/q", c), "create_binding"),
        (Method::DELETE, format!("/api/clusters/{}/connections/conn", c), "close_connection"),
        (Method::GET, format!("/api/clusters/{}/proxy/definitions", c), "passthrough"),
        (Method::GET, "/api/audit".to_string(), "audit"),
    ];

    for (method, path, name) in table {
        let route = resolve(&method, &path)
            .unwrap_or_else(|e| panic!("{} {} failed: {}", method, path, e));
        assert_eq!(route.name(), name, "{} {}", method, path);
        if path.starts_with("/api/clusters/") {
            assert_eq!(route.cluster_id(), Some(c), "{} {}", method, path);
        }
    }
}

#[test]
fn test_passthrough_accepts_any_method() {
    let c = ClusterId::new();
    for method in [Method::GET, Method::PUT, Method::POST, Method::DELETE, Method::PATCH] {
        let path = format!("/api/clusters/{}/proxy/parameters/shovel", c);
        let route = resolve(&method, &path).unwrap();
        assert!(matches!(route, Route::Passthrough { .. }));
    }
}

#[test]
fn test_unparseable_cluster_id_is_not_found() {
    let err = resolve(&Method::GET, "/api/clusters/prod/overview").unwrap_err();
    assert_eq!(err.status(), 404);
    let err = resolve(&Method::GET, "/api/clusters/prod/proxy/overview").unwrap_err();
    assert_eq!(err.status(), 404);
}

#[test]
fn test_trailing_slash_is_ignored() {
    assert_eq!(resolve(&Method::GET, "/api/users/").unwrap(), Route::ListUsers);
    assert_eq!(resolve(&Method::GET, "/api/audit/").unwrap(), Route::Audit);
}
