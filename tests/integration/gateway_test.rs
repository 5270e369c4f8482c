// Gateway integration tests
// Requests go through the Pingora pipeline to a mock Management API.

use serde_json::{json, Value};
use std::time::Duration;

use warren::audit::AuditOperation;
use warren::constants::{AUTH_FAILURES_PER_MINUTE, AUTH_LOCKOUT_SECS, RETRY_AFTER_SECS};
use warren::model::NewCluster;
use warren::store::Store;

use super::test_harness::{
    expected_basic_auth, free_port, GatewayHarness, MockManagementApi, ALICE_PASSWORD,
    BOB_PASSWORD, ROOT_PASSWORD,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_passthrough_replaces_caller_credentials() {
    let api = MockManagementApi::start().await;
    api.stub("GET", "/overview", 200, json!({"cluster_name": "rabbit@mock"}));
    let gw = GatewayHarness::start(&api).await;

    let response = gw
        .client
        .get(gw.passthrough_url("overview"))
        .basic_auth("alice", Some(ALICE_PASSWORD))
        .header("X-Request-ID", "trace-4711")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("trace-4711")
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["cluster_name"], "rabbit@mock");

    let requests = api.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/api/overview");
    assert_eq!(
        requests[0].authorization.as_deref(),
        Some(expected_basic_auth().as_str())
    );
    assert_eq!(requests[0].request_id.as_deref(), Some("trace-4711"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_passthrough_keeps_encoded_path_and_query() {
    let api = MockManagementApi::start().await;
    api.stub("GET", "/queues/%2F/orders", 200, json!({"name": "orders"}));
    let gw = GatewayHarness::start(&api).await;

    let response = gw
        .client
        .get(gw.passthrough_url("queues/%2F/orders?columns=name"))
        .basic_auth("root", Some(ROOT_PASSWORD))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let requests = api.requests();
    assert_eq!(requests[0].path, "/api/queues/%2F/orders");
    assert_eq!(requests[0].query.as_deref(), Some("columns=name"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unassigned_user_is_refused_before_upstream() {
    let api = MockManagementApi::start().await;
    api.stub("GET", "/overview", 200, json!({}));
    let gw = GatewayHarness::start(&api).await;

    let response = gw
        .client
        .get(gw.passthrough_url("overview"))
        .basic_auth("bob", Some(BOB_PASSWORD))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");
    assert_eq!(body["status"], 403);
    assert_eq!(api.request_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_credentials_get_basic_challenge() {
    let api = MockManagementApi::start().await;
    let gw = GatewayHarness::start(&api).await;

    let response = gw.client.get(gw.url("/api/clusters")).send().await.unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(
        response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok()),
        Some("Basic realm=\"warren\"")
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_local_routes_answer_without_upstream() {
    let api = MockManagementApi::start().await;
    let gw = GatewayHarness::start(&api).await;

    let response = gw
        .client
        .get(gw.url("/api/clusters"))
        .basic_auth("alice", Some(ALICE_PASSWORD))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let names: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert_eq!(names, vec!["mock"]);
    assert_eq!(api.request_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_logins_lock_out_despite_forwarded_for() {
    let api = MockManagementApi::start().await;
    let gw = GatewayHarness::start(&api).await;

    // No trusted proxies: rotating X-Forwarded-For must not reset the budget
    let mut statuses = Vec::new();
    for attempt in 0..=AUTH_FAILURES_PER_MINUTE {
        let response = gw
            .client
            .get(gw.url("/api/clusters"))
            .basic_auth("mallory", Some("guess"))
            .header("X-Forwarded-For", format!("198.51.100.{}", attempt))
            .send()
            .await
            .unwrap();
        statuses.push(response.status().as_u16());
        if response.status() == 429 {
            assert_eq!(
                response.headers().get("retry-after").and_then(|v| v.to_str().ok()),
                Some(AUTH_LOCKOUT_SECS.to_string().as_str())
            );
        }
    }
    assert!(statuses[..AUTH_FAILURES_PER_MINUTE as usize]
        .iter()
        .all(|s| *s == 401));
    assert_eq!(statuses.last(), Some(&429));

    // Valid credentials from the locked-out address are refused too
    let response = gw
        .client
        .get(gw.url("/api/clusters"))
        .basic_auth("alice", Some(ALICE_PASSWORD))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrency_limit_rejects_with_503() {
    let api = MockManagementApi::start().await;
    api.stub_delayed("GET", "/nodes", 200, json!([]), Duration::from_millis(1500));
    let gw = GatewayHarness::start_with(&api, |config| {
        config.server.max_concurrent_requests = 1;
    })
    .await;

    let slow = {
        let client = gw.client.clone();
        let url = gw.passthrough_url("nodes");
        tokio::spawn(async move {
            client
                .get(url)
                .basic_auth("root", Some(ROOT_PASSWORD))
                .send()
                .await
                .unwrap()
                .status()
        })
    };
    // Wait for the slow call to hold the only permit
    for _ in 0..50 {
        if api.request_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let response = gw.client.get(gw.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(
        response.headers().get("retry-after").and_then(|v| v.to_str().ok()),
        Some(RETRY_AFTER_SECS.to_string().as_str())
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "overloaded");

    assert_eq!(slow.await.unwrap(), 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_passthrough_write_is_audited() {
    let api = MockManagementApi::start().await;
    api.stub("PUT", "/queues/%2F/jobs", 201, Value::Null);
    let gw = GatewayHarness::start(&api).await;

    let response = gw
        .client
        .put(gw.passthrough_url("queues/%2F/jobs"))
        .basic_auth("alice", Some(ALICE_PASSWORD))
        .header("X-Request-ID", "audit-1")
        .json(&json!({"durable": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(api.requests()[0].body, r#"{"durable":true}"#);

    // The record is written in the logging phase, after the response
    let mut records = Vec::new();
    for _ in 0..50 {
        records = gw.store.audit_records().await.unwrap();
        if !records.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let record = records
        .iter()
        .find(|r| r.operation == AuditOperation::PassthroughWrite)
        .expect("passthrough write should be audited");
    assert_eq!(record.username, "alice");
    assert_eq!(record.request_id, "audit-1");
    assert_eq!(record.cluster_id, Some(gw.cluster.id));
    assert_eq!(record.resource.as_deref(), Some("PUT /api/queues/%2F/jobs"));
    assert!(record.error.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_cluster_gets_typed_error_body() {
    let api = MockManagementApi::start().await;
    let gw = GatewayHarness::start(&api).await;
    let dead = gw
        .store
        .create_cluster(
            NewCluster {
                name: "dead".to_string(),
                description: None,
                api_url: format!("http://127.0.0.1:{}", free_port()),
                username: "guest".to_string(),
                secret: "guest".to_string(),
                active: true,
            }
            .into_cluster(),
        )
        .await
        .unwrap();

    let response = gw
        .client
        .get(gw.url(&format!("/api/clusters/{}/proxy/overview", dead.id)))
        .basic_auth("root", Some(ROOT_PASSWORD))
        .header("X-Request-ID", "dead-1")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "upstream_connect_failed");
    assert_eq!(body["status"], 502);
    assert_eq!(body["request_id"], "dead-1");
}
