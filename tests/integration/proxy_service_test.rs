// Proxy and resource service integration tests

use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use warren::config::UpstreamConfig;
use warren::model::{ClusterPatch, NewCluster};
use warren::rabbitmq::resources::{PublishRequest, ResourceKind};
use warren::store::Store;

use super::test_harness::{expected_basic_auth, fixture, MockManagementApi};

fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_list_queues_filters_and_paginates() {
    let api = MockManagementApi::start().await;
    api.stub(
        "GET",
        "/queues/%2F",
        200,
        json!([
            {"name": "orders.created"},
            {"name": "orders.shipped"},
            {"name": "payments"},
            {"name": "ORDERS.dead"}
        ]),
    );
    let fx = fixture(&api, UpstreamConfig::default()).await;

    let page = fx
        .resources
        .list(
            &fx.admin,
            &fx.cluster.id,
            ResourceKind::Queues,
            &query(&[("vhost", "/"), ("name", "orders"), ("pageSize", "2")]),
        )
        .await
        .unwrap();

    assert_eq!(page.total_items, 3);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.items.len(), 2);
    assert!(page.has_next);
    assert!(!page.has_previous);

    let requests = api.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/api/queues/%2F");
    assert_eq!(requests[0].authorization.as_deref(), Some(expected_basic_auth().as_str()));
    assert_eq!(fx.metrics.upstream_request_count("mock", "success"), 1);
}

#[tokio::test]
async fn test_regex_filter_is_case_sensitive() {
    let api = MockManagementApi::start().await;
    api.stub(
        "GET",
        "/exchanges",
        200,
        json!([{"name": "amq.direct"}, {"name": "AMQ.custom"}, {"name": "events"}]),
    );
    let fx = fixture(&api, UpstreamConfig::default()).await;

    let page = fx
        .resources
        .list(
            &fx.admin,
            &fx.cluster.id,
            ResourceKind::Exchanges,
            &query(&[("name", "^amq\\."), ("useRegex", "true")]),
        )
        .await
        .unwrap();

    assert_eq!(page.total_items, 1);
    assert_eq!(page.items[0]["name"], "amq.direct");
}

#[tokio::test]
async fn test_invalid_page_size_is_rejected_before_upstream_call() {
    let api = MockManagementApi::start().await;
    let fx = fixture(&api, UpstreamConfig::default()).await;

    let err = fx
        .resources
        .list(
            &fx.admin,
            &fx.cluster.id,
            ResourceKind::Queues,
            &query(&[("pageSize", "0")]),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status(), 400);
    assert_eq!(api.request_count(), 0);
}

#[tokio::test]
async fn test_upstream_unauthorized_maps_to_bad_gateway() {
    let api = MockManagementApi::start().await;
    api.stub("GET", "/overview", 401, json!({"error": "not_authorised"}));
    let fx = fixture(&api, UpstreamConfig::default()).await;

    let err = fx
        .resources
        .overview(&fx.admin, &fx.cluster.id)
        .await
        .unwrap_err();

    assert_eq!(err.status(), 502);
    assert_eq!(err.kind(), "upstream_unauthorized");
    assert_eq!(fx.metrics.upstream_request_count("mock", "unauthorized"), 1);
}

#[tokio::test]
async fn test_upstream_not_found_maps_to_not_found() {
    let api = MockManagementApi::start().await;
    let fx = fixture(&api, UpstreamConfig::default()).await;

    let err = fx
        .resources
        .queue(&fx.admin, &fx.cluster.id, "/", "missing")
        .await
        .unwrap_err();

    assert_eq!(err.status(), 404);
    assert_eq!(err.kind(), "upstream_not_found");
    assert_eq!(api.requests()[0].path, "/api/queues/%2F/missing");
}

#[tokio::test]
async fn test_upstream_server_error_carries_body_snippet() {
    let api = MockManagementApi::start().await;
    api.stub("GET", "/nodes", 500, json!({"reason": "node down"}));
    let fx = fixture(&api, UpstreamConfig::default()).await;

    let err = fx
        .resources
        .list(&fx.admin, &fx.cluster.id, ResourceKind::Nodes, &HashMap::new())
        .await
        .unwrap_err();

    assert_eq!(err.status(), 502);
    assert_eq!(err.kind(), "upstream_http_error");
    assert!(err.message().contains("HTTP 500"));
    assert!(err.message().contains("node down"));
    assert_eq!(fx.metrics.upstream_request_count("mock", "http_error"), 1);
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let api = MockManagementApi::start().await;
    api.stub_delayed(
        "GET",
        "/overview",
        200,
        json!({"rabbitmq_version": "3.13.0"}),
        Duration::from_secs(2),
    );
    let upstream = UpstreamConfig {
        request_timeout_ms: 200,
        ..UpstreamConfig::default()
    };
    let fx = fixture(&api, upstream).await;

    let err = fx
        .resources
        .overview(&fx.admin, &fx.cluster.id)
        .await
        .unwrap_err();

    assert_eq!(err.status(), 504);
    assert_eq!(err.kind(), "upstream_timeout");
    assert_eq!(fx.metrics.upstream_request_count("mock", "timeout"), 1);
}

#[tokio::test]
async fn test_unreachable_cluster_is_connect_failure() {
    let api = MockManagementApi::start().await;
    let fx = fixture(&api, UpstreamConfig::default()).await;

    let closed_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let cluster = fx
        .store
        .create_cluster(
            NewCluster {
                name: "gone".to_string(),
                description: None,
                api_url: format!("http://127.0.0.1:{}", closed_port),
                username: "guest".to_string(),
                secret: "guest".to_string(),
                active: true,
            }
            .into_cluster(),
        )
        .await
        .unwrap();

    let err = fx
        .resources
        .overview(&fx.admin, &cluster.id)
        .await
        .unwrap_err();

    assert_eq!(err.status(), 502);
    assert_eq!(err.kind(), "upstream_connect_failed");
    assert_eq!(fx.metrics.upstream_request_count("gone", "connect_failed"), 1);
}

#[tokio::test]
async fn test_publish_reports_routing() {
    let api = MockManagementApi::start().await;
    api.stub(
        "POST",
        "/exchanges/%2F/amq.direct/publish",
        200,
        json!({"routed": true}),
    );
    let fx = fixture(&api, UpstreamConfig::default()).await;

    let request: PublishRequest =
        serde_json::from_value(json!({"routing_key": "jobs", "payload": "hello"})).unwrap();
    let result = fx
        .resources
        .publish(&fx.admin, &fx.cluster.id, "/", "amq.direct", &request)
        .await
        .unwrap();

    assert!(result.routed);
    let sent: serde_json::Value = serde_json::from_str(&api.requests()[0].body).unwrap();
    assert_eq!(sent["routing_key"], "jobs");
    assert_eq!(sent["payload"], "hello");
    assert_eq!(sent["payload_encoding"], "string");
}

#[tokio::test]
async fn test_cluster_metrics_aggregates_overview_and_nodes() {
    let api = MockManagementApi::start().await;
    api.stub(
        "GET",
        "/overview",
        200,
        json!({
            "cluster_name": "rabbit@prod",
            "rabbitmq_version": "3.13.0",
            "message_stats": {"publish_details": {"rate": 12.5}},
            "queue_totals": {"messages": 30, "messages_ready": 20, "messages_unacknowledged": 10},
            "object_totals": {
                "connections": 4,
                "channels": 8,
                "exchanges": 7,
                "queues": 3,
                "consumers": 2
            }
        }),
    );
    api.stub(
        "GET",
        "/nodes",
        200,
        json!([{"name": "rabbit@a", "running": true, "mem_used": 100, "mem_limit": 1000}]),
    );
    let fx = fixture(&api, UpstreamConfig::default()).await;

    let metrics = fx
        .resources
        .cluster_metrics(&fx.admin, &fx.cluster.id)
        .await
        .unwrap();

    assert_eq!(metrics.cluster_name.as_deref(), Some("rabbit@prod"));
    assert_eq!(metrics.message_stats.publish_rate, 12.5);
    assert_eq!(metrics.message_stats.deliver_rate, 0.0);
    assert_eq!(metrics.queue_totals.unacknowledged, 10);
    assert_eq!(metrics.object_totals.channels, 8);
    assert_eq!(metrics.nodes.len(), 1);
    assert!(metrics.nodes[0].running);
    assert_eq!(api.request_count(), 2);
}

#[tokio::test]
async fn test_unassigned_user_never_reaches_upstream() {
    let api = MockManagementApi::start().await;
    api.stub("GET", "/overview", 200, json!({}));
    let fx = fixture(&api, UpstreamConfig::default()).await;

    let err = fx
        .resources
        .overview(&fx.alice, &fx.cluster.id)
        .await
        .unwrap_err();

    assert_eq!(err.status(), 403);
    assert_eq!(api.request_count(), 0);
    assert_eq!(fx.metrics.access_denied_count(), 1);

    fx.store
        .assign_user(&fx.cluster.id, &fx.alice.user_id)
        .await
        .unwrap();
    assert!(fx.resources.overview(&fx.alice, &fx.cluster.id).await.is_ok());
    assert_eq!(api.request_count(), 1);
}

#[tokio::test]
async fn test_inactive_cluster_is_conflict() {
    let api = MockManagementApi::start().await;
    let fx = fixture(&api, UpstreamConfig::default()).await;

    fx.store
        .update_cluster(
            &fx.cluster.id,
            ClusterPatch {
                active: Some(false),
                ..ClusterPatch::default()
            },
        )
        .await
        .unwrap();

    let err = fx
        .resources
        .overview(&fx.admin, &fx.cluster.id)
        .await
        .unwrap_err();

    assert_eq!(err.status(), 409);
    assert_eq!(err.kind(), "cluster_inactive");
    assert_eq!(api.request_count(), 0);
}

#[tokio::test]
async fn test_connection_probe_reports_failure_without_error() {
    let api = MockManagementApi::start().await;
    api.stub("GET", "/overview", 401, json!({"error": "not_authorised"}));
    let fx = fixture(&api, UpstreamConfig::default()).await;

    let probe = fx
        .proxy
        .test_connection(&fx.admin, &fx.cluster.id)
        .await
        .unwrap();
    assert!(!probe.reachable);
    assert!(probe.error.is_some());
    assert!(!fx.pool.contains(&fx.cluster.id));

    let err = fx
        .proxy
        .test_connection(&fx.alice, &fx.cluster.id)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 403);
}
