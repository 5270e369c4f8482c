// Error taxonomy mapping to HTTP responses

use warren::error::{AccessError, ApiError, UpstreamError};
use warren::store::StoreError;

#[test]
fn test_status_and_kind_table() {
    let cases: Vec<(ApiError, u16, &str)> = vec![
        (AccessError::Unauthenticated.into(), 401, "unauthenticated"),
        (AccessError::Forbidden.into(), 403, "forbidden"),
        (AccessError::AdminRequired.into(), 403, "admin_required"),
        (AccessError::ClusterNotFound.into(), 404, "cluster_not_found"),
        (AccessError::ClusterInactive.into(), 409, "cluster_inactive"),
        (UpstreamError::Unauthorized.into(), 502, "upstream_unauthorized"),
        (UpstreamError::NotFound.into(), 404, "upstream_not_found"),
        (UpstreamError::Timeout.into(), 504, "upstream_timeout"),
        (
            UpstreamError::ConnectFailed("refused".to_string()).into(),
            502,
            "upstream_connect_failed",
        ),
        (
            UpstreamError::Http { status: 400, body: String::new() }.into(),
            400,
            "upstream_http_error",
        ),
        (
            UpstreamError::Http { status: 503, body: String::new() }.into(),
            502,
            "upstream_http_error",
        ),
        (UpstreamError::Unknown("bad json".to_string()).into(), 502, "upstream_unknown"),
        (StoreError::Conflict("dup".to_string()).into(), 409, "conflict"),
        (ApiError::validation("bad"), 400, "validation"),
        (ApiError::MethodNotAllowed, 405, "method_not_allowed"),
        (ApiError::RateLimited, 429, "rate_limited"),
    ];

    for (error, status, kind) in cases {
        assert_eq!(error.status(), status, "{:?}", error);
        assert_eq!(error.kind(), kind, "{:?}", error);
    }
}

#[test]
fn test_upstream_body_snippet_is_truncated() {
    let body = "x".repeat(2000);
    let error = ApiError::from(UpstreamError::Http { status: 500, body });
    let message = error.message();
    assert!(message.starts_with("management API returned HTTP 500: "));
    assert!(message.ends_with("..."));
    assert!(message.len() < 600);
}

#[test]
fn test_internal_details_are_hidden() {
    let error = ApiError::from(StoreError::Persistence("disk full at /var/lib".to_string()));
    let body = error.to_body("req-1");
    assert_eq!(body.status, 500);
    assert_eq!(body.message, "internal server error");
    assert_eq!(body.request_id, "req-1");
}
