// Gateway module - Pingora ProxyHttp implementation
//
// Local API routes are answered inside `request_filter`; only the raw
// Management API passthrough reaches `upstream_peer` and is proxied.

use async_trait::async_trait;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::{Error, ErrorType, Result};
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{FailToProxy, ProxyHttp, Session};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

pub mod context;
pub mod endpoints;
pub mod handlers;
pub mod helpers;
pub mod passthrough;

pub use context::RequestContext;
pub use handlers::{Handlers, LocalRequest, Reply};
pub use passthrough::PassthroughTarget;

use crate::audit::{AuditOperation, AuditRecord, AuditService};
use crate::auth::{Authenticator, Principal, AUTH_REALM};
use crate::config::{Config, UpstreamConfig};
use crate::constants::{AUTH_LOCKOUT_SECS, RETRY_AFTER_SECS};
use crate::error::{AccessError, ApiError, ErrorBody};
use crate::metrics::Metrics;
use crate::model::ClusterId;
use crate::rabbitmq::{ClientPool, ProxyService, ResourceService};
use crate::rate_limit::RateLimitManager;
use crate::router::{self, Route};
use crate::security::{self, SecurityError, SecurityLimits};
use crate::service::{ClusterService, UserService};
use crate::store::Store;
use endpoints::{handle_health, handle_metrics, handle_ready, EndpointResponse};
use helpers::{
    content_length, extract_headers, extract_query_params, get_client_ip, header_size, parse_ip,
    read_body, write_json, write_response, BodyError,
};
use passthrough::classify_error;

/// The gateway: authenticates callers, serves the local API and forwards
/// passthrough calls to the Management API of the addressed cluster
pub struct Gateway {
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
    authenticator: Authenticator,
    handlers: Handlers,
    proxy: Arc<ProxyService>,
    audit: Arc<AuditService>,
    rate_limiter: RateLimitManager,
    cleanup_started: AtomicBool,
    request_semaphore: Arc<Semaphore>,
    security_limits: SecurityLimits,
    trusted_proxies: Vec<IpAddr>,
    upstream: UpstreamConfig,
    start_time: Instant,
}

impl Gateway {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
    ) -> std::result::Result<Self, prometheus::Error> {
        let metrics = Arc::new(Metrics::new()?);
        let pool = Arc::new(ClientPool::new(config.upstream.clone(), metrics.clone()));
        let proxy = Arc::new(ProxyService::new(store.clone(), pool, metrics.clone()));
        let audit = Arc::new(AuditService::new(
            store.clone(),
            config.audit.clone(),
            metrics.clone(),
        ));

        let handlers = Handlers::new(
            UserService::new(store.clone(), config.pagination.clone()),
            ClusterService::new(store.clone(), proxy.clone(), config.pagination.clone()),
            ResourceService::new(proxy.clone(), config.pagination.clone()),
            audit.clone(),
            config.pagination.clone(),
        );

        Ok(Self {
            authenticator: Authenticator::new(store.clone(), config.jwt.clone()),
            store,
            metrics,
            handlers,
            proxy,
            audit,
            rate_limiter: RateLimitManager::from_config(config.server.rate_limit.as_ref()),
            cleanup_started: AtomicBool::new(false),
            request_semaphore: Arc::new(Semaphore::new(config.server.max_concurrent_requests)),
            security_limits: SecurityLimits::from(&config.server.security_limits),
            trusted_proxies: config.server.trusted_proxies.clone(),
            upstream: config.upstream.clone(),
            start_time: Instant::now(),
        })
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    async fn write_error_body(
        &self,
        session: &mut Session,
        body: &ErrorBody,
        extra_headers: &[(&str, String)],
    ) -> Result<()> {
        let json = serde_json::json!({
            "error": body.error,
            "message": body.message,
            "status": body.status,
            "request_id": body.request_id,
        });
        write_json(session, body.status, &json, &body.request_id, extra_headers).await
    }

    async fn write_api_error(
        &self,
        session: &mut Session,
        ctx: &RequestContext,
        error: &ApiError,
    ) -> Result<()> {
        let mut extra = Vec::new();
        match error {
            ApiError::Access(AccessError::Unauthenticated) => {
                extra.push(("WWW-Authenticate", format!("Basic realm=\"{}\"", AUTH_REALM)));
            }
            ApiError::RateLimited => extra.push(("Retry-After", "1".to_string())),
            _ => {}
        }
        if error.status() >= 500 {
            tracing::error!(
                request_id = %ctx.request_id(),
                error = %error,
                "Request failed"
            );
        }
        self.write_error_body(session, &error.to_body(ctx.request_id()), &extra)
            .await
    }

    async fn write_security_error(
        &self,
        session: &mut Session,
        ctx: &RequestContext,
        error: &SecurityError,
    ) -> Result<()> {
        tracing::warn!(
            request_id = %ctx.request_id(),
            client_ip = %ctx.client_ip,
            path = %ctx.path,
            error = %error,
            "Request rejected by security guard"
        );
        let body = ErrorBody {
            error: error.kind().to_string(),
            message: error.to_string(),
            status: error.status(),
            request_id: ctx.request_id().to_string(),
        };
        self.write_error_body(session, &body, &[]).await
    }

    async fn write_endpoint(
        &self,
        session: &mut Session,
        ctx: &RequestContext,
        response: EndpointResponse,
    ) -> Result<()> {
        write_response(
            session,
            response.status,
            response.content_type,
            response.body.into(),
            ctx.request_id(),
            &[],
        )
        .await
    }

    async fn write_reply(
        &self,
        session: &mut Session,
        ctx: &RequestContext,
        reply: Reply,
    ) -> Result<()> {
        match reply.body {
            Some(body) => write_json(session, reply.status, &body, ctx.request_id(), &[]).await,
            None => {
                write_response(
                    session,
                    reply.status,
                    "application/json",
                    Default::default(),
                    ctx.request_id(),
                    &[],
                )
                .await
            }
        }
    }

    async fn serve_public(&self, route: &Route) -> EndpointResponse {
        match route {
            Route::Ready => handle_ready(self.store.as_ref()).await,
            Route::Metrics => {
                self.metrics.set_pooled_clients(self.proxy.pool().len());
                handle_metrics(&self.metrics)
            }
            _ => handle_health(self.start_time),
        }
    }

    /// Authenticate, honouring the per-IP failure budget. A locked-out or
    /// newly exhausted client gets `RateLimited`.
    async fn authenticate(
        &self,
        session: &Session,
        ctx: &RequestContext,
    ) -> std::result::Result<Principal, ApiError> {
        let client_ip = parse_ip(&ctx.client_ip);
        if client_ip.is_some_and(|ip| self.rate_limiter.is_auth_blocked(ip)) {
            self.metrics.record_rate_limited();
            return Err(ApiError::RateLimited);
        }

        let headers = extract_headers(session.req_header());
        match self.authenticator.authenticate(&headers).await {
            Ok(principal) => Ok(principal),
            Err(failure) => {
                self.metrics.record_auth_failure(failure.as_str());
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    client_ip = %ctx.client_ip,
                    path = %ctx.path,
                    reason = failure.as_str(),
                    "Authentication failed"
                );
                if let Some(ip) = client_ip {
                    if !self.rate_limiter.record_auth_failure(ip) {
                        self.metrics.record_rate_limited();
                        return Err(ApiError::RateLimited);
                    }
                }
                Err(AccessError::Unauthenticated.into())
            }
        }
    }

    async fn prepare_passthrough(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        tail: &str,
        query: Option<&str>,
    ) -> std::result::Result<PassthroughTarget, ApiError> {
        let cluster = self.proxy.resolve(principal, cluster_id).await?;
        PassthroughTarget::from_cluster(&cluster, tail, query)
    }

    fn ensure_cleanup_task(&self) {
        if !self.cleanup_started.swap(true, Ordering::Relaxed) {
            self.rate_limiter.start_cleanup_task(None);
        }
    }
}

#[async_trait]
impl ProxyHttp for Gateway {
    type CTX = RequestContext;

    fn new_ctx(&self) -> Self::CTX {
        RequestContext::new()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        {
            let req = session.req_header();
            if let Some(id) = req.headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
                ctx.adopt_request_id(id);
            }
            ctx.method = req.method.to_string();
            ctx.path = req.uri.path().to_string();
            ctx.query = extract_query_params(req);
        }
        ctx.client_ip = get_client_ip(session, &self.trusted_proxies);
        self.ensure_cleanup_task();

        // Concurrency limit first; the permit lives in the context until the request ends
        match self.request_semaphore.clone().try_acquire_owned() {
            Ok(permit) => ctx.permit = Some(permit),
            Err(_) => {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    "Rejecting request due to max concurrent requests reached"
                );
                let body = ErrorBody {
                    error: "overloaded".to_string(),
                    message: format!(
                        "gateway is at its concurrent request limit, retry after {} seconds",
                        RETRY_AFTER_SECS
                    ),
                    status: 503,
                    request_id: ctx.request_id().to_string(),
                };
                let retry_after = [("Retry-After", RETRY_AFTER_SECS.to_string())];
                self.write_error_body(session, &body, &retry_after).await?;
                return Ok(true);
            }
        }
        self.metrics.request_started();
        ctx.counted_active = true;

        let guard = {
            let req = session.req_header();
            security::validate_request(
                &req.uri.to_string(),
                &ctx.path,
                header_size(req),
                content_length(req),
                &self.security_limits,
            )
        };
        if let Err(e) = guard {
            self.write_security_error(session, ctx, &e).await?;
            return Ok(true);
        }

        if let Err(e) = self.rate_limiter.check_request(parse_ip(&ctx.client_ip)) {
            self.metrics.record_rate_limited();
            tracing::warn!(
                request_id = %ctx.request_id(),
                client_ip = %ctx.client_ip,
                error = %e,
                "Rate limit exceeded"
            );
            self.write_api_error(session, ctx, &ApiError::RateLimited).await?;
            return Ok(true);
        }

        let route = match router::resolve(&session.req_header().method, &ctx.path) {
            Ok(route) => route,
            Err(e) => {
                self.write_api_error(session, ctx, &e).await?;
                return Ok(true);
            }
        };
        ctx.route = Some(route.name());
        ctx.cluster_id = route.cluster_id();

        if route.is_public() {
            let response = self.serve_public(&route).await;
            self.write_endpoint(session, ctx, response).await?;
            return Ok(true);
        }

        let principal = match self.authenticate(session, ctx).await {
            Ok(principal) => principal,
            Err(ApiError::RateLimited) => {
                let body = ApiError::RateLimited.to_body(ctx.request_id());
                let retry_after = [("Retry-After", AUTH_LOCKOUT_SECS.to_string())];
                self.write_error_body(session, &body, &retry_after).await?;
                return Ok(true);
            }
            Err(e) => {
                self.write_api_error(session, ctx, &e).await?;
                return Ok(true);
            }
        };
        ctx.principal = Some(principal.clone());

        if let Route::Passthrough { cluster_id, path } = &route {
            let query = session.req_header().uri.query().map(str::to_string);
            match self
                .prepare_passthrough(&principal, cluster_id, path, query.as_deref())
                .await
            {
                Ok(target) => {
                    ctx.passthrough = Some(target);
                    return Ok(false);
                }
                Err(e) => {
                    self.write_api_error(session, ctx, &e).await?;
                    return Ok(true);
                }
            }
        }

        let body = match read_body(session, self.security_limits.max_body_size).await {
            Ok(body) => body,
            Err(BodyError::TooLarge(e)) => {
                self.write_security_error(session, ctx, &e).await?;
                return Ok(true);
            }
            Err(BodyError::Read(message)) => {
                self.write_api_error(session, ctx, &ApiError::bad_request(message))
                    .await?;
                return Ok(true);
            }
        };

        let local = LocalRequest {
            query: ctx.query.clone(),
            body,
            request_id: ctx.request_id().to_string(),
            client_ip: ctx.client_ip.clone(),
        };
        match self.handlers.dispatch(&route, &principal, &local).await {
            Ok(reply) => self.write_reply(session, ctx, reply).await?,
            Err(e) => self.write_api_error(session, ctx, &e).await?,
        }
        Ok(true)
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        ctx.upstream_started = Some(Instant::now());
        let target = ctx.passthrough.as_ref().ok_or_else(|| {
            Error::explain(ErrorType::InternalError, "no passthrough target in request context")
        })?;

        match target.peer(&self.upstream).await {
            Ok(peer) => {
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    cluster_id = %target.cluster_id,
                    host = %target.host,
                    port = target.port,
                    "Forwarding passthrough request"
                );
                Ok(Box::new(peer))
            }
            Err(e) => {
                let message = e.to_string();
                ctx.upstream_error = Some(e);
                Err(Error::explain(ErrorType::ConnectError, message))
            }
        }
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let target = ctx.passthrough.as_ref().ok_or_else(|| {
            Error::explain(ErrorType::InternalError, "no passthrough target in request context")
        })?;

        let uri = target.upstream_uri.parse::<http::Uri>().map_err(|e| {
            Error::explain(
                ErrorType::InternalError,
                format!("invalid upstream URI {}: {}", target.upstream_uri, e),
            )
        })?;
        upstream_request.set_uri(uri);
        upstream_request.insert_header("Host", target.host_header())?;
        // The caller's credentials are for the gateway, never for the cluster
        upstream_request.insert_header("Authorization", target.authorization.as_str())?;
        upstream_request.insert_header("X-Request-ID", ctx.request_id())?;
        Ok(())
    }

    fn upstream_response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        upstream_response.insert_header("X-Request-ID", ctx.request_id())?;
        Ok(())
    }

    async fn fail_to_proxy(
        &self,
        session: &mut Session,
        e: &Error,
        ctx: &mut Self::CTX,
    ) -> FailToProxy {
        let upstream_error = ctx
            .upstream_error
            .clone()
            .unwrap_or_else(|| classify_error(e));
        let api_error = ApiError::from(upstream_error.clone());
        let error_code = api_error.status();

        let cluster_id = ctx.cluster_id.map(|id| id.to_string());
        tracing::warn!(
            request_id = %ctx.request_id(),
            cluster_id = cluster_id.as_deref(),
            error_type = ?e.etype(),
            error = %e,
            status_code = error_code,
            "Passthrough request failed"
        );
        ctx.upstream_error = Some(upstream_error);

        if session.response_written().is_none() {
            if let Err(write_err) = self
                .write_error_body(session, &api_error.to_body(ctx.request_id()), &[])
                .await
            {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    error = %write_err,
                    "Failed to write error response"
                );
            }
        }

        FailToProxy {
            error_code,
            can_reuse_downstream: false,
        }
    }

    async fn logging(&self, session: &mut Session, _e: Option<&Error>, ctx: &mut Self::CTX) {
        let status_code = session
            .response_written()
            .map(|resp| resp.status.as_u16())
            .unwrap_or(500);
        let duration = ctx.elapsed();

        self.metrics.record_request(&ctx.method, status_code, duration);
        if ctx.counted_active {
            self.metrics.request_finished();
            ctx.counted_active = false;
        }

        if let Some(target) = &ctx.passthrough {
            if let Some(started) = ctx.upstream_started {
                let outcome = match &ctx.upstream_error {
                    Some(e) => e.outcome_label(),
                    None if status_code < 400 => "success",
                    None => "http_error",
                };
                self.metrics
                    .record_upstream(&target.cluster_name, outcome, started.elapsed());
            }

            if ctx.method != "GET" && ctx.method != "HEAD" {
                if let Some(principal) = &ctx.principal {
                    let mut record = AuditRecord::new(
                        AuditOperation::PassthroughWrite,
                        principal.username.as_str(),
                        ctx.request_id(),
                        ctx.client_ip.as_str(),
                    )
                    .with_cluster(target.cluster_id)
                    .with_resource(format!("{} {}", ctx.method, target.upstream_uri));
                    if let Some(e) = &ctx.upstream_error {
                        record = record.with_failure(e.to_string());
                    } else if status_code >= 400 {
                        record = record.with_failure(format!(
                            "management API returned HTTP {}",
                            status_code
                        ));
                    }
                    self.audit.record(record).await;
                }
            }
        }

        let cluster_id = ctx.cluster_id.map(|id| id.to_string());
        tracing::info!(
            request_id = %ctx.request_id(),
            client_ip = %ctx.client_ip,
            method = %ctx.method,
            path = %ctx.path,
            route = ctx.route.unwrap_or("unmatched"),
            status_code = status_code,
            duration_ms = duration.as_secs_f64() * 1000.0,
            cluster_id = cluster_id.as_deref(),
            username = ctx.username(),
            "Request completed"
        );

        ctx.permit = None;
    }
}
