//! Per-request state carried through the Pingora hooks.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::OwnedSemaphorePermit;
use uuid::Uuid;

use super::passthrough::PassthroughTarget;
use crate::auth::Principal;
use crate::error::UpstreamError;
use crate::model::ClusterId;

pub struct RequestContext {
    request_id: String,
    started: Instant,
    pub method: String,
    pub path: String,
    pub client_ip: String,
    pub query: HashMap<String, String>,
    /// Held until the request completes; releases the concurrency slot on drop
    pub permit: Option<OwnedSemaphorePermit>,
    /// Whether the active-request gauge was incremented for this request
    pub counted_active: bool,
    pub principal: Option<Principal>,
    pub route: Option<&'static str>,
    pub cluster_id: Option<ClusterId>,
    pub passthrough: Option<PassthroughTarget>,
    pub upstream_started: Option<Instant>,
    pub upstream_error: Option<UpstreamError>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            started: Instant::now(),
            method: String::new(),
            path: String::new(),
            client_ip: String::new(),
            query: HashMap::new(),
            permit: None,
            counted_active: false,
            principal: None,
            route: None,
            cluster_id: None,
            passthrough: None,
            upstream_started: None,
            upstream_error: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Adopt a caller-supplied `X-Request-ID` when it is short and printable
    pub fn adopt_request_id(&mut self, candidate: &str) {
        let candidate = candidate.trim();
        if !candidate.is_empty()
            && candidate.len() <= 128
            && candidate.chars().all(|c| c.is_ascii_graphic())
        {
            self.request_id = candidate.to_string();
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    pub fn username(&self) -> Option<&str> {
        self.principal.as_ref().map(|p| p.username.as_str())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
