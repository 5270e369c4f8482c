//! Raw Management API passthrough.
//!
//! The request body and response body stream through Pingora untouched; only
//! the upstream URI, `Host` and `Authorization` headers are rewritten.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::Uri;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::ErrorType;
use std::net::SocketAddr;

use crate::config::UpstreamConfig;
use crate::error::{ApiError, UpstreamError};
use crate::model::{ClusterConnection, ClusterId};
use crate::rabbitmq::api_base;

/// Where a passthrough request goes and how it authenticates
#[derive(Clone, PartialEq, Eq)]
pub struct PassthroughTarget {
    pub cluster_id: ClusterId,
    pub cluster_name: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// Path and query sent upstream, e.g. `/api/policies/%2F`
    pub upstream_uri: String,
    /// `Basic` header value built from the stored cluster credentials
    pub authorization: String,
}

impl std::fmt::Debug for PassthroughTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassthroughTarget")
            .field("cluster_id", &self.cluster_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("upstream_uri", &self.upstream_uri)
            .finish_non_exhaustive()
    }
}

impl PassthroughTarget {
    /// `tail` is the still-encoded path below `/api`; `query` is forwarded verbatim
    pub fn from_cluster(
        cluster: &ClusterConnection,
        tail: &str,
        query: Option<&str>,
    ) -> Result<Self, ApiError> {
        let base = api_base(&cluster.api_url);
        let uri: Uri = base
            .parse()
            .map_err(|e| ApiError::internal(format!("stored api_url is not a valid URI: {}", e)))?;

        let tls = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            other => {
                return Err(ApiError::internal(format!(
                    "unsupported api_url scheme {:?}",
                    other
                )))
            }
        };
        let host = uri
            .host()
            .ok_or_else(|| ApiError::internal("stored api_url has no host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        let mut upstream_uri = format!(
            "{}/{}",
            uri.path().trim_end_matches('/'),
            tail.trim_start_matches('/')
        );
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            upstream_uri.push('?');
            upstream_uri.push_str(query);
        }

        let credentials = STANDARD.encode(format!("{}:{}", cluster.username, cluster.secret));

        Ok(Self {
            cluster_id: cluster.id,
            cluster_name: cluster.name.clone(),
            host,
            port,
            tls,
            upstream_uri,
            authorization: format!("Basic {}", credentials),
        })
    }

    /// Value for the rewritten `Host` header
    pub fn host_header(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == default_port {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// Resolve the host without blocking the runtime and build the Pingora peer
    pub async fn peer(&self, config: &UpstreamConfig) -> Result<HttpPeer, UpstreamError> {
        let addr = resolve(&self.host, self.port).await?;
        let mut peer = HttpPeer::new(addr, self.tls, self.host.clone());

        peer.options.connection_timeout = Some(config.connect_timeout());
        peer.options.read_timeout = Some(config.request_timeout());
        peer.options.write_timeout = Some(config.request_timeout());
        if config.accept_invalid_certs {
            peer.options.verify_cert = false;
            peer.options.verify_hostname = false;
        }
        Ok(peer)
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, UpstreamError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| UpstreamError::ConnectFailed(format!("failed to resolve {}: {}", host, e)))?;
    addrs
        .next()
        .ok_or_else(|| UpstreamError::ConnectFailed(format!("{} resolved to no addresses", host)))
}

/// Map a Pingora proxying failure onto the upstream error taxonomy
pub fn classify_error(err: &pingora_core::Error) -> UpstreamError {
    match err.etype() {
        ErrorType::ConnectTimedout | ErrorType::ReadTimedout | ErrorType::WriteTimedout => {
            UpstreamError::Timeout
        }
        ErrorType::ConnectRefused
        | ErrorType::ConnectNoRoute
        | ErrorType::ConnectError
        | ErrorType::TLSHandshakeFailure
        | ErrorType::TLSHandshakeTimedout
        | ErrorType::InvalidCert => UpstreamError::ConnectFailed(err.to_string()),
        _ => UpstreamError::Unknown(err.to_string()),
    }
}
