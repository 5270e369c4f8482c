//! Request parsing and response writing helpers.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use pingora_core::Result;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::Session;

use crate::security::SecurityError;

/// Request headers as a map. Headers with non-UTF8 values are skipped.
pub fn extract_headers(req: &RequestHeader) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for (name, value) in req.headers.iter() {
        if let Ok(value_str) = value.to_str() {
            headers.insert(name.to_string(), value_str.to_string());
        }
    }
    headers
}

/// URL-decoded query parameters. A key without `=` maps to an empty value.
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let Some(query) = query else {
        return params;
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let decode = |s: &str| {
            let s = s.replace('+', " ");
            urlencoding::decode(&s)
                .map(|d| d.into_owned())
                .unwrap_or(s)
        };
        params.insert(decode(key), decode(value));
    }
    params
}

pub fn extract_query_params(req: &RequestHeader) -> HashMap<String, String> {
    parse_query(req.uri.query())
}

/// Client IP of the request. `X-Forwarded-For` is only consulted when the
/// socket peer is one of `trusted_proxies`.
pub fn get_client_ip(session: &Session, trusted_proxies: &[IpAddr]) -> String {
    let peer = session
        .client_addr()
        .and_then(|addr| addr.as_inet())
        .map(|addr| addr.ip());
    let forwarded_for = session
        .req_header()
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());

    resolve_client_ip(peer, forwarded_for, trusted_proxies)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Walks `X-Forwarded-For` from the right while the hop that appended the
/// entry is trusted. The result is the nearest address no trusted proxy
/// vouches for, or the last trusted hop when the chain is malformed.
pub fn resolve_client_ip(
    peer: Option<IpAddr>,
    forwarded_for: Option<&str>,
    trusted_proxies: &[IpAddr],
) -> Option<IpAddr> {
    let mut client = peer?;
    let Some(forwarded_for) = forwarded_for else {
        return Some(client);
    };

    for hop in forwarded_for.rsplit(',') {
        if !trusted_proxies.contains(&client) {
            break;
        }
        match parse_ip(hop.trim()) {
            Some(ip) => client = ip,
            None => break,
        }
    }
    Some(client)
}

/// Parse an address as produced by [`get_client_ip`]; a port suffix is tolerated
pub fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|a| a.ip()))
}

/// Sum of header name and value lengths
pub fn header_size(req: &RequestHeader) -> usize {
    req.headers
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len())
        .sum()
}

pub fn content_length(req: &RequestHeader) -> Option<usize> {
    req.headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<usize>().ok())
}

#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error(transparent)]
    TooLarge(#[from] SecurityError),
    #[error("failed to read request body: {0}")]
    Read(String),
}

/// Read the whole request body, failing once it exceeds `limit`.
/// Catches chunked bodies that declared no `Content-Length`.
pub async fn read_body(
    session: &mut Session,
    limit: usize,
) -> std::result::Result<Bytes, BodyError> {
    let mut body = Vec::new();
    while let Some(chunk) = session
        .read_request_body()
        .await
        .map_err(|e| BodyError::Read(e.to_string()))?
    {
        if body.len() + chunk.len() > limit {
            return Err(SecurityError::PayloadTooLarge {
                size: body.len() + chunk.len(),
                limit,
            }
            .into());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(body))
}

/// Write a complete response and finish the downstream stream
pub async fn write_response(
    session: &mut Session,
    status: u16,
    content_type: &str,
    body: Bytes,
    request_id: &str,
    extra_headers: &[(&str, String)],
) -> Result<()> {
    let mut header = ResponseHeader::build(status, None)?;
    header.insert_header("Content-Type", content_type.to_string())?;
    header.insert_header("Content-Length", body.len().to_string())?;
    header.insert_header("X-Request-ID", request_id.to_string())?;
    for (name, value) in extra_headers {
        header.insert_header(name.to_string(), value.clone())?;
    }

    session
        .write_response_header(Box::new(header), body.is_empty())
        .await?;
    if !body.is_empty() {
        session.write_response_body(Some(body), true).await?;
    }
    Ok(())
}

pub async fn write_json(
    session: &mut Session,
    status: u16,
    body: &serde_json::Value,
    request_id: &str,
    extra_headers: &[(&str, String)],
) -> Result<()> {
    write_response(
        session,
        status,
        "application/json",
        Bytes::from(body.to_string()),
        request_id,
        extra_headers,
    )
    .await
}
