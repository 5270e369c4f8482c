//! RabbitMQ Management API access.
//!
//! - [`client`]: one reqwest client bound to a cluster's URL and credentials
//! - [`pool`]: long-lived clients keyed by cluster ID
//! - [`proxy`]: the authorizing layer every upstream call goes through
//! - [`resources`]: typed listings, mutations and aggregated cluster metrics

pub mod client;
pub mod pool;
pub mod proxy;
pub mod resources;

pub use client::{ManagementClient, UpstreamResponse};
pub use pool::ClientPool;
pub use proxy::{ConnectionTest, ProxyService};
pub use resources::{ResourceKind, ResourceService};

/// Percent-encode one path segment. The default vhost `/` becomes `%2F`.
pub fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Management API base URL: trailing slashes trimmed, `/api` appended when missing
pub fn api_base(api_url: &str) -> String {
    let trimmed = api_url.trim().trim_end_matches('/');
    if trimmed.ends_with("/api") {
        trimmed.to_string()
    } else {
        format!("{}/api", trimmed)
    }
}
