//! Typed operations on RabbitMQ resources.
//!
//! Every operation goes through [`ProxyService`], so access control, the
//! active check and error mapping apply uniformly.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use super::encode_segment;
use super::proxy::ProxyService;
use crate::auth::Principal;
use crate::config::PaginationConfig;
use crate::constants::MAX_MESSAGES_PER_GET;
use crate::error::{ApiError, UpstreamError};
use crate::model::ClusterId;
use crate::pagination::{json_str, paginate_matching, Page, PageRequest};

/// AMQP short strings are limited to 255 bytes
const MAX_RESOURCE_NAME_BYTES: usize = 255;

/// Collections that can be listed with pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Connections,
    Channels,
    Exchanges,
    Queues,
    Bindings,
    Consumers,
    Vhosts,
    Nodes,
    Users,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Connections,
        ResourceKind::Channels,
        ResourceKind::Exchanges,
        ResourceKind::Queues,
        ResourceKind::Bindings,
        ResourceKind::Consumers,
        ResourceKind::Vhosts,
        ResourceKind::Nodes,
        ResourceKind::Users,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Connections => "connections",
            ResourceKind::Channels => "channels",
            ResourceKind::Exchanges => "exchanges",
            ResourceKind::Queues => "queues",
            ResourceKind::Bindings => "bindings",
            ResourceKind::Consumers => "consumers",
            ResourceKind::Vhosts => "vhosts",
            ResourceKind::Nodes => "nodes",
            ResourceKind::Users => "users",
        }
    }

    /// Management API path of the listing, optionally scoped to a vhost
    pub fn list_path(&self, vhost: Option<&str>) -> Result<String, ApiError> {
        let Some(vhost) = vhost else {
            return Ok(format!("/{}", self.as_str()));
        };
        let vhost = encode_segment(vhost);
        match self {
            ResourceKind::Exchanges
            | ResourceKind::Queues
            | ResourceKind::Bindings
            | ResourceKind::Consumers => Ok(format!("/{}/{}", self.as_str(), vhost)),
            ResourceKind::Connections | ResourceKind::Channels => {
                Ok(format!("/vhosts/{}/{}", vhost, self.as_str()))
            }
            ResourceKind::Vhosts | ResourceKind::Nodes | ResourceKind::Users => {
                Err(ApiError::validation(format!(
                    "{} cannot be scoped to a vhost",
                    self.as_str()
                )))
            }
        }
    }

    /// Whether `item` matches the name filter
    pub fn matches(&self, item: &Value, filter: &crate::pagination::NameFilter) -> bool {
        match self {
            ResourceKind::Consumers => {
                json_str(item, "consumer_tag").is_some_and(|v| filter.matches(v))
            }
            ResourceKind::Bindings => ["source", "destination"]
                .iter()
                .filter_map(|field| json_str(item, field))
                .any(|v| filter.matches(v)),
            _ => json_str(item, "name").is_some_and(|v| filter.matches(v)),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or(())
    }
}

fn default_true() -> bool {
    true
}

/// Queue declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSpec {
    #[serde(default = "default_true")]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl Default for QueueSpec {
    fn default() -> Self {
        Self {
            durable: true,
            auto_delete: false,
            arguments: Map::new(),
        }
    }
}

/// Exchange declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Exchange-to-queue binding
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingSpec {
    #[serde(default)]
    pub routing_key: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

fn default_payload_encoding() -> String {
    "string".to_string()
}

/// Message published through the Management API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub routing_key: String,
    pub payload: String,
    #[serde(default = "default_payload_encoding")]
    pub payload_encoding: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub routed: bool,
}

fn default_count() -> u32 {
    1
}

fn default_ackmode() -> String {
    "ack_requeue_true".to_string()
}

fn default_encoding() -> String {
    "auto".to_string()
}

/// Fetch messages from a queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMessagesRequest {
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default = "default_ackmode")]
    pub ackmode: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate: Option<u64>,
}

impl Default for GetMessagesRequest {
    fn default() -> Self {
        Self {
            count: default_count(),
            ackmode: default_ackmode(),
            encoding: default_encoding(),
            truncate: None,
        }
    }
}

const ACK_MODES: &[&str] = &[
    "ack_requeue_true",
    "ack_requeue_false",
    "reject_requeue_true",
    "reject_requeue_false",
];

impl GetMessagesRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if !(1..=MAX_MESSAGES_PER_GET).contains(&self.count) {
            return Err(ApiError::validation(format!(
                "count must be between 1 and {}",
                MAX_MESSAGES_PER_GET
            )));
        }
        if !ACK_MODES.contains(&self.ackmode.as_str()) {
            return Err(ApiError::validation(format!(
                "ackmode must be one of {}",
                ACK_MODES.join(", ")
            )));
        }
        if !matches!(self.encoding.as_str(), "auto" | "base64") {
            return Err(ApiError::validation("encoding must be auto or base64"));
        }
        Ok(())
    }
}

/// Rates from the overview `message_stats`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageRates {
    pub publish_rate: f64,
    pub deliver_rate: f64,
    pub ack_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueTotals {
    pub messages: u64,
    pub ready: u64,
    pub unacknowledged: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectTotals {
    pub connections: u64,
    pub channels: u64,
    pub exchanges: u64,
    pub queues: u64,
    pub consumers: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeMetrics {
    pub name: String,
    pub running: bool,
    pub mem_used: u64,
    pub mem_limit: u64,
    pub disk_free: u64,
    pub disk_free_limit: u64,
    pub fd_used: u64,
    pub fd_total: u64,
}

/// Aggregated view over `/api/overview` and `/api/nodes`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMetrics {
    pub cluster_name: Option<String>,
    pub rabbitmq_version: Option<String>,
    pub message_stats: MessageRates,
    pub queue_totals: QueueTotals,
    pub object_totals: ObjectTotals,
    pub nodes: Vec<NodeMetrics>,
}

fn at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}

fn u64_at(value: &Value, path: &[&str]) -> u64 {
    at(value, path).and_then(Value::as_u64).unwrap_or(0)
}

fn f64_at(value: &Value, path: &[&str]) -> f64 {
    at(value, path).and_then(Value::as_f64).unwrap_or(0.0)
}

impl ClusterMetrics {
    pub fn from_responses(overview: &Value, nodes: &[Value]) -> Self {
        Self {
            cluster_name: json_str(overview, "cluster_name").map(str::to_string),
            rabbitmq_version: json_str(overview, "rabbitmq_version").map(str::to_string),
            message_stats: MessageRates {
                publish_rate: f64_at(overview, &["message_stats", "publish_details", "rate"]),
                deliver_rate: f64_at(overview, &["message_stats", "deliver_get_details", "rate"]),
                ack_rate: f64_at(overview, &["message_stats", "ack_details", "rate"]),
            },
            queue_totals: QueueTotals {
                messages: u64_at(overview, &["queue_totals", "messages"]),
                ready: u64_at(overview, &["queue_totals", "messages_ready"]),
                unacknowledged: u64_at(overview, &["queue_totals", "messages_unacknowledged"]),
            },
            object_totals: ObjectTotals {
                connections: u64_at(overview, &["object_totals", "connections"]),
                channels: u64_at(overview, &["object_totals", "channels"]),
                exchanges: u64_at(overview, &["object_totals", "exchanges"]),
                queues: u64_at(overview, &["object_totals", "queues"]),
                consumers: u64_at(overview, &["object_totals", "consumers"]),
            },
            nodes: nodes
                .iter()
                .map(|node| NodeMetrics {
                    name: json_str(node, "name").unwrap_or_default().to_string(),
                    running: node.get("running").and_then(Value::as_bool).unwrap_or(false),
                    mem_used: u64_at(node, &["mem_used"]),
                    mem_limit: u64_at(node, &["mem_limit"]),
                    disk_free: u64_at(node, &["disk_free"]),
                    disk_free_limit: u64_at(node, &["disk_free_limit"]),
                    fd_used: u64_at(node, &["fd_used"]),
                    fd_total: u64_at(node, &["fd_total"]),
                })
                .collect(),
        }
    }
}

pub fn validate_resource_name(kind: &str, name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::validation(format!("{} name cannot be empty", kind)));
    }
    if name.len() > MAX_RESOURCE_NAME_BYTES {
        return Err(ApiError::validation(format!(
            "{} name must be at most {} bytes",
            kind, MAX_RESOURCE_NAME_BYTES
        )));
    }
    Ok(())
}

fn object_path(collection: &str, vhost: &str, name: &str) -> String {
    format!(
        "/{}/{}/{}",
        collection,
        encode_segment(vhost),
        encode_segment(name)
    )
}

pub struct ResourceService {
    proxy: Arc<ProxyService>,
    pagination: PaginationConfig,
}

impl ResourceService {
    pub fn new(proxy: Arc<ProxyService>, pagination: PaginationConfig) -> Self {
        Self { proxy, pagination }
    }

    pub fn proxy(&self) -> &Arc<ProxyService> {
        &self.proxy
    }

    /// Paginated, filtered listing. Query: `vhost`, `page`, `pageSize`, `name`, `useRegex`.
    pub async fn list(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        kind: ResourceKind,
        query: &HashMap<String, String>,
    ) -> Result<Page<Value>, ApiError> {
        // Validate everything locally before the upstream call
        let request = PageRequest::from_query(query, &self.pagination)?;
        let vhost = query.get("vhost").map(String::as_str).filter(|v| !v.is_empty());
        let path = kind.list_path(vhost)?;

        let items = self.proxy.get_list(principal, cluster_id, &path).await?;
        paginate_matching(items, &request, |item, filter| kind.matches(item, filter))
    }

    pub async fn overview(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
    ) -> Result<Value, ApiError> {
        self.proxy.get_json(principal, cluster_id, "/overview").await
    }

    pub async fn queue(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        vhost: &str,
        name: &str,
    ) -> Result<Value, ApiError> {
        validate_resource_name("queue", name)?;
        self.proxy
            .get_json(principal, cluster_id, &object_path("queues", vhost, name))
            .await
    }

    pub async fn create_queue(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        vhost: &str,
        name: &str,
        spec: &QueueSpec,
    ) -> Result<(), ApiError> {
        validate_resource_name("queue", name)?;
        let body = serde_json::to_value(spec).map_err(|e| ApiError::internal(e.to_string()))?;
        self.proxy
            .send(
                principal,
                cluster_id,
                Method::PUT,
                &object_path("queues", vhost, name),
                Some(&body),
            )
            .await
            .map(|_| ())
    }

    pub async fn delete_queue(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        vhost: &str,
        name: &str,
    ) -> Result<(), ApiError> {
        validate_resource_name("queue", name)?;
        self.proxy
            .send(
                principal,
                cluster_id,
                Method::DELETE,
                &object_path("queues", vhost, name),
                None,
            )
            .await
            .map(|_| ())
    }

    pub async fn purge_queue(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        vhost: &str,
        name: &str,
    ) -> Result<(), ApiError> {
        validate_resource_name("queue", name)?;
        let path = format!("{}/contents", object_path("queues", vhost, name));
        self.proxy
            .send(principal, cluster_id, Method::DELETE, &path, None)
            .await
            .map(|_| ())
    }

    pub async fn get_messages(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        vhost: &str,
        queue: &str,
        request: &GetMessagesRequest,
    ) -> Result<Value, ApiError> {
        validate_resource_name("queue", queue)?;
        request.validate()?;
        let path = format!("{}/get", object_path("queues", vhost, queue));
        let body = serde_json::to_value(request).map_err(|e| ApiError::internal(e.to_string()))?;

        let response = self
            .proxy
            .send(principal, cluster_id, Method::POST, &path, Some(&body))
            .await?;
        Ok(response.body.unwrap_or_else(|| Value::Array(Vec::new())))
    }

    pub async fn exchange(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        vhost: &str,
        name: &str,
    ) -> Result<Value, ApiError> {
        validate_resource_name("exchange", name)?;
        self.proxy
            .get_json(principal, cluster_id, &object_path("exchanges", vhost, name))
            .await
    }

    pub async fn create_exchange(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        vhost: &str,
        name: &str,
        spec: &ExchangeSpec,
    ) -> Result<(), ApiError> {
        validate_resource_name("exchange", name)?;
        if spec.kind.trim().is_empty() {
            return Err(ApiError::validation("exchange type cannot be empty"));
        }
        let body = serde_json::to_value(spec).map_err(|e| ApiError::internal(e.to_string()))?;
        self.proxy
            .send(
                principal,
                cluster_id,
                Method::PUT,
                &object_path("exchanges", vhost, name),
                Some(&body),
            )
            .await
            .map(|_| ())
    }

    pub async fn delete_exchange(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        vhost: &str,
        name: &str,
    ) -> Result<(), ApiError> {
        validate_resource_name("exchange", name)?;
        self.proxy
            .send(
                principal,
                cluster_id,
                Method::DELETE,
                &object_path("exchanges", vhost, name),
                None,
            )
            .await
            .map(|_| ())
    }

    pub async fn publish(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        vhost: &str,
        exchange: &str,
        request: &PublishRequest,
    ) -> Result<PublishResult, ApiError> {
        // The default exchange has an empty name
        if exchange.len() > MAX_RESOURCE_NAME_BYTES {
            return Err(ApiError::validation("exchange name is too long"));
        }
        if !matches!(request.payload_encoding.as_str(), "string" | "base64") {
            return Err(ApiError::validation(
                "payload_encoding must be string or base64",
            ));
        }
        let path = format!("{}/publish", object_path("exchanges", vhost, exchange));
        let body = json!({
            "routing_key": request.routing_key,
            "payload": request.payload,
            "payload_encoding": request.payload_encoding,
            "properties": request.properties,
        });

        let response = self
            .proxy
            .send(principal, cluster_id, Method::POST, &path, Some(&body))
            .await?;
        let routed = response
            .body
            .as_ref()
            .and_then(|b| b.get("routed"))
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                ApiError::from(UpstreamError::Unknown(
                    "publish response has no 'routed' field".to_string(),
                ))
            })?;
        Ok(PublishResult { routed })
    }

    pub async fn create_binding(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        vhost: &str,
        source: &str,
        destination: &str,
        spec: &BindingSpec,
    ) -> Result<(), ApiError> {
        validate_resource_name("exchange", source)?;
        validate_resource_name("queue", destination)?;
        let path = format!(
            "/bindings/{}/e/{}/q/{}",
            encode_segment(vhost),
            encode_segment(source),
            encode_segment(destination)
        );
        let body = serde_json::to_value(spec).map_err(|e| ApiError::internal(e.to_string()))?;
        self.proxy
            .send(principal, cluster_id, Method::POST, &path, Some(&body))
            .await
            .map(|_| ())
    }

    pub async fn close_connection(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
        name: &str,
    ) -> Result<(), ApiError> {
        validate_resource_name("connection", name)?;
        let path = format!("/connections/{}", encode_segment(name));
        self.proxy
            .send(principal, cluster_id, Method::DELETE, &path, None)
            .await
            .map(|_| ())
    }

    /// Fetch overview and nodes concurrently and aggregate them
    pub async fn cluster_metrics(
        &self,
        principal: &Principal,
        cluster_id: &ClusterId,
    ) -> Result<ClusterMetrics, ApiError> {
        let (overview, nodes) = futures::try_join!(
            self.proxy.get_json(principal, cluster_id, "/overview"),
            self.proxy.get_list(principal, cluster_id, "/nodes"),
        )?;
        Ok(ClusterMetrics::from_responses(&overview, &nodes))
    }
}
