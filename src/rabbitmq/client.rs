//! HTTP client for a single cluster's Management API.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Method};
use serde_json::Value;

use super::api_base;
use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::model::ClusterConnection;

/// Status and decoded body of a successful call
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    /// `None` when the Management API sent no body (201/204)
    pub body: Option<Value>,
}

pub struct ManagementClient {
    base_url: String,
    username: String,
    secret: String,
    client: Client,
}

impl std::fmt::Debug for ManagementClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ManagementClient {
    pub fn new(
        cluster: &ClusterConnection,
        config: &UpstreamConfig,
    ) -> Result<Self, UpstreamError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .default_headers(headers)
            .user_agent(concat!("warren/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::Unknown(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: api_base(&cluster.api_url),
            username: cluster.username.clone(),
            secret: cluster.secret.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// GET a JSON document
    pub async fn get_json(&self, path: &str) -> Result<Value, UpstreamError> {
        let response = self.send(Method::GET, path, None).await?;
        response
            .body
            .ok_or_else(|| UpstreamError::Unknown(format!("empty response body for {}", path)))
    }

    /// GET a JSON array
    pub async fn get_list(&self, path: &str) -> Result<Vec<Value>, UpstreamError> {
        match self.get_json(path).await? {
            Value::Array(items) => Ok(items),
            other => Err(UpstreamError::Unknown(format!(
                "expected a JSON array from {}, got {}",
                path,
                json_type(&other)
            ))),
        }
    }

    /// Perform exactly one request. Non-2xx statuses become typed errors.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let mut request = self
            .client
            .request(method, self.url(path))
            .basic_auth(&self.username, Some(&self.secret));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&e))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&e))?;

        if let Some(error) =
            UpstreamError::from_status(status, String::from_utf8_lossy(&bytes).into_owned())
        {
            return Err(error);
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(UpstreamResponse { status, body: None });
        }
        let body = serde_json::from_slice(&bytes).map_err(|e| {
            UpstreamError::Unknown(format!("invalid JSON from management API: {}", e))
        })?;
        Ok(UpstreamResponse {
            status,
            body: Some(body),
        })
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
