// Test harness for integration tests
// A minimal RabbitMQ Management API stand-in served from a tokio TcpListener,
// a fixture wiring the store, pool and services against it, and a gateway
// harness serving the full Pingora pipeline in front of the stand-in.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use warren::auth::{hash_password, Principal};
use warren::config::{Config, PaginationConfig, UpstreamConfig};
use warren::gateway::Gateway;
use warren::metrics::Metrics;
use warren::model::{ClusterConnection, NewCluster, Role, User};
use warren::rabbitmq::{ClientPool, ProxyService, ResourceService};
use warren::store::{MemoryStore, Store};

/// Request as seen by the mock
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path without the query string, still percent-encoded
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub request_id: Option<String>,
    pub body: String,
}

#[derive(Clone)]
struct Stub {
    status: u16,
    body: String,
    delay: Duration,
}

type Stubs = Arc<Mutex<HashMap<(String, String), Stub>>>;

pub struct MockManagementApi {
    addr: SocketAddr,
    stubs: Stubs,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl MockManagementApi {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stubs: Stubs = Arc::new(Mutex::new(HashMap::new()));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let stubs = stubs.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    let stubs = stubs.clone();
                    let requests = requests.clone();
                    tokio::spawn(async move {
                        let _ = handle_connection(stream, stubs, requests).await;
                    });
                }
            })
        };

        Self {
            addr,
            stubs,
            requests,
            task,
        }
    }

    /// Base URL to store as a cluster's `api_url`
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Answer `method path` (path below `/api`, encoded) with `status` and `body`
    pub fn stub(&self, method: &str, path: &str, status: u16, body: Value) {
        self.stub_delayed(method, path, status, body, Duration::ZERO);
    }

    pub fn stub_delayed(
        &self,
        method: &str,
        path: &str,
        status: u16,
        body: Value,
        delay: Duration,
    ) {
        let body = if body.is_null() {
            String::new()
        } else {
            body.to_string()
        };
        self.stubs.lock().insert(
            (method.to_string(), format!("/api{}", path)),
            Stub {
                status,
                body,
                delay,
            },
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Drop for MockManagementApi {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    stubs: Stubs,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    let mut request_id = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                "authorization" => authorization = Some(value.trim().to_string()),
                "x-request-id" => request_id = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.clone(), None),
    };
    requests.lock().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        query,
        authorization,
        request_id,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    let stub = stubs.lock().get(&(method, path)).cloned().unwrap_or(Stub {
        status: 404,
        body: r#"{"error":"Object Not Found","reason":"Not Found"}"#.to_string(),
        delay: Duration::ZERO,
    });
    if !stub.delay.is_zero() {
        tokio::time::sleep(stub.delay).await;
    }

    let response = format!(
        "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        stub.status,
        stub.body.len(),
        stub.body
    );
    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Services wired against a [`MockManagementApi`]
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub metrics: Arc<Metrics>,
    pub pool: Arc<ClientPool>,
    pub proxy: Arc<ProxyService>,
    pub resources: ResourceService,
    pub admin: Principal,
    pub alice: Principal,
    pub cluster: ClusterConnection,
}

pub async fn fixture(api: &MockManagementApi, upstream: UpstreamConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let metrics = Arc::new(Metrics::new().unwrap());
    let pool = Arc::new(ClientPool::new(upstream, metrics.clone()));
    let proxy = Arc::new(ProxyService::new(store.clone(), pool.clone(), metrics.clone()));
    let resources = ResourceService::new(proxy.clone(), PaginationConfig::default());

    let admin = store
        .create_user(User::new("root", Role::Admin, "h".to_string()))
        .await
        .unwrap();
    let alice = store
        .create_user(User::new("alice", Role::User, "h".to_string()))
        .await
        .unwrap();
    let cluster = store
        .create_cluster(
            NewCluster {
                name: "mock".to_string(),
                description: None,
                api_url: api.url(),
                username: "monitor".to_string(),
                secret: "monitor-secret".to_string(),
                active: true,
            }
            .into_cluster(),
        )
        .await
        .unwrap();

    Fixture {
        store,
        metrics,
        pool,
        proxy,
        resources,
        admin: Principal::from(&admin),
        alice: Principal::from(&alice),
        cluster,
    }
}

/// `Authorization` value the mock should receive for the fixture cluster
pub fn expected_basic_auth() -> String {
    use base64::Engine as _;
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode("monitor:monitor-secret")
    )
}

pub const ROOT_PASSWORD: &str = "root-password";
pub const ALICE_PASSWORD: &str = "alice-password";
pub const BOB_PASSWORD: &str = "bob-password";

/// Gateway served by Pingora on a free local port. The store is shared with
/// the running gateway, so tests can change it after start-up.
///
/// Users: `root` (admin), `alice` (assigned to the `mock` cluster) and `bob`
/// (assigned to nothing).
pub struct GatewayHarness {
    pub base_url: String,
    pub store: Arc<MemoryStore>,
    pub cluster: ClusterConnection,
    pub client: reqwest::Client,
}

impl GatewayHarness {
    pub async fn start(api: &MockManagementApi) -> Self {
        Self::start_with(api, |_| {}).await
    }

    /// Start with a configuration adjusted by `configure`
    pub async fn start_with(api: &MockManagementApi, configure: impl FnOnce(&mut Config)) -> Self {
        let store = Arc::new(MemoryStore::new());
        for (username, role, password) in [
            ("root", Role::Admin, ROOT_PASSWORD),
            ("alice", Role::User, ALICE_PASSWORD),
            ("bob", Role::User, BOB_PASSWORD),
        ] {
            let hash = hash_password(password).unwrap();
            store.create_user(User::new(username, role, hash)).await.unwrap();
        }
        let cluster = store
            .create_cluster(
                NewCluster {
                    name: "mock".to_string(),
                    description: None,
                    api_url: api.url(),
                    username: "monitor".to_string(),
                    secret: "monitor-secret".to_string(),
                    active: true,
                }
                .into_cluster(),
            )
            .await
            .unwrap();
        let alice = store.find_user_by_username("alice").await.unwrap().unwrap();
        let cluster = store.assign_user(&cluster.id, &alice.id).await.unwrap();

        let port = free_port();
        let yaml = format!("server:\n  address: \"127.0.0.1\"\n  port: {}\n  threads: 1\n", port);
        let mut config = Config::from_yaml_with_env(&yaml).unwrap();
        configure(&mut config);
        config.validate().unwrap();

        let shared: Arc<dyn Store> = store.clone();
        thread::spawn(move || {
            let mut server = pingora_core::server::Server::new(None)
                .expect("Failed to create Pingora server");
            server.bootstrap();

            let gateway = Gateway::new(&config, shared).expect("Failed to create gateway");
            let mut proxy_service =
                pingora_proxy::http_proxy_service(&server.configuration, gateway);
            proxy_service.threads = Some(config.server.threads);
            proxy_service.add_tcp(&config.server.listen_addr());

            server.add_service(proxy_service);
            server.run_forever();
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        let base_url = format!("http://127.0.0.1:{}", port);
        wait_until_serving(&client, &base_url).await;

        Self {
            base_url,
            store,
            cluster,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// URL of a raw Management API call through the gateway
    pub fn passthrough_url(&self, tail: &str) -> String {
        self.url(&format!("/api/clusters/{}/proxy/{}", self.cluster.id, tail))
    }
}

/// A port nothing listens on once this returns
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn wait_until_serving(client: &reqwest::Client, base_url: &str) {
    for _ in 0..50 {
        if let Ok(response) = client.get(format!("{}/health", base_url)).send().await {
            if response.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Gateway did not start serving at {}", base_url);
}
