//! Local API handlers.
//!
//! `Handlers::dispatch` runs an authenticated, already-routed request against
//! the services and returns a [`Reply`]. It never touches the Pingora session,
//! so every route can be exercised directly in tests.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::access::require_admin;
use crate::audit::{AuditFilter, AuditOperation, AuditRecord, AuditService};
use crate::auth::Principal;
use crate::config::PaginationConfig;
use crate::error::ApiError;
use crate::model::{ClusterId, ClusterPatch, NewCluster};
use crate::pagination::PageRequest;
use crate::rabbitmq::resources::{
    BindingSpec, ExchangeSpec, GetMessagesRequest, PublishRequest, QueueSpec,
};
use crate::rabbitmq::ResourceService;
use crate::router::{ObjectRef, Route};
use crate::service::users::{ChangePasswordRequest, CreateUserRequest, UpdateUserRequest};
use crate::service::{ClusterService, UserService};

/// Status and optional JSON body of a handled request
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Option<Value>,
}

impl Reply {
    pub fn ok<T: Serialize>(value: &T) -> Result<Self, ApiError> {
        Self::with_status(200, value)
    }

    pub fn created<T: Serialize>(value: &T) -> Result<Self, ApiError> {
        Self::with_status(201, value)
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: None,
        }
    }

    fn with_status<T: Serialize>(status: u16, value: &T) -> Result<Self, ApiError> {
        let body = serde_json::to_value(value)
            .map_err(|e| ApiError::internal(format!("failed to serialize response: {}", e)))?;
        Ok(Self {
            status,
            body: Some(body),
        })
    }
}

/// The parts of a request the handlers need
#[derive(Debug, Clone, Default)]
pub struct LocalRequest {
    pub query: HashMap<String, String>,
    pub body: Bytes,
    pub request_id: String,
    pub client_ip: String,
}

/// Decode a JSON request body. An empty body decodes as `{}`.
pub fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(raw)
        .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e)))
}

pub struct Handlers {
    users: UserService,
    clusters: ClusterService,
    resources: ResourceService,
    audit: Arc<AuditService>,
    pagination: PaginationConfig,
}

impl Handlers {
    pub fn new(
        users: UserService,
        clusters: ClusterService,
        resources: ResourceService,
        audit: Arc<AuditService>,
        pagination: PaginationConfig,
    ) -> Self {
        Self {
            users,
            clusters,
            resources,
            audit,
            pagination,
        }
    }

    pub fn resources(&self) -> &ResourceService {
        &self.resources
    }

    pub fn audit(&self) -> &Arc<AuditService> {
        &self.audit
    }

    async fn audited<T>(
        &self,
        req: &LocalRequest,
        principal: &Principal,
        operation: AuditOperation,
        cluster_id: Option<ClusterId>,
        resource: Option<String>,
        result: Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let mut record = AuditRecord::new(
            operation,
            principal.username.as_str(),
            req.request_id.as_str(),
            req.client_ip.as_str(),
        );
        if let Some(id) = cluster_id {
            record = record.with_cluster(id);
        }
        if let Some(resource) = resource {
            record = record.with_resource(resource);
        }
        self.audit.record(record.with_result(&result)).await;
        result
    }

    /// [`Self::audited`] for a queue or exchange, recorded as `vhost/name`
    async fn audited_object<T>(
        &self,
        req: &LocalRequest,
        principal: &Principal,
        operation: AuditOperation,
        object: &ObjectRef,
        result: Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let resource = Some(object.resource());
        self.audited(req, principal, operation, Some(object.cluster_id), resource, result)
            .await
    }

    /// Handle every route except the public endpoints and the raw passthrough
    pub async fn dispatch(
        &self,
        route: &Route,
        principal: &Principal,
        req: &LocalRequest,
    ) -> Result<Reply, ApiError> {
        match route {
            Route::Health | Route::Ready | Route::Metrics | Route::Passthrough { .. } => Err(
                ApiError::internal(format!("route {} is not handled locally", route.name())),
            ),

            Route::Me => Reply::ok(&self.users.me(principal).await?),
            Route::ChangeOwnPassword => {
                let result = async {
                    let request: ChangePasswordRequest = parse_body(&req.body)?;
                    self.users.change_own_password(principal, request).await
                }
                .await;
                let resource = Some(principal.username.clone());
                self.audited(req, principal, AuditOperation::PasswordChange, None, resource, result)
                    .await?;
                Ok(Reply::no_content())
            }

            Route::ListUsers => Reply::ok(&self.users.list(principal, &req.query).await?),
            Route::CreateUser => {
                let request: Result<CreateUserRequest, ApiError> = parse_body(&req.body);
                let resource = request.as_ref().ok().map(|r| r.username.clone());
                let result = match request {
                    Ok(request) => self.users.create(principal, request).await,
                    Err(e) => Err(e),
                };
                let view = self
                    .audited(req, principal, AuditOperation::UserCreate, None, resource, result)
                    .await?;
                Reply::created(&view)
            }
            Route::GetUser(id) => Reply::ok(&self.users.get(principal, id).await?),
            Route::UpdateUser(id) => {
                let result = async {
                    let request: UpdateUserRequest = parse_body(&req.body)?;
                    self.users.update(principal, id, request).await
                }
                .await;
                let resource = Some(id.to_string());
                let view = self
                    .audited(req, principal, AuditOperation::UserUpdate, None, resource, result)
                    .await?;
                Reply::ok(&view)
            }
            Route::DeleteUser(id) => {
                let result = self.users.delete(principal, id).await;
                let resource = Some(id.to_string());
                self.audited(req, principal, AuditOperation::UserDelete, None, resource, result)
                    .await?;
                Ok(Reply::no_content())
            }

            Route::ListClusters => Reply::ok(&self.clusters.list(principal, &req.query).await?),
            Route::CreateCluster => {
                let request: Result<NewCluster, ApiError> = parse_body(&req.body);
                let resource = request.as_ref().ok().map(|r| r.name.clone());
                let result = match request {
                    Ok(request) => self.clusters.create(principal, request).await,
                    Err(e) => Err(e),
                };
                let cluster_id = result.as_ref().ok().map(|view| view.id);
                let operation = AuditOperation::ClusterCreate;
                let view = self
                    .audited(req, principal, operation, cluster_id, resource, result)
                    .await?;
                Reply::created(&view)
            }
            Route::GetCluster(id) => Reply::ok(&self.clusters.get(principal, id).await?),
            Route::UpdateCluster(id) => {
                let result = async {
                    let patch: ClusterPatch = parse_body(&req.body)?;
                    self.clusters.update(principal, id, patch).await
                }
                .await;
                let view = self
                    .audited(req, principal, AuditOperation::ClusterUpdate, Some(*id), None, result)
                    .await?;
                Reply::ok(&view)
            }
            Route::DeleteCluster(id) => {
                let result = self.clusters.delete(principal, id).await;
                self.audited(req, principal, AuditOperation::ClusterDelete, Some(*id), None, result)
                    .await?;
                Ok(Reply::no_content())
            }
            Route::TestCluster(id) => {
                Reply::ok(&self.clusters.test_connection(principal, id).await?)
            }
            Route::ClusterUsers(id) => {
                Reply::ok(&self.clusters.assigned_users(principal, id).await?)
            }
            Route::AssignUser(id, user_id) => {
                let result = self.clusters.assign_user(principal, id, user_id).await;
                let view = self
                    .audited(
                        req,
                        principal,
                        AuditOperation::ClusterAssignUser,
                        Some(*id),
                        Some(user_id.to_string()),
                        result,
                    )
                    .await?;
                Reply::ok(&view)
            }
            Route::UnassignUser(id, user_id) => {
                let result = self.clusters.unassign_user(principal, id, user_id).await;
                let view = self
                    .audited(
                        req,
                        principal,
                        AuditOperation::ClusterUnassignUser,
                        Some(*id),
                        Some(user_id.to_string()),
                        result,
                    )
                    .await?;
                Reply::ok(&view)
            }

            Route::Overview(id) => Reply::ok(&self.resources.overview(principal, id).await?),
            Route::ClusterMetrics(id) => {
                Reply::ok(&self.resources.cluster_metrics(principal, id).await?)
            }
            Route::ListResources(id, kind) => {
                Reply::ok(&self.resources.list(principal, id, *kind, &req.query).await?)
            }

            Route::GetQueue(o) => Reply::ok(
                &self
                    .resources
                    .queue(principal, &o.cluster_id, &o.vhost, &o.name)
                    .await?,
            ),
            Route::CreateQueue(o) => {
                let result = async {
                    let spec: QueueSpec = parse_body(&req.body)?;
                    self.resources
                        .create_queue(principal, &o.cluster_id, &o.vhost, &o.name, &spec)
                        .await
                }
                .await;
                self.audited_object(req, principal, AuditOperation::QueueCreate, o, result)
                    .await?;
                Ok(Reply::no_content())
            }
            Route::DeleteQueue(o) => {
                let result = self
                    .resources
                    .delete_queue(principal, &o.cluster_id, &o.vhost, &o.name)
                    .await;
                self.audited_object(req, principal, AuditOperation::QueueDelete, o, result)
                    .await?;
                Ok(Reply::no_content())
            }
            Route::PurgeQueue(o) => {
                let result = self
                    .resources
                    .purge_queue(principal, &o.cluster_id, &o.vhost, &o.name)
                    .await;
                self.audited_object(req, principal, AuditOperation::QueuePurge, o, result)
                    .await?;
                Ok(Reply::no_content())
            }
            Route::GetMessages(o) => {
                let result = async {
                    let request: GetMessagesRequest = parse_body(&req.body)?;
                    self.resources
                        .get_messages(principal, &o.cluster_id, &o.vhost, &o.name, &request)
                        .await
                }
                .await;
                let messages = self
                    .audited_object(req, principal, AuditOperation::MessageGet, o, result)
                    .await?;
                Reply::ok(&messages)
            }

            Route::GetExchange(o) => Reply::ok(
                &self
                    .resources
                    .exchange(principal, &o.cluster_id, &o.vhost, &o.name)
                    .await?,
            ),
            Route::CreateExchange(o) => {
                let result = async {
                    let spec: ExchangeSpec = parse_body(&req.body)?;
                    self.resources
                        .create_exchange(principal, &o.cluster_id, &o.vhost, &o.name, &spec)
                        .await
                }
                .await;
                self.audited_object(req, principal, AuditOperation::ExchangeCreate, o, result)
                    .await?;
                Ok(Reply::no_content())
            }
            Route::DeleteExchange(o) => {
                let result = self
                    .resources
                    .delete_exchange(principal, &o.cluster_id, &o.vhost, &o.name)
                    .await;
                self.audited_object(req, principal, AuditOperation::ExchangeDelete, o, result)
                    .await?;
                Ok(Reply::no_content())
            }
            Route::Publish(o) => {
                let result = async {
                    let request: PublishRequest = parse_body(&req.body)?;
                    self.resources
                        .publish(principal, &o.cluster_id, &o.vhost, &o.name, &request)
                        .await
                }
                .await;
                let published = self
                    .audited_object(req, principal, AuditOperation::MessagePublish, o, result)
                    .await?;
                Reply::ok(&published)
            }

            Route::CreateBinding {
                cluster_id,
                vhost,
                source,
                destination,
            } => {
                let result = async {
                    let spec: BindingSpec = parse_body(&req.body)?;
                    self.resources
                        .create_binding(principal, cluster_id, vhost, source, destination, &spec)
                        .await
                }
                .await;
                let resource = Some(format!("{}/{}->{}", vhost, source, destination));
                let operation = AuditOperation::BindingCreate;
                self.audited(req, principal, operation, Some(*cluster_id), resource, result)
                    .await?;
                Ok(Reply::no_content())
            }
            Route::CloseConnection { cluster_id, name } => {
                let result = self
                    .resources
                    .close_connection(principal, cluster_id, name)
                    .await;
                let operation = AuditOperation::ConnectionClose;
                let resource = Some(name.clone());
                self.audited(req, principal, operation, Some(*cluster_id), resource, result)
                    .await?;
                Ok(Reply::no_content())
            }

            Route::Audit => {
                require_admin(principal)?;
                let filter = AuditFilter::from_query(&req.query)?;
                let page = PageRequest::from_query(&req.query, &self.pagination)?;
                Reply::ok(&self.audit.query(&filter, &page).await?)
            }
        }
    }
}
