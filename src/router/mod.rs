//! Maps `(method, path)` to a [`Route`].
//!
//! The path is split on `/` first and each segment percent-decoded after, so
//! `%2F` (the default vhost) stays inside its segment. The passthrough tail is
//! kept in its raw, still-encoded form.

use http::Method;

use crate::error::ApiError;
use crate::model::{ClusterId, UserId};
use crate::rabbitmq::ResourceKind;

/// Path prefix of the raw Management API passthrough
pub const PASSTHROUGH_SEGMENT: &str = "proxy";

/// Queue or exchange addressed by vhost and name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub cluster_id: ClusterId,
    pub vhost: String,
    pub name: String,
}

impl ObjectRef {
    /// `vhost/name`, as stored in audit records
    pub fn resource(&self) -> String {
        format!("{}/{}", self.vhost, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    Ready,
    Metrics,

    Me,
    ChangeOwnPassword,

    ListUsers,
    CreateUser,
    GetUser(UserId),
    UpdateUser(UserId),
    DeleteUser(UserId),

    ListClusters,
    CreateCluster,
    GetCluster(ClusterId),
    UpdateCluster(ClusterId),
    DeleteCluster(ClusterId),
    TestCluster(ClusterId),
    ClusterUsers(ClusterId),
    AssignUser(ClusterId, UserId),
    UnassignUser(ClusterId, UserId),

    Overview(ClusterId),
    ClusterMetrics(ClusterId),
    ListResources(ClusterId, ResourceKind),

    GetQueue(ObjectRef),
    CreateQueue(ObjectRef),
    DeleteQueue(ObjectRef),
    PurgeQueue(ObjectRef),
    GetMessages(ObjectRef),

    GetExchange(ObjectRef),
    CreateExchange(ObjectRef),
    DeleteExchange(ObjectRef),
    Publish(ObjectRef),

    CreateBinding {
        cluster_id: ClusterId,
        vhost: String,
        source: String,
        destination: String,
    },
    CloseConnection {
        cluster_id: ClusterId,
        name: String,
    },

    /// Raw Management API call; `path` is relative to `/api` and still encoded
    Passthrough {
        cluster_id: ClusterId,
        path: String,
    },

    Audit,
}

impl Route {
    /// Public routes skip authentication
    pub fn is_public(&self) -> bool {
        matches!(self, Route::Health | Route::Ready | Route::Metrics)
    }

    /// Cluster the route targets, if any
    pub fn cluster_id(&self) -> Option<ClusterId> {
        match self {
            Route::GetCluster(id)
            | Route::UpdateCluster(id)
            | Route::DeleteCluster(id)
            | Route::TestCluster(id)
            | Route::ClusterUsers(id)
            | Route::AssignUser(id, _)
            | Route::UnassignUser(id, _)
            | Route::Overview(id)
            | Route::ClusterMetrics(id)
            | Route::ListResources(id, _) => Some(*id),
            Route::GetQueue(o)
            | Route::CreateQueue(o)
            | Route::DeleteQueue(o)
            | Route::PurgeQueue(o)
            | Route::GetMessages(o)
            | Route::GetExchange(o)
            | Route::CreateExchange(o)
            | Route::DeleteExchange(o)
            | Route::Publish(o) => Some(o.cluster_id),
            Route::CreateBinding { cluster_id, .. }
            | Route::CloseConnection { cluster_id, .. }
            | Route::Passthrough { cluster_id, .. } => Some(*cluster_id),
            _ => None,
        }
    }

    /// Short name used as a log field
    pub fn name(&self) -> &'static str {
        match self {
            Route::Health => "health",
            Route::Ready => "ready",
            Route::Metrics => "metrics",
            Route::Me => "me",
            Route::ChangeOwnPassword => "change_own_password",
            Route::ListUsers => "list_users",
            Route::CreateUser => "create_user",
            Route::GetUser(_) => "get_user",
            Route::UpdateUser(_) => "update_user",
            Route::DeleteUser(_) => "delete_user",
            Route::ListClusters => "list_clusters",
            Route::CreateCluster => "create_cluster",
            Route::GetCluster(_) => "get_cluster",
            Route::UpdateCluster(_) => "update_cluster",
            Route::DeleteCluster(_) => "delete_cluster",
            Route::TestCluster(_) => "test_cluster",
            Route::ClusterUsers(_) => "cluster_users",
            Route::AssignUser(..) => "assign_user",
            Route::UnassignUser(..) => "unassign_user",
            Route::Overview(_) => "overview",
            Route::ClusterMetrics(_) => "cluster_metrics",
            Route::ListResources(..) => "list_resources",
            Route::GetQueue(_) => "get_queue",
            Route::CreateQueue(_) => "create_queue",
            Route::DeleteQueue(_) => "delete_queue",
            Route::PurgeQueue(_) => "purge_queue",
            Route::GetMessages(_) => "get_messages",
            Route::GetExchange(_) => "get_exchange",
            Route::CreateExchange(_) => "create_exchange",
            Route::DeleteExchange(_) => "delete_exchange",
            Route::Publish(_) => "publish",
            Route::CreateBinding { .. } => "create_binding",
            Route::CloseConnection { .. } => "close_connection",
            Route::Passthrough { .. } => "passthrough",
            Route::Audit => "audit",
        }
    }
}

fn decode(segment: &str) -> Result<String, ApiError> {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|_| ApiError::bad_request("path segment is not valid UTF-8"))
}

fn parse_cluster_id(raw: &str) -> Result<ClusterId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("cluster '{}' not found", raw)))
}

fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("user '{}' not found", raw)))
}

/// Pick the route for `method` among those registered on a path.
/// A path with routes but none for `method` is a 405.
fn by_method(method: &Method, candidates: Vec<(Method, Route)>) -> Result<Route, ApiError> {
    candidates
        .into_iter()
        .find(|(m, _)| m == method)
        .map(|(_, route)| route)
        .ok_or(ApiError::MethodNotAllowed)
}

fn not_found(path: &str) -> ApiError {
    ApiError::not_found(format!("no route for {}", path))
}

/// Resolve a request path (without query string)
pub fn resolve(method: &Method, path: &str) -> Result<Route, ApiError> {
    let trimmed = path.trim_end_matches('/');
    let raw: Vec<&str> = if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.trim_start_matches('/').split('/').collect()
    };

    // The passthrough tail is forwarded verbatim
    if let ["api", "clusters", id, PASSTHROUGH_SEGMENT, tail @ ..] = raw.as_slice() {
        if tail.is_empty() {
            return Err(not_found(path));
        }
        return Ok(Route::Passthrough {
            cluster_id: parse_cluster_id(&decode(id)?)?,
            path: tail.join("/"),
        });
    }

    let segments = raw.iter().map(|s| decode(s)).collect::<Result<Vec<_>, _>>()?;
    let segs: Vec<&str> = segments.iter().map(String::as_str).collect();

    let get = Method::GET;
    let post = Method::POST;
    let put = Method::PUT;
    let delete = Method::DELETE;

    match segs.as_slice() {
        ["health"] => by_method(method, vec![(get, Route::Health)]),
        ["ready"] => by_method(method, vec![(get, Route::Ready)]),
        ["metrics"] => by_method(method, vec![(get, Route::Metrics)]),

        ["api", "me"] => by_method(method, vec![(get, Route::Me)]),
        ["api", "me", "password"] => by_method(method, vec![(put, Route::ChangeOwnPassword)]),

        ["api", "users"] => by_method(
            method,
            vec![(get, Route::ListUsers), (post, Route::CreateUser)],
        ),
        ["api", "users", id] => {
            // Method check first so a bad verb is a 405 even for unknown IDs
            if *method != get && *method != put && *method != delete {
                return Err(ApiError::MethodNotAllowed);
            }
            let id = parse_user_id(id)?;
            by_method(
                method,
                vec![
                    (get, Route::GetUser(id)),
                    (put, Route::UpdateUser(id)),
                    (delete, Route::DeleteUser(id)),
                ],
            )
        }

        ["api", "clusters"] => by_method(
            method,
            vec![(get, Route::ListClusters), (post, Route::CreateCluster)],
        ),
        ["api", "audit"] => by_method(method, vec![(get, Route::Audit)]),

        ["api", "clusters", id, rest @ ..] => {
            let cluster_id = parse_cluster_id(id)?;
            cluster_route(method, cluster_id, rest).ok_or_else(|| not_found(path))?
        }

        _ => Err(not_found(path)),
    }
}

/// Routes below `/api/clusters/{id}`. `None` means no route exists for the path.
fn cluster_route(
    method: &Method,
    cluster_id: ClusterId,
    rest: &[&str],
) -> Option<Result<Route, ApiError>> {
    let get = Method::GET;
    let post = Method::POST;
    let put = Method::PUT;
    let delete = Method::DELETE;
    let object = |vhost: &str, name: &str| ObjectRef {
        cluster_id,
        vhost: vhost.to_string(),
        name: name.to_string(),
    };

    let route = match rest {
        [] => by_method(
            method,
            vec![
                (get, Route::GetCluster(cluster_id)),
                (put, Route::UpdateCluster(cluster_id)),
                (delete, Route::DeleteCluster(cluster_id)),
            ],
        ),
        ["test"] => by_method(method, vec![(post, Route::TestCluster(cluster_id))]),
        ["users"] => by_method(method, vec![(get, Route::ClusterUsers(cluster_id))]),
        ["users", user] => {
            if *method != put && *method != delete {
                return Some(Err(ApiError::MethodNotAllowed));
            }
            let user_id = match parse_user_id(user) {
                Ok(id) => id,
                Err(e) => return Some(Err(e)),
            };
            by_method(
                method,
                vec![
                    (put, Route::AssignUser(cluster_id, user_id)),
                    (delete, Route::UnassignUser(cluster_id, user_id)),
                ],
            )
        }
        ["overview"] => by_method(method, vec![(get, Route::Overview(cluster_id))]),
        ["metrics"] => by_method(method, vec![(get, Route::ClusterMetrics(cluster_id))]),
        [kind] => {
            let kind = kind.parse::<ResourceKind>().ok()?;
            by_method(method, vec![(get, Route::ListResources(cluster_id, kind))])
        }

        ["queues", vhost, name] => by_method(
            method,
            vec![
                (get, Route::GetQueue(object(vhost, name))),
                (put, Route::CreateQueue(object(vhost, name))),
                (delete, Route::DeleteQueue(object(vhost, name))),
            ],
        ),
        ["queues", vhost, name, "contents"] => by_method(
            method,
            vec![(delete, Route::PurgeQueue(object(vhost, name)))],
        ),
        ["queues", vhost, name, "get"] => by_method(
            method,
            vec![(post, Route::GetMessages(object(vhost, name)))],
        ),

        ["exchanges", vhost, name] => by_method(
            method,
            vec![
                (get, Route::GetExchange(object(vhost, name))),
                (put, Route::CreateExchange(object(vhost, name))),
                (delete, Route::DeleteExchange(object(vhost, name))),
            ],
        ),
        ["exchanges", vhost, name, "publish"] => by_method(
            method,
            vec![(post, Route::Publish(object(vhost, name)))],
        ),

        ["bindings", vhost, "e", source, "q", destination] => by_method(
            method,
            vec![(
                post,
                Route::CreateBinding {
                    cluster_id,
                    vhost: vhost.to_string(),
                    source: source.to_string(),
                    destination: destination.to_string(),
                },
            )],
        ),

        ["connections", name] => by_method(
            method,
            vec![(
                delete,
                Route::CloseConnection {
                    cluster_id,
                    name: name.to_string(),
                },
            )],
        ),

        _ => return None,
    };
    Some(route)
}
