//! Gateway user and cluster administration.

use crate::auth::{hash_password, verify_password};
use crate::error::ApiError;

pub mod bootstrap;
pub mod clusters;
pub mod users;

pub use bootstrap::bootstrap;
pub use clusters::ClusterService;
pub use users::UserService;

/// Argon2 is CPU-bound; keep it off the async workers
pub(crate) async fn hash_blocking(password: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::internal(format!("hashing task failed: {}", e)))?
        .map_err(|e| ApiError::internal(e.to_string()))
}

pub(crate) async fn verify_blocking(password: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError::internal(format!("verification task failed: {}", e)))?
        .map_err(|e| ApiError::internal(e.to_string()))
}
