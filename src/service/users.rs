//! Gateway user management.
//!
//! Everything here is admin only except [`UserService::me`] and
//! [`UserService::change_own_password`].

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::{hash_blocking, verify_blocking};
use crate::access::require_admin;
use crate::auth::Principal;
use crate::config::PaginationConfig;
use crate::error::{AccessError, ApiError};
use crate::model::{validate_password, validate_username, Role, User, UserId, UserPatch, UserView};
use crate::pagination::{paginate, Page, PageRequest};
use crate::store::Store;

fn default_role() -> Role {
    Role::User
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(alias = "currentPassword")]
    pub current_password: String,
    #[serde(alias = "newPassword")]
    pub new_password: String,
}

pub struct UserService {
    store: Arc<dyn Store>,
    pagination: PaginationConfig,
}

impl UserService {
    pub fn new(store: Arc<dyn Store>, pagination: PaginationConfig) -> Self {
        Self { store, pagination }
    }

    /// Paginated, filterable by username
    pub async fn list(
        &self,
        principal: &Principal,
        query: &HashMap<String, String>,
    ) -> Result<Page<UserView>, ApiError> {
        require_admin(principal)?;
        let request = PageRequest::from_query(query, &self.pagination)?;
        let users = self.store.list_users().await?;
        Ok(paginate(users, &request, |u| Some(u.username.as_str()))?.map(|u| u.view()))
    }

    pub async fn get(&self, principal: &Principal, id: &UserId) -> Result<UserView, ApiError> {
        require_admin(principal)?;
        Ok(self.store.get_user(id).await?.view())
    }

    pub async fn create(
        &self,
        principal: &Principal,
        request: CreateUserRequest,
    ) -> Result<UserView, ApiError> {
        require_admin(principal)?;
        validate_username(&request.username).map_err(ApiError::Validation)?;
        validate_password(&request.password).map_err(ApiError::Validation)?;

        let hash = hash_blocking(request.password).await?;
        let user = self
            .store
            .create_user(User::new(request.username, request.role, hash))
            .await?;
        tracing::info!(
            username = %principal.username,
            created = %user.username,
            role = user.role.as_str(),
            "User created"
        );
        Ok(user.view())
    }

    /// An administrator cannot demote or disable themself
    pub async fn update(
        &self,
        principal: &Principal,
        id: &UserId,
        request: UpdateUserRequest,
    ) -> Result<UserView, ApiError> {
        require_admin(principal)?;
        if *id == principal.user_id {
            if request.role.is_some_and(|r| r != Role::Admin) {
                return Err(ApiError::validation("administrators cannot demote themselves"));
            }
            if request.enabled == Some(false) {
                return Err(ApiError::validation("administrators cannot disable themselves"));
            }
        }

        let password_hash = match request.password {
            Some(password) => {
                validate_password(&password).map_err(ApiError::Validation)?;
                Some(hash_blocking(password).await?)
            }
            None => None,
        };
        let patch = UserPatch {
            role: request.role,
            enabled: request.enabled,
            password_hash,
        };
        if patch.is_empty() {
            return Err(ApiError::validation("no fields to update"));
        }

        Ok(self.store.update_user(id, patch).await?.view())
    }

    pub async fn delete(&self, principal: &Principal, id: &UserId) -> Result<(), ApiError> {
        require_admin(principal)?;
        if *id == principal.user_id {
            return Err(ApiError::validation("administrators cannot delete themselves"));
        }
        self.store.delete_user(id).await?;
        Ok(())
    }

    pub async fn me(&self, principal: &Principal) -> Result<UserView, ApiError> {
        match self.store.get_user(&principal.user_id).await {
            Ok(user) => Ok(user.view()),
            // Deleted between authentication and now
            Err(crate::store::StoreError::NotFound(_)) => Err(AccessError::Unauthenticated.into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Requires the current password even for administrators
    pub async fn change_own_password(
        &self,
        principal: &Principal,
        request: ChangePasswordRequest,
    ) -> Result<(), ApiError> {
        validate_password(&request.new_password).map_err(ApiError::Validation)?;
        let user = self.store.get_user(&principal.user_id).await?;

        if !verify_blocking(request.current_password, user.password_hash).await? {
            return Err(ApiError::validation("current password is incorrect"));
        }

        let patch = UserPatch {
            password_hash: Some(hash_blocking(request.new_password).await?),
            ..Default::default()
        };
        self.store.update_user(&principal.user_id, patch).await?;
        Ok(())
    }
}
