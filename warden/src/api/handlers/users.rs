use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;
use warden_core::model::{Action, Role, RoleId, UserId};

use crate::api::basic_auth::CurrentUser;
use crate::api::error::AppError;
use crate::api::extract::{ApiJson, ApiPath};
use crate::app_state::SharedAppState;

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignUserRequest {
    pub user_id: i64,
    /// Complete desired role set; an empty list removes every role.
    #[serde(default)]
    pub roles: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema, utoipa::ToResponse)]
pub struct AssignUserResponse {
    pub status: u16,
    pub added: Vec<i64>,
    pub removed: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema, utoipa::ToResponse)]
pub struct UserPermissionsResponse {
    /// `"<service>.<read|write|manage>"` to allowed.
    pub matrix: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema, utoipa::ToResponse)]
pub struct UserRolesResponse {
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema, utoipa::ToResponse)]
pub struct AuthorizeResponse {
    pub allowed: bool,
}

#[utoipa::path(
    post,
    path = "/api/v1/user/assign",
    request_body = AssignUserRequest,
    responses(
        (status = 201, response = inline(AssignUserResponse)),
        (status = 400, description = "Malformed user or role id"),
        (status = 401, description = "Access token is missing or invalid"),
        (status = 404, description = "User or role not found"),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn assign_user_handler(
    State(state): State<SharedAppState>,
    Extension(user): Extension<CurrentUser>,
    ApiJson(request): ApiJson<AssignUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    info!(
        "Assigning roles {:?} to user {} on behalf of {}",
        request.roles, request.user_id, user.identifier
    );

    let roles: Vec<RoleId> = request.roles.iter().copied().map(RoleId).collect();
    let outcome = state
        .authz
        .assign_user(&state.request_context(), UserId(request.user_id), &roles)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AssignUserResponse {
            status: StatusCode::CREATED.as_u16(),
            added: outcome.added.iter().map(|id| id.get()).collect(),
            removed: outcome.removed.iter().map(|id| id.get()).collect(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/user/{id}/permissions",
    params(
        ("id" = i64, Path, description = "User id")
    ),
    responses(
        (status = 200, response = inline(UserPermissionsResponse)),
        (status = 401, description = "Access token is missing or invalid"),
        (status = 404, description = "User not found"),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn user_permissions_handler(
    State(state): State<SharedAppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let matrix = state
        .authz
        .get_user_permissions(&state.request_context(), UserId(id))
        .await?;

    Ok(Json(UserPermissionsResponse {
        matrix: matrix.into_inner(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/user/{id}/authorize/{service}/{action}",
    params(
        ("id" = i64, Path, description = "User id"),
        ("service" = String, Path, description = "Service name, case-insensitive"),
        ("action" = String, Path, description = "One of read, write, manage"),
    ),
    responses(
        (status = 200, response = inline(AuthorizeResponse)),
        (status = 400, description = "Unknown action"),
        (status = 401, description = "Access token is missing or invalid"),
        (status = 404, description = "User not found"),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn authorize_handler(
    State(state): State<SharedAppState>,
    ApiPath((id, service, action)): ApiPath<(i64, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let action = Action::parse(&action)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown action '{}'", action)))?;

    let allowed = state
        .authz
        .authorize(&state.request_context(), UserId(id), &service, action)
        .await?;

    Ok(Json(AuthorizeResponse { allowed }))
}

#[utoipa::path(
    get,
    path = "/api/v1/user/{id}/roles",
    params(
        ("id" = i64, Path, description = "User id")
    ),
    responses(
        (status = 200, response = inline(UserRolesResponse)),
        (status = 400, description = "Malformed user id"),
        (status = 401, description = "Access token is missing or invalid"),
        (status = 404, description = "User not found"),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn user_roles_handler(
    State(state): State<SharedAppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let roles = state
        .authz
        .get_user_roles(&state.request_context(), UserId(id))
        .await?;
    Ok(Json(UserRolesResponse { roles }))
}
