use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use warden_core::model::Role;

use crate::api::basic_auth::CurrentUser;
use crate::api::error::AppError;
use crate::api::extract::ApiJson;
use crate::app_state::SharedAppState;

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema, utoipa::ToResponse)]
pub struct RolesListResponse {
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CreateRoleRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema, utoipa::ToResponse)]
pub struct CreateRoleResponse {
    pub status: u16,
    pub role: Role,
}

#[utoipa::path(
    get,
    path = "/api/v1/roles",
    responses(
        (status = 200, response = inline(RolesListResponse)),
        (status = 401, description = "Access token is missing or invalid"),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn list_roles_handler(
    State(state): State<SharedAppState>,
) -> Result<impl IntoResponse, AppError> {
    let roles = state.authz.get_roles(&state.request_context()).await?;
    Ok(Json(RolesListResponse { roles }))
}

#[utoipa::path(
    post,
    path = "/api/v1/role",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, response = inline(CreateRoleResponse)),
        (status = 400, description = "Role name is empty"),
        (status = 401, description = "Access token is missing or invalid"),
        (status = 409, description = "Role already exists"),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn create_role_handler(
    State(state): State<SharedAppState>,
    Extension(user): Extension<CurrentUser>,
    ApiJson(request): ApiJson<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    info!("Creating role '{}' for {}", request.name, user.identifier);

    let role = state
        .authz
        .create_role(&state.request_context(), &request.name)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateRoleResponse {
            status: StatusCode::CREATED.as_u16(),
            role,
        }),
    ))
}
