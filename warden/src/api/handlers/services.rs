use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use warden_core::model::{EnrichedGrant, GrantFlags, PermissionGrant, RoleId, Service, ServiceId};

use crate::api::basic_auth::CurrentUser;
use crate::api::error::AppError;
use crate::api::extract::{ApiJson, ApiPath};
use crate::app_state::SharedAppState;

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema, utoipa::ToResponse)]
pub struct ServicesListResponse {
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateServicePermissionsRequest {
    pub role_id: i64,
    pub service_id: i64,
    #[serde(default)]
    pub can_read: bool,
    #[serde(default)]
    pub can_write: bool,
    #[serde(default)]
    pub can_manage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PermissionInfo {
    pub id: i64,
    pub role_id: i64,
    pub service_id: i64,
    pub can_read: bool,
    pub can_write: bool,
    pub can_manage: bool,
}

impl From<PermissionGrant> for PermissionInfo {
    fn from(grant: PermissionGrant) -> Self {
        Self {
            id: grant.id.get(),
            role_id: grant.role_id.get(),
            service_id: grant.service_id.get(),
            can_read: grant.flags.can_read,
            can_write: grant.flags.can_write,
            can_manage: grant.flags.can_manage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema, utoipa::ToResponse)]
pub struct CreateServicePermissionsResponse {
    pub status: u16,
    pub permission: PermissionInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema, utoipa::ToResponse)]
pub struct ServicePermissionsResponse {
    pub permissions: Vec<EnrichedGrant>,
}

#[utoipa::path(
    get,
    path = "/api/v1/services",
    responses(
        (status = 200, response = inline(ServicesListResponse)),
        (status = 401, description = "Access token is missing or invalid"),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn list_services_handler(
    State(state): State<SharedAppState>,
) -> Result<impl IntoResponse, AppError> {
    let services = state.authz.get_services(&state.request_context()).await?;
    Ok(Json(ServicesListResponse { services }))
}

#[utoipa::path(
    post,
    path = "/api/v1/service/permissions",
    request_body = CreateServicePermissionsRequest,
    responses(
        (status = 201, response = inline(CreateServicePermissionsResponse)),
        (status = 400, description = "Malformed role or service id"),
        (status = 401, description = "Access token is missing or invalid"),
        (status = 404, description = "Role or service not found"),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn create_service_permissions_handler(
    State(state): State<SharedAppState>,
    Extension(user): Extension<CurrentUser>,
    ApiJson(request): ApiJson<CreateServicePermissionsRequest>,
) -> Result<impl IntoResponse, AppError> {
    info!(
        "Setting grant of role {} on service {} for {}",
        request.role_id, request.service_id, user.identifier
    );

    let grant = state
        .authz
        .create_service_permissions(
            &state.request_context(),
            RoleId(request.role_id),
            ServiceId(request.service_id),
            GrantFlags::new(request.can_read, request.can_write, request.can_manage),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateServicePermissionsResponse {
            status: StatusCode::CREATED.as_u16(),
            permission: grant.into(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/service/{service_id}/permissions",
    params(
        ("service_id" = i64, Path, description = "Service id")
    ),
    responses(
        (status = 200, response = inline(ServicePermissionsResponse)),
        (status = 401, description = "Access token is missing or invalid"),
        (status = 404, description = "Service not found"),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn service_permissions_handler(
    State(state): State<SharedAppState>,
    ApiPath(service_id): ApiPath<i64>,
) -> Result<impl IntoResponse, AppError> {
    let permissions = state
        .authz
        .get_service_permissions(&state.request_context(), ServiceId(service_id))
        .await?;
    Ok(Json(ServicePermissionsResponse { permissions }))
}
