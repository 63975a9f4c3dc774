use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use utoipa::openapi::security::SecurityScheme;
use utoipa::Modify;
use utoipa::OpenApi;
use warden_core::model::{EnrichedGrant, GrantFlags, Role, Service};

use crate::api::handlers::health::__path_health_checker_handler;
use crate::api::handlers::roles::{__path_create_role_handler, __path_list_roles_handler};
use crate::api::handlers::services::{
    __path_create_service_permissions_handler, __path_list_services_handler,
    __path_service_permissions_handler,
};
use crate::api::handlers::users::{
    __path_assign_user_handler, __path_authorize_handler, __path_user_permissions_handler,
    __path_user_roles_handler,
};
use crate::app_state::SharedAppState;

use super::basic_auth::auth;
use super::handlers::health::health_checker_handler;
use super::handlers::roles::{create_role_handler, list_roles_handler, CreateRoleRequest};
use super::handlers::services::{
    create_service_permissions_handler, list_services_handler, service_permissions_handler,
    CreateServicePermissionsRequest, PermissionInfo,
};
use super::handlers::users::{
    assign_user_handler, authorize_handler, user_permissions_handler, user_roles_handler,
    AssignUserRequest,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_checker_handler,
        assign_user_handler,
        user_permissions_handler,
        user_roles_handler,
        authorize_handler,
        create_role_handler,
        list_roles_handler,
        list_services_handler,
        create_service_permissions_handler,
        service_permissions_handler,
    ),
    components(
        schemas(
            Role, Service, GrantFlags, EnrichedGrant, PermissionInfo,
            AssignUserRequest, CreateRoleRequest, CreateServicePermissionsRequest
        )
    ),
    tags(
        (name = "warden", description = "warden RBAC grant api")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(utoipa::openapi::security::Http::new(
                utoipa::openapi::security::HttpAuthScheme::Bearer,
            )),
        )
    }
}

pub struct ApiRoutes;

impl ApiRoutes {
    pub fn create(state: SharedAppState) -> Router {
        let api = ApiDoc::openapi();

        let authenticated_router = Router::new()
            .route("/api/v1/user/assign", post(assign_user_handler))
            .route("/api/v1/user/{id}/permissions", get(user_permissions_handler))
            .route("/api/v1/user/{id}/roles", get(user_roles_handler))
            .route(
                "/api/v1/user/{id}/authorize/{service}/{action}",
                get(authorize_handler),
            )
            .route("/api/v1/role", post(create_role_handler))
            .route("/api/v1/roles", get(list_roles_handler))
            .route("/api/v1/services", get(list_services_handler))
            .route(
                "/api/v1/service/permissions",
                post(create_service_permissions_handler),
            )
            .route(
                "/api/v1/service/{service_id}/permissions",
                get(service_permissions_handler),
            )
            .route_layer(middleware::from_fn_with_state(state.clone(), auth));

        let public_router = Router::new()
            .route("/api/v1/health", get(health_checker_handler))
            .route(
                "/api-docs/openapi.json",
                get(move || async move { Json(api) }),
            );

        Router::new()
            .merge(authenticated_router)
            .merge(public_router)
            .with_state(state)
    }
}
