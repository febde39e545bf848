//! Protected API routes. These sit behind the OpenAPI pipeline, which
//! authenticates the bearer token and injects the principal and ACL into the
//! request scope before the handlers run.

use axum::{Extension, Json};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::middleware::authorization::Info;
use crate::oauth2::TokenError;
use crate::rbac::Acl;
use crate::service::IdentityService;

pub fn create_api_routes() -> OpenApiRouter<IdentityService> {
    OpenApiRouter::new()
        .routes(routes!(route_whoami))
        .routes(routes!(route_organization_acl))
}

/// The authenticated principal, straight from the request scope.
#[utoipa::path(
    get,
    path = "/api/v1/whoami",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The authenticated principal", body = Info),
        (status = 401, description = "Authentication failed", body = TokenError),
    ),
)]
async fn route_whoami(Extension(info): Extension<Info>) -> Json<Info> {
    Json(info)
}

/// The caller's effective permissions within an organization.
#[utoipa::path(
    get,
    path = "/api/v1/organizations/{organizationID}/acl",
    security(("bearer" = [])),
    params(
        ("organizationID" = String, Path, description = "Organization the ACL is scoped to"),
    ),
    responses(
        (status = 200, description = "Effective permission set", body = Acl),
        (status = 401, description = "Authentication failed", body = TokenError),
        (status = 500, description = "ACL resolution failed", body = TokenError),
    ),
)]
async fn route_organization_acl(Extension(acl): Extension<Acl>) -> Json<Acl> {
    Json(acl)
}
