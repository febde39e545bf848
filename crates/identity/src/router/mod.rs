mod api;
mod oauth;

use utoipa::{Modify, OpenApi};
use utoipa_axum::router::OpenApiRouter;

use crate::service::IdentityService;

#[derive(OpenApi)]
#[openapi(
    info(title = "identity", description = "Federated identity broker"),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// All served routes, paired with the OpenAPI document the request pipeline
/// validates against. Split with `split_for_parts` at startup.
pub fn create_router() -> OpenApiRouter<IdentityService> {
    OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(oauth::create_oauth_routes())
        .merge(api::create_api_routes())
}
