//! The authorization-server HTTP surface: `/authorize`, `/login`,
//! `/oidc/callback` and `/token`.

use axum::Form;
use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use http::{HeaderMap, StatusCode, Uri, header};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::oauth2::{
    AuthorizeError, AuthorizeRequest, CallbackRequest, TokenError, TokenRequest, TokenResponse,
    oidc_callback, provider_authentication_request, token, validate_non_redirecting,
    validate_redirecting,
};
use crate::service::IdentityService;

pub fn create_oauth_routes() -> OpenApiRouter<IdentityService> {
    OpenApiRouter::new()
        .routes(routes!(route_authorize))
        .routes(routes!(route_login))
        .routes(routes!(route_oidc_callback))
        .routes(routes!(route_token))
}

/// Host the request arrived on. The front proxy rewrites to relative URLs,
/// so the Host header is authoritative.
fn request_host(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string()
}

/// 302 with a Location header. The OAuth2 redirects are specified as Found,
/// not See Other.
fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

/// Raise an error outside the usual OAuth2 flow, for when no trustworthy
/// redirect URI exists.
fn html_error(service: &IdentityService, status: StatusCode, description: &str) -> Response {
    match service.templates.render_error(description) {
        Ok(body) => (status, Html(body)).into_response(),
        Err(e) => {
            tracing::error!("failed to render error template: {e:#}");
            status.into_response()
        }
    }
}

fn authorize_error_response(service: &IdentityService, error: AuthorizeError) -> Response {
    match error {
        AuthorizeError::Page {
            status,
            description,
        } => html_error(service, status, &description),
        AuthorizeError::Redirect {
            redirect_uri,
            error,
            description,
        } => {
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            query.append_pair("error", &error);
            query.append_pair("description", &description);

            found(&format!("{redirect_uri}?{}", query.finish()))
        }
    }
}

/// Entry point of the authorization-code flow. Either bounces the user
/// straight to their provider (`login_hint`) or asks for an email first.
#[utoipa::path(
    get,
    path = "/authorize",
    params(AuthorizeRequest),
    responses(
        (status = 302, description = "Redirect to the upstream provider, or back to the client with an error query"),
        (status = 200, description = "HTML login page", content_type = "text/html"),
        (status = 400, description = "HTML error page, used while the redirect URI is untrusted", content_type = "text/html"),
        (status = 500, description = "HTML error page", content_type = "text/html"),
    ),
)]
async fn route_authorize(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let raw = uri.query().unwrap_or_default().to_string();
    let request = AuthorizeRequest::from_query(&raw);

    if let Err(e) =
        validate_non_redirecting(&service.repository, &service.namespace, &request).await
    {
        return authorize_error_response(&service, e);
    }

    if let Err(e) = validate_redirecting(&request) {
        return authorize_error_response(&service, e);
    }

    let host = request_host(&headers);

    // A login_hint short-cuts the user interaction, so a client catching a
    // 401 can bounce straight back through here with the cached email.
    if let Some(email) = request.login_hint.clone() {
        let ctx = service.flow_context(&host);

        return match provider_authentication_request(&ctx, &email, &request).await {
            Ok(url) => found(&url),
            Err(e) => authorize_error_response(&service, e),
        };
    }

    match service.templates.render_login(&raw) {
        Ok(body) => Html(body).into_response(),
        Err(e) => {
            tracing::error!("failed to render login template: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
struct LoginForm {
    /// Email address entered by the user.
    email: Option<String>,
    /// The original authorization query, replayed verbatim.
    query: Option<String>,
}

/// Handles the login form posting back the user's email.
#[utoipa::path(
    post,
    path = "/login",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 302, description = "Redirect to the upstream provider"),
        (status = 400, description = "HTML error page", content_type = "text/html"),
        (status = 500, description = "HTML error page", content_type = "text/html"),
    ),
)]
async fn route_login(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let Some(email) = form.email.filter(|email| !email.is_empty()) else {
        return html_error(&service, StatusCode::BAD_REQUEST, "email is not specified");
    };

    let Some(query) = form.query else {
        return html_error(&service, StatusCode::BAD_REQUEST, "query is not specified");
    };

    let request = AuthorizeRequest::from_query(&query);
    let host = request_host(&headers);
    let ctx = service.flow_context(&host);

    match provider_authentication_request(&ctx, &email, &request).await {
        Ok(url) => found(&url),
        Err(e) => authorize_error_response(&service, e),
    }
}

/// Return leg of the upstream flow. As far as the client is concerned we are
/// still doing the code grant, so errors flow back via the redirect query.
#[utoipa::path(
    get,
    path = "/oidc/callback",
    params(CallbackRequest),
    responses(
        (status = 302, description = "Redirect to the downstream client with a code, or with an error query"),
        (status = 400, description = "HTML error page, when the sealed state is unavailable", content_type = "text/html"),
    ),
)]
async fn route_oidc_callback(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Query(query): Query<CallbackRequest>,
) -> Response {
    let host = request_host(&headers);
    let ctx = service.flow_context(&host);

    match oidc_callback(&ctx, &query).await {
        Ok(url) => found(&url),
        Err(e) => authorize_error_response(&service, e),
    }
}

/// Exchange an authorization code for an access token and, with `openid` in
/// scope, an id_token.
#[utoipa::path(
    post,
    path = "/token",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Issued tokens", body = TokenResponse),
        (status = 400, description = "Protocol error", body = TokenError),
        (status = 500, description = "Internal error", body = TokenError),
    ),
)]
async fn route_token(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Form(form): Form<TokenRequest>,
) -> Response {
    let host = request_host(&headers);

    match token(&service.issuer, &host, &form) {
        Ok(response) => Json(response).into_response(),
        Err(e) => (e.status(), Json(e)).into_response(),
    }
}
