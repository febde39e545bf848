//! Common fixtures: a seeded repository, a primed discovery cache, and the
//! full router behind the OpenAPI pipeline.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use chrono::Utc;
use http::{Request, header};
use tower::ServiceExt;

use crate::jose::TokenIssuer;
use crate::middleware::openapi::{Pipeline, Schema, validate};
use crate::oauth2::oidc::Discovery;
use crate::oauth2::{AccessTokenClaims, Scope, encode_code_challenge_s256};
use crate::repository::{Repository, ResourceStore};
use crate::resources::{
    Group, Metadata, NAME_LABEL, OAuth2Client, OAuth2Provider, ORGANIZATION_LABEL, Organization,
    ProviderKind, Role, User,
};
use crate::router::create_router;
use crate::service::{IdentityService, IdentityServiceParams};

pub const NAMESPACE: &str = "default";
pub const HOST: &str = "id.broker.test";
pub const UPSTREAM_ISSUER: &str = "https://idp.example";
pub const CODE_VERIFIER: &str = "test-verifier";

pub struct TestContext {
    pub app: Router,
    pub service: IdentityService,
}

pub async fn setup() -> TestContext {
    let repository = Repository::new();
    seed(&repository).await;

    let issuer = Arc::new(TokenIssuer::generate().unwrap());

    let service = IdentityService::new(IdentityServiceParams {
        namespace: NAMESPACE.to_string(),
        repository,
        issuer,
    })
    .unwrap();

    service.discovery.prime(
        UPSTREAM_ISSUER,
        Discovery {
            issuer: UPSTREAM_ISSUER.to_string(),
            authorization_endpoint: format!("{UPSTREAM_ISSUER}/authorize"),
            token_endpoint: format!("{UPSTREAM_ISSUER}/token"),
            jwks_uri: format!("{UPSTREAM_ISSUER}/jwks"),
        },
    );

    let app = build_app(service.clone());

    TestContext { app, service }
}

pub fn build_app(service: IdentityService) -> Router {
    let (router, api) = create_router().split_for_parts();

    let document = serde_json::to_value(&api).unwrap();
    let schema = Arc::new(Schema::from_document(&document).unwrap());

    let pipeline = Pipeline {
        schema,
        authenticator: Arc::new(service.authenticator()),
    };

    router
        .layer(axum::middleware::from_fn_with_state(pipeline, validate))
        .with_state(service)
}

async fn seed(repository: &Repository) {
    repository
        .create(&OAuth2Client {
            metadata: Metadata::new(NAMESPACE, "acme-client").with_label(NAME_LABEL, "acme"),
            id: "acme".to_string(),
            redirect_uri: "https://acme.test/cb".to_string(),
        })
        .await
        .unwrap();

    repository
        .create(&OAuth2Provider {
            metadata: Metadata::new(NAMESPACE, "primary"),
            kind: ProviderKind::Null,
            issuer: UPSTREAM_ISSUER.to_string(),
            client_id: "broker-client".to_string(),
            client_secret: "s3cret".to_string(),
        })
        .await
        .unwrap();

    repository
        .create(&Organization {
            metadata: Metadata::new(NAMESPACE, "acme-org"),
            domain: "acme.test".to_string(),
            provider_name: "primary".to_string(),
            namespace: "org-acme".to_string(),
        })
        .await
        .unwrap();

    repository
        .create(&Role {
            metadata: Metadata::new(NAMESPACE, "role-reader"),
            permissions: vec!["projects:read".to_string()],
        })
        .await
        .unwrap();

    repository
        .create(&User {
            metadata: Metadata::new("org-acme", "user-1"),
            subject: "alice@acme.test".to_string(),
        })
        .await
        .unwrap();

    repository
        .create(&Group {
            metadata: Metadata::new("org-acme", "group-1")
                .with_label(NAME_LABEL, "readers")
                .with_label(ORGANIZATION_LABEL, "acme-org"),
            role_ids: vec!["role-reader".to_string()],
            user_ids: vec!["user-1".to_string()],
        })
        .await
        .unwrap();
}

/// The standard, valid authorization query. Later pairs override earlier
/// ones when parsed, so tests append their variations.
pub fn authorize_query(extra: &[(&str, &str)]) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("response_type", "code");
    query.append_pair("client_id", "acme");
    query.append_pair("redirect_uri", "https://acme.test/cb");
    query.append_pair("code_challenge", &encode_code_challenge_s256(CODE_VERIFIER));
    query.append_pair("code_challenge_method", "S256");
    query.append_pair("scope", "openid email");
    query.append_pair("state", "xyz");

    for (key, value) in extra {
        query.append_pair(key, value);
    }

    query.finish()
}

pub fn bearer_for(service: &IdentityService, subject: &str) -> String {
    let now = Utc::now().timestamp();

    let claims = AccessTokenClaims {
        iss: format!("https://{HOST}"),
        sub: subject.to_string(),
        org: "acme-org".to_string(),
        scope: Scope::parse("openid"),
        iat: now,
        exp: now + 3600,
    };

    format!("Bearer {}", service.issuer.sign_jwt(&claims).unwrap())
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::HOST, HOST)
        .body(Body::empty())
        .unwrap()
}

pub fn form_post(uri: &str, form: &[(&str, &str)]) -> Request<Body> {
    let mut body = url::form_urlencoded::Serializer::new(String::new());

    for (key, value) in form {
        body.append_pair(key, value);
    }

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::HOST, HOST)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.finish()))
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> http::Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_string(response: http::Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn location(response: &http::Response<Body>) -> url::Url {
    let value = response
        .headers()
        .get(header::LOCATION)
        .expect("response has no Location header")
        .to_str()
        .unwrap();

    url::Url::parse(value).unwrap()
}
