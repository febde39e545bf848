//! Pipeline behavior that needs a handler on the far side: proving the
//! handler is never reached when validation or authentication fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::body::Body;
use axum::routing::get;
use http::{Request, StatusCode, header};
use serde_json::json;

use crate::middleware::openapi::{Pipeline, Schema, validate};
use crate::test::fixtures::{bearer_for, body_string, send, setup};

fn guarded_app(
    document: serde_json::Value,
    service: &crate::service::IdentityService,
    hit: Arc<AtomicBool>,
) -> axum::Router {
    let schema = Arc::new(Schema::from_document(&document).unwrap());

    let pipeline = Pipeline {
        schema,
        authenticator: Arc::new(service.authenticator()),
    };

    let get_hit = hit.clone();
    let post_hit = hit;

    axum::Router::new()
        .route(
            "/guarded",
            get(move || {
                let hit = get_hit.clone();
                async move {
                    hit.store(true, Ordering::SeqCst);
                    "ok"
                }
            })
            .post(move || {
                let hit = post_hit.clone();
                async move {
                    hit.store(true, Ordering::SeqCst);
                    "ok"
                }
            }),
        )
        .layer(axum::middleware::from_fn_with_state(pipeline, validate))
}

fn protected_document() -> serde_json::Value {
    json!({
        "paths": {
            "/guarded": {
                "get": {
                    "security": [ { "bearer": [] } ],
                    "responses": { "200": {} },
                },
                "post": {
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": {
                                    "type": "object",
                                    "required": ["name"],
                                    "properties": { "name": { "type": "string" } },
                                },
                            },
                        },
                    },
                    "responses": { "200": {} },
                },
            },
        },
    })
}

#[tokio::test]
async fn handler_is_never_invoked_without_credentials() {
    let ctx = setup().await;
    let hit = Arc::new(AtomicBool::new(false));

    let app = guarded_app(protected_document(), &ctx.service, hit.clone());

    let response = send(&app, Request::builder().uri("/guarded").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(!hit.load(Ordering::SeqCst));

    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"], "access_denied");
}

#[tokio::test]
async fn handler_is_never_invoked_with_a_garbled_token() {
    let ctx = setup().await;
    let hit = Arc::new(AtomicBool::new(false));

    let app = guarded_app(protected_document(), &ctx.service, hit.clone());

    let request = Request::builder()
        .uri("/guarded")
        .header(header::AUTHORIZATION, "Bearer not-a-token")
        .body(Body::empty())
        .unwrap();

    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(!hit.load(Ordering::SeqCst));
}

#[tokio::test]
async fn handler_runs_with_a_valid_token() {
    let ctx = setup().await;
    let hit = Arc::new(AtomicBool::new(false));

    let app = guarded_app(protected_document(), &ctx.service, hit.clone());

    let request = Request::builder()
        .uri("/guarded")
        .header(
            header::AUTHORIZATION,
            bearer_for(&ctx.service, "alice@acme.test"),
        )
        .body(Body::empty())
        .unwrap();

    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(hit.load(Ordering::SeqCst));
}

#[tokio::test]
async fn schema_violating_bodies_never_reach_the_handler() {
    let ctx = setup().await;
    let hit = Arc::new(AtomicBool::new(false));

    let app = guarded_app(protected_document(), &ctx.service, hit.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/guarded")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name": 42}"#))
        .unwrap();

    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!hit.load(Ordering::SeqCst));

    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn conforming_bodies_pass_through_unaltered() {
    let ctx = setup().await;
    let hit = Arc::new(AtomicBool::new(false));

    let app = guarded_app(protected_document(), &ctx.service, hit.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/guarded")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name": "sprocket"}"#))
        .unwrap();

    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(hit.load(Ordering::SeqCst));
    assert_eq!(body_string(response).await, "ok");
}
