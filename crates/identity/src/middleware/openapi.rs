//! The OpenAPI-validating request pipeline.
//!
//! Every request passes through here: route lookup against the loaded
//! document, client-certificate propagation, request validation (including
//! schema-declared security, which triggers the authenticator), ACL
//! resolution, request-scope injection, then validation of the captured
//! response as a logged-only regression signal.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::{Method, StatusCode, header};
use jsonschema::JSONSchema;
use serde_json::{Value, json};
use shared::error::CommonError;

use crate::middleware::authorization::{
    Authenticator, AuthenticationInput, extract_certificate_fingerprint,
};
use crate::oauth2::{ProtocolError, TokenError};

/// Requests larger than this are rejected before schema validation.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// The organization path parameter is standardized across every route.
const ORGANIZATION_PARAMETER: &str = "organizationID";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Parameter(String),
}

fn parse_template(path: &str) -> Vec<Segment> {
    path.trim_matches('/')
        .split('/')
        .map(|segment| {
            segment
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .map(|name| Segment::Parameter(name.to_string()))
                .unwrap_or_else(|| Segment::Literal(segment.to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParameterLocation {
    Query,
    Header,
    Path,
}

struct ParameterSpec {
    name: String,
    location: ParameterLocation,
}

struct BodySpec {
    required: bool,
    /// Compiled schema for `application/json` bodies; other media types are
    /// left to the handlers.
    schema: Option<JSONSchema>,
}

pub struct Operation {
    security_required: bool,
    required_parameters: Vec<ParameterSpec>,
    request_body: Option<BodySpec>,
    responses: BTreeMap<String, Option<JSONSchema>>,
}

struct RouteEntry {
    method: Method,
    segments: Vec<Segment>,
    operation: Operation,
}

/// The loaded OpenAPI document, digested into a route table with compiled
/// body schemas. Immutable after startup.
pub struct Schema {
    routes: Vec<RouteEntry>,
}

const METHODS: &[&str] = &[
    "get", "put", "post", "delete", "patch", "head", "options", "trace",
];

impl Schema {
    pub fn from_document(document: &Value) -> Result<Self, CommonError> {
        let components = document.get("components").cloned().unwrap_or_else(|| json!({}));

        let mut routes = Vec::new();

        let Some(paths) = document.get("paths").and_then(Value::as_object) else {
            return Ok(Self { routes });
        };

        for (path, item) in paths {
            let Some(item) = item.as_object() else {
                continue;
            };

            let shared_parameters = item.get("parameters");

            for (key, operation) in item {
                if !METHODS.contains(&key.as_str()) {
                    continue;
                }

                let method = Method::from_bytes(key.to_uppercase().as_bytes())
                    .map_err(|e| CommonError::Unknown(anyhow::anyhow!("bad method {key}: {e}")))?;

                routes.push(RouteEntry {
                    method,
                    segments: parse_template(path),
                    operation: parse_operation(operation, shared_parameters, &components)?,
                });
            }
        }

        Ok(Self { routes })
    }

    /// Match a request against the route table, capturing path parameters.
    pub fn find_route(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(&Operation, HashMap<String, String>)> {
        let request_segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        'routes: for route in &self.routes {
            if route.method != *method || route.segments.len() != request_segments.len() {
                continue;
            }

            let mut params = HashMap::new();

            for (segment, value) in route.segments.iter().zip(request_segments.iter().copied()) {
                match segment {
                    Segment::Literal(literal) => {
                        if literal.as_str() != value {
                            continue 'routes;
                        }
                    }
                    Segment::Parameter(name) => {
                        let decoded = urlencoding::decode(value)
                            .map(|v| v.into_owned())
                            .unwrap_or_else(|_| value.to_string());

                        params.insert(name.clone(), decoded);
                    }
                }
            }

            return Some((&route.operation, params));
        }

        None
    }
}

fn parse_operation(
    operation: &Value,
    shared_parameters: Option<&Value>,
    components: &Value,
) -> Result<Operation, CommonError> {
    let security_required = operation
        .get("security")
        .and_then(Value::as_array)
        .is_some_and(|requirements| {
            requirements
                .iter()
                .any(|r| r.as_object().is_some_and(|o| !o.is_empty()))
        });

    let mut required_parameters = Vec::new();

    let parameter_lists = shared_parameters
        .into_iter()
        .chain(operation.get("parameters"));

    for list in parameter_lists {
        let Some(list) = list.as_array() else {
            continue;
        };

        for parameter in list {
            let Some(name) = parameter.get("name").and_then(Value::as_str) else {
                continue;
            };

            let location = match parameter.get("in").and_then(Value::as_str) {
                Some("query") => ParameterLocation::Query,
                Some("header") => ParameterLocation::Header,
                Some("path") => ParameterLocation::Path,
                _ => continue,
            };

            // Path parameters are implicitly required by the template match.
            let required = location == ParameterLocation::Path
                || parameter
                    .get("required")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);

            if required {
                required_parameters.push(ParameterSpec {
                    name: name.to_string(),
                    location,
                });
            }
        }
    }

    let request_body = operation
        .get("requestBody")
        .map(|body| -> Result<BodySpec, CommonError> {
            let required = body.get("required").and_then(Value::as_bool).unwrap_or(false);

            let schema = body
                .pointer("/content/application~1json/schema")
                .map(|schema| compile_schema(schema, components))
                .transpose()?;

            Ok(BodySpec { required, schema })
        })
        .transpose()?;

    let mut responses = BTreeMap::new();

    if let Some(declared) = operation.get("responses").and_then(Value::as_object) {
        for (status, response) in declared {
            let schema = response
                .pointer("/content/application~1json/schema")
                .map(|schema| compile_schema(schema, components))
                .transpose()?;

            responses.insert(status.clone(), schema);
        }
    }

    Ok(Operation {
        security_required,
        required_parameters,
        request_body,
        responses,
    })
}

/// Compile a schema fragment with the document components alongside it so
/// `#/components/...` references keep resolving.
fn compile_schema(schema: &Value, components: &Value) -> Result<JSONSchema, CommonError> {
    let bundled = json!({
        "allOf": [schema],
        "components": components,
    });

    JSONSchema::compile(&bundled)
        .map_err(|e| CommonError::Unknown(anyhow::anyhow!("schema failed to compile: {e}")))
}

/// State shared by the pipeline middleware. Immutable after construction;
/// everything mutable during validation lives on the request's own stack.
#[derive(Clone)]
pub struct Pipeline {
    pub schema: Arc<Schema>,
    pub authenticator: Arc<Authenticator>,
}

fn pipeline_error(kind: ProtocolError, description: &str) -> Response {
    (kind.status(), Json(TokenError::new(kind, description))).into_response()
}

/// Captured response: status, headers and body bytes exactly as the handler
/// produced them. Capture is observational; the bytes sent to the client are
/// never altered.
struct BufferedResponse {
    parts: http::response::Parts,
    body: Bytes,
}

impl BufferedResponse {
    async fn capture(response: Response) -> Result<Self, axum::Error> {
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await?;

        Ok(Self { parts, body })
    }

    fn status_code(&self) -> StatusCode {
        self.parts.status
    }

    fn is_json(&self) -> bool {
        self.parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"))
    }

    fn into_response(self) -> Response {
        Response::from_parts(self.parts, Body::from(self.body))
    }
}

/// The pipeline middleware itself.
pub async fn validate(
    State(pipeline): State<Pipeline>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let Some((operation, path_parameters)) = pipeline.schema.find_route(&method, &path) else {
        return pipeline_error(ProtocolError::ServerError, "route lookup failure");
    };

    // Propagate the client certificate first so it is available to any
    // token-binding checks during authentication.
    let fingerprint = match extract_certificate_fingerprint(request.headers()) {
        Ok(fingerprint) => fingerprint,
        Err(e) => {
            return pipeline_error(
                ProtocolError::InvalidRequest,
                &format!("certificate propagation failure: {}", e.public_message()),
            );
        }
    };

    // Authentication runs as part of request validation; its verdict
    // supersedes anything else this pass would report.
    let info = if operation.security_required {
        let authorization = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        match pipeline.authenticator.authorize(&AuthenticationInput {
            authorization,
            certificate_fingerprint: fingerprint.clone(),
        }) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::debug!("authentication failure: {e:#}");
                return pipeline_error(ProtocolError::AccessDenied, &e.public_message());
            }
        }
    } else {
        None
    };

    let query_parameters: HashMap<String, String> = request
        .uri()
        .query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    for parameter in &operation.required_parameters {
        let present = match parameter.location {
            ParameterLocation::Query => query_parameters.contains_key(&parameter.name),
            ParameterLocation::Header => request.headers().contains_key(parameter.name.as_str()),
            ParameterLocation::Path => path_parameters.contains_key(&parameter.name),
        };

        if !present {
            return pipeline_error(
                ProtocolError::InvalidRequest,
                &format!("required parameter {} is missing", parameter.name),
            );
        }
    }

    // Body validation consumes the stream, so the request is rebuilt from
    // the buffered bytes before dispatch.
    let request = match &operation.request_body {
        Some(body_spec) => {
            let (parts, body) = request.into_parts();

            let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    return pipeline_error(ProtocolError::InvalidRequest, "request body unreadable");
                }
            };

            if bytes.is_empty() && body_spec.required {
                return pipeline_error(ProtocolError::InvalidRequest, "request body is required");
            }

            let is_json = parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("application/json"));

            if is_json && !bytes.is_empty() {
                if let Some(schema) = &body_spec.schema {
                    let Ok(instance) = serde_json::from_slice::<Value>(&bytes) else {
                        return pipeline_error(ProtocolError::InvalidRequest, "request body invalid");
                    };

                    if let Err(errors) = schema.validate(&instance) {
                        let details: Vec<String> = errors.map(|e| e.to_string()).collect();
                        tracing::debug!(?details, "request body schema validation failure");

                        return pipeline_error(ProtocolError::InvalidRequest, "request body invalid");
                    }
                }
            }

            Request::from_parts(parts, Body::from(bytes))
        }
        None => request,
    };

    let mut request = request;

    if let Some(info) = info {
        // The organization parameter can legitimately be absent; the ACL is
        // then globally scoped only.
        let organization_id = path_parameters
            .get(ORGANIZATION_PARAMETER)
            .map(String::as_str);

        let acl = match pipeline.authenticator.get_acl(&info, organization_id).await {
            Ok(acl) => acl,
            Err(e) => {
                tracing::error!("ACL resolution failure: {e:#}");
                return pipeline_error(ProtocolError::ServerError, "ACL resolution failure");
            }
        };

        request.extensions_mut().insert(info);
        request.extensions_mut().insert(acl);
    }

    let response = next.run(request).await;

    let captured = match BufferedResponse::capture(response).await {
        Ok(captured) => captured,
        Err(e) => {
            tracing::error!("response capture failure: {e:#}");
            return pipeline_error(ProtocolError::ServerError, "response capture failure");
        }
    };

    validate_response(operation, &method, &path, &captured);

    captured.into_response()
}

/// Response validation never gates: the verdict is logged and the captured
/// bytes are forwarded untouched.
fn validate_response(operation: &Operation, method: &Method, path: &str, response: &BufferedResponse) {
    let status = response.status_code();

    let declared = operation
        .responses
        .get(status.as_str())
        .or_else(|| operation.responses.get("default"));

    let Some(schema) = declared else {
        if !operation.responses.is_empty() {
            tracing::error!(%method, path, %status, "response status not declared in schema");
        }
        return;
    };

    if let Some(schema) = schema {
        if response.is_json() {
            let Ok(instance) = serde_json::from_slice::<Value>(&response.body) else {
                tracing::error!(%method, path, %status, "response body is not valid JSON");
                return;
            };

            if let Err(errors) = schema.validate(&instance) {
                let details: Vec<String> = errors.map(|e| e.to_string()).collect();
                tracing::error!(%method, path, %status, ?details, "response schema validation failure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_match_and_capture_parameters() {
        let document = json!({
            "paths": {
                "/api/v1/organizations/{organizationID}/acl": {
                    "get": {
                        "responses": { "200": {} },
                    },
                },
                "/authorize": {
                    "get": {
                        "responses": { "200": {}, "302": {}, "400": {} },
                    },
                },
            },
        });

        let schema = Schema::from_document(&document).unwrap();

        let (_, params) = schema
            .find_route(&Method::GET, "/api/v1/organizations/acme-org/acl")
            .unwrap();
        assert_eq!(params["organizationID"], "acme-org");

        assert!(schema.find_route(&Method::GET, "/authorize").is_some());
        assert!(schema.find_route(&Method::POST, "/authorize").is_none());
        assert!(schema.find_route(&Method::GET, "/unknown").is_none());
        assert!(
            schema
                .find_route(&Method::GET, "/api/v1/organizations/acme-org")
                .is_none()
        );
    }

    #[test]
    fn security_requirements_are_detected() {
        let document = json!({
            "paths": {
                "/open": { "get": { "responses": {} } },
                "/protected": {
                    "get": {
                        "security": [ { "bearer": [] } ],
                        "responses": {},
                    },
                },
            },
        });

        let schema = Schema::from_document(&document).unwrap();

        let (open, _) = schema.find_route(&Method::GET, "/open").unwrap();
        assert!(!open.security_required);

        let (protected, _) = schema.find_route(&Method::GET, "/protected").unwrap();
        assert!(protected.security_required);
    }

    #[test]
    fn component_references_resolve_in_body_schemas() {
        let document = json!({
            "components": {
                "schemas": {
                    "Widget": {
                        "type": "object",
                        "required": ["name"],
                        "properties": { "name": { "type": "string" } },
                    },
                },
            },
            "paths": {
                "/widgets": {
                    "post": {
                        "requestBody": {
                            "required": true,
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/Widget" },
                                },
                            },
                        },
                        "responses": {},
                    },
                },
            },
        });

        let schema = Schema::from_document(&document).unwrap();
        let (operation, _) = schema.find_route(&Method::POST, "/widgets").unwrap();

        let body = operation.request_body.as_ref().unwrap();
        assert!(body.required);

        let compiled = body.schema.as_ref().unwrap();
        assert!(compiled.is_valid(&json!({ "name": "sprocket" })));
        assert!(!compiled.is_valid(&json!({ "name": 7 })));
        assert!(!compiled.is_valid(&json!({})));
    }

    #[tokio::test]
    async fn buffered_response_defaults_to_200_and_keeps_bytes() {
        let response = Response::new(Body::from("hello"));
        let captured = BufferedResponse::capture(response).await.unwrap();

        assert_eq!(captured.status_code(), StatusCode::OK);
        assert_eq!(captured.body.as_ref(), b"hello");

        let forwarded = captured.into_response();
        let bytes = axum::body::to_bytes(forwarded.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"hello");
    }
}
