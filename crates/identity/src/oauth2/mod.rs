//! The federated authorization-server engine.
//!
//! We act as an authorization server towards our own clients while acting as
//! an OIDC relying party towards the upstream provider. All per-flow state
//! crosses the redirect dance inside the encrypted [`State`] and [`Code`]
//! envelopes, so any replica can serve any leg of the flow and no session
//! table exists anywhere.

pub mod oidc;
pub mod providers;
pub mod templates;

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use http::StatusCode;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use shared::error::CommonError;
use utoipa::{IntoParams, ToSchema};

use crate::jose::TokenIssuer;
use crate::repository::ResourceStore;
use crate::resources::{OAuth2Client, OAuth2Provider, Organization};

use self::oidc::{AuthorizationUrlParams, CodeExchangeParams, DiscoveryCache, JwksCache};
use self::providers::provider;

/// Issued access and id tokens are valid for a day.
const ACCESS_TOKEN_LIFETIME_HOURS: i64 = 24;

/// OAuth2 protocol error codes (RFC 6749 §4.1.2.1 and §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    InvalidRequest,
    UnauthorizedClient,
    AccessDenied,
    UnsupportedResponseType,
    InvalidScope,
    InvalidGrant,
    InvalidClient,
    UnsupportedGrantType,
    ServerError,
}

impl ProtocolError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolError::InvalidRequest => "invalid_request",
            ProtocolError::UnauthorizedClient => "unauthorized_client",
            ProtocolError::AccessDenied => "access_denied",
            ProtocolError::UnsupportedResponseType => "unsupported_response_type",
            ProtocolError::InvalidScope => "invalid_scope",
            ProtocolError::InvalidGrant => "invalid_grant",
            ProtocolError::InvalidClient => "invalid_client",
            ProtocolError::UnsupportedGrantType => "unsupported_grant_type",
            ProtocolError::ServerError => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProtocolError::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ProtocolError::AccessDenied => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an authorization-flow failure reaches the user-agent. Until the
/// redirect URI has been validated (or recovered from a sealed envelope) the
/// only safe surface is an HTML page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeError {
    Page {
        status: StatusCode,
        description: String,
    },
    Redirect {
        redirect_uri: String,
        error: String,
        description: String,
    },
}

impl AuthorizeError {
    pub fn page(status: StatusCode, description: &str) -> Self {
        AuthorizeError::Page {
            status,
            description: description.to_string(),
        }
    }

    pub fn redirect(redirect_uri: String, kind: ProtocolError, description: &str) -> Self {
        AuthorizeError::Redirect {
            redirect_uri,
            error: kind.as_str().to_string(),
            description: description.to_string(),
        }
    }

    /// Relay an upstream error code to the client verbatim.
    pub fn relay(redirect_uri: String, error: &str, description: &str) -> Self {
        AuthorizeError::Redirect {
            redirect_uri,
            error: error.to_string(),
            description: description.to_string(),
        }
    }
}

/// Space-delimited OAuth2 scope list, stored as a list inside the envelopes
/// and the issued claims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct Scope(pub Vec<String>);

impl Scope {
    pub fn parse(raw: &str) -> Self {
        Self(raw.split_whitespace().map(str::to_string).collect())
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.iter().any(|s| s == scope)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// Flow state carried across the upstream redirect, sealed with JWE.
///
/// The short field tags are the wire contract between replicas and across
/// rolling deployments; they must not change without coordinated key
/// rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// One-time nonce bound into the upstream id_token.
    #[serde(rename = "n")]
    pub nonce: String,
    /// Proves our identity when exchanging the code at the token endpoint.
    #[serde(rename = "cv")]
    pub code_verifier: String,
    /// Name of the provider configuration in use.
    #[serde(rename = "oap")]
    pub oauth2_provider: String,
    #[serde(rename = "org")]
    pub organization: String,
    #[serde(rename = "cid")]
    pub client_id: String,
    #[serde(rename = "cri")]
    pub client_redirect_uri: String,
    /// The client's own OAuth state, echoed back untouched.
    #[serde(rename = "cst", default, skip_serializing_if = "String::is_empty")]
    pub client_state: String,
    /// The client's code challenge, so the code can only be redeemed by the
    /// client that asked for it.
    #[serde(rename = "ccc")]
    pub client_code_challenge: String,
    #[serde(rename = "csc", default, skip_serializing_if = "Scope::is_empty")]
    pub client_scope: Scope,
    /// Client nonce destined for the id_token we issue.
    #[serde(rename = "cno", default, skip_serializing_if = "String::is_empty")]
    pub client_nonce: String,
}

/// The authorization code handed to the downstream client, sealed with JWE.
/// Same reasoning as [`State`]: the envelope is the session.
///
/// Keep this small. Ingress controllers reject outsized query strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    #[serde(rename = "cid")]
    pub client_id: String,
    #[serde(rename = "cri")]
    pub client_redirect_uri: String,
    #[serde(rename = "ccc")]
    pub client_code_challenge: String,
    #[serde(rename = "csc", default, skip_serializing_if = "Scope::is_empty")]
    pub client_scope: Scope,
    #[serde(rename = "cno", default, skip_serializing_if = "String::is_empty")]
    pub client_nonce: String,
    /// Canonical subject name, not an alias.
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(rename = "org")]
    pub organization: String,
}

/// Parameters honored on `/authorize`, whether they arrive as the live query
/// or replayed through the login form.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthorizeRequest {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub login_hint: Option<String>,
}

impl AuthorizeRequest {
    pub fn from_query(raw: &str) -> Self {
        let mut request = Self::default();

        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let value = value.into_owned();

            match key.as_ref() {
                "client_id" => request.client_id = Some(value),
                "redirect_uri" => request.redirect_uri = Some(value),
                "response_type" => request.response_type = Some(value),
                "code_challenge" => request.code_challenge = Some(value),
                "code_challenge_method" => request.code_challenge_method = Some(value),
                "scope" => request.scope = Some(value),
                "state" => request.state = Some(value),
                "nonce" => request.nonce = Some(value),
                "login_hint" => request.login_hint = Some(value),
                _ => {}
            }
        }

        request
    }
}

/// Query parameters the upstream provider sends to `/oidc/callback`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackRequest {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub description: Option<String>,
}

/// Form parameters for `/token`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub code: Option<String>,
    pub code_verifier: Option<String>,
}

/// Successful token-endpoint response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub token_type: String,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub expires_in: i64,
}

/// JSON error body for the token endpoint (RFC 6749 §5.2).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenError {
    pub error: String,
    pub error_description: String,
}

impl TokenError {
    pub fn new(kind: ProtocolError, description: &str) -> Self {
        Self {
            error: kind.as_str().to_string(),
            error_description: description.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.error.as_str() {
            "server_error" => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Claims of the access tokens we issue.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub org: String,
    #[serde(default, skip_serializing_if = "Scope::is_empty")]
    pub scope: Scope,
    pub iat: i64,
    pub exp: i64,
}

/// Claims of the id_tokens we issue when `openid` is in scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub at_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// Dependencies shared by the authorization-flow operations.
pub struct FlowContext<'a, S> {
    pub store: &'a S,
    pub issuer: &'a TokenIssuer,
    pub discovery: &'a DiscoveryCache,
    pub upstream_jwks: &'a JwksCache,
    /// Namespace holding the server-global resources.
    pub namespace: &'a str,
    /// Host the request arrived on, used for issuer and redirect URLs.
    pub host: &'a str,
}

/// High-entropy randomness, base64url encoded without padding. A size of 32
/// yields the 43 characters an OAuth2 code verifier needs at minimum.
pub fn random_string(size: usize) -> String {
    let mut buf = vec![0u8; size];
    rand::rngs::OsRng.fill_bytes(&mut buf);

    URL_SAFE_NO_PAD.encode(buf)
}

/// Code verifier to code challenge translation for the S256 method.
pub fn encode_code_challenge_s256(code_verifier: &str) -> String {
    let hash = Sha256::digest(code_verifier.as_bytes());

    URL_SAFE_NO_PAD.encode(hash)
}

/// at_hash / c_hash construction: the leftmost half of SHA-512, matching the
/// RS512 algorithm the token codec is pinned to.
pub fn oidc_hash(value: &str) -> String {
    let sum = Sha512::digest(value.as_bytes());

    URL_SAFE_NO_PAD.encode(&sum[..sum.len() / 2])
}

/// Gravatar URL for the canonical email address.
fn gravatar_url(email: &str) -> String {
    format!(
        "https://www.gravatar.com/avatar/{:x}",
        md5::compute(email.trim().to_lowercase())
    )
}

/// Phase A of `/authorize`: checks that gate the ability to redirect at all.
/// Until these pass the redirect URI is untrusted, so failures surface as an
/// HTML page and never as a redirect.
pub async fn validate_non_redirecting<S: ResourceStore>(
    store: &S,
    namespace: &str,
    request: &AuthorizeRequest,
) -> Result<OAuth2Client, AuthorizeError> {
    let Some(client_id) = request.client_id.as_deref() else {
        return Err(AuthorizeError::page(
            StatusCode::BAD_REQUEST,
            "client_id is not specified",
        ));
    };

    let Some(redirect_uri) = request.redirect_uri.as_deref() else {
        return Err(AuthorizeError::page(
            StatusCode::BAD_REQUEST,
            "redirect_uri is not specified",
        ));
    };

    let clients: Vec<OAuth2Client> = store.list(namespace, None).await.map_err(|e| {
        AuthorizeError::page(StatusCode::INTERNAL_SERVER_ERROR, &e.public_message())
    })?;

    let Some(client) = clients.into_iter().find(|c| c.id == client_id) else {
        return Err(AuthorizeError::page(
            StatusCode::BAD_REQUEST,
            "client_id is invalid",
        ));
    };

    if client.redirect_uri != redirect_uri {
        return Err(AuthorizeError::page(
            StatusCode::BAD_REQUEST,
            "redirect_uri is invalid",
        ));
    }

    Ok(client)
}

/// Phase B of `/authorize`: the redirect URI is trusted now, so failures go
/// back to the client as an error query per RFC 6749 §4.1.2.1.
pub fn validate_redirecting(request: &AuthorizeRequest) -> Result<(), AuthorizeError> {
    let (kind, description) = if request.response_type.as_deref() != Some("code") {
        (
            ProtocolError::UnsupportedResponseType,
            "response_type must be 'code'",
        )
    } else if request.code_challenge_method.as_deref() != Some("S256") {
        (
            ProtocolError::InvalidRequest,
            "code_challenge_method must be 'S256'",
        )
    } else if request
        .code_challenge
        .as_deref()
        .unwrap_or_default()
        .is_empty()
    {
        (ProtocolError::InvalidRequest, "code_challenge must be specified")
    } else {
        return Ok(());
    };

    Err(AuthorizeError::redirect(
        request.redirect_uri.clone().unwrap_or_default(),
        kind,
        description,
    ))
}

/// Maps an email address to its organization. Corporate mandates mean a whole
/// domain shares one sign-on provider, so the domain is the discriminator.
async fn lookup_organization<S: ResourceStore>(
    store: &S,
    namespace: &str,
    email: &str,
) -> Result<Organization, AuthorizeError> {
    let Some((_, domain)) = email.rsplit_once('@') else {
        return Err(AuthorizeError::page(
            StatusCode::INTERNAL_SERVER_ERROR,
            "email address is malformed",
        ));
    };

    let organizations: Vec<Organization> = store.list(namespace, None).await.map_err(|e| {
        AuthorizeError::page(StatusCode::INTERNAL_SERVER_ERROR, &e.public_message())
    })?;

    organizations
        .into_iter()
        .find(|o| o.domain == domain)
        .ok_or_else(|| {
            AuthorizeError::page(StatusCode::INTERNAL_SERVER_ERROR, "unsupported domain")
        })
}

/// Routes a user email to the correct upstream provider: resolve the
/// organization, discover the provider's endpoints, seal the flow state, and
/// produce the upstream authorization redirect.
pub async fn provider_authentication_request<S: ResourceStore>(
    ctx: &FlowContext<'_, S>,
    email: &str,
    request: &AuthorizeRequest,
) -> Result<String, AuthorizeError> {
    let organization = lookup_organization(ctx.store, ctx.namespace, email).await?;

    let provider_resource: OAuth2Provider = ctx
        .store
        .get(ctx.namespace, &organization.provider_name)
        .await
        .map_err(|e| {
            tracing::error!("failed to get provider: {e:#}");
            AuthorizeError::page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to load identity provider",
            )
        })?;

    let strategy = provider(provider_resource.kind);

    let discovery = ctx
        .discovery
        .discover(&provider_resource.issuer)
        .await
        .map_err(|e| {
            tracing::error!("oidc discovery failed: {e:#}");
            AuthorizeError::page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "identity provider discovery failed",
            )
        })?;

    let client_redirect_uri = request.redirect_uri.clone().unwrap_or_default();

    // OIDC requires a nonce; random base64url data suffices.
    let nonce = random_string(16);

    // We hand a hashed challenge to the upstream authorization endpoint and
    // present the verifier at code exchange so its token endpoint can check
    // it is still talking to us.
    let code_verifier = random_string(32);

    // Rather than persist anything across the redirect dance, which would
    // need shared state between replicas, the context is sealed and carried
    // in the authorization request itself.
    let state = State {
        nonce: nonce.clone(),
        code_verifier: code_verifier.clone(),
        oauth2_provider: provider_resource.metadata.name.clone(),
        organization: organization.metadata.name.clone(),
        client_id: request.client_id.clone().unwrap_or_default(),
        client_redirect_uri: client_redirect_uri.clone(),
        client_state: request.state.clone().unwrap_or_default(),
        client_code_challenge: request.code_challenge.clone().unwrap_or_default(),
        client_scope: request.scope.as_deref().map(Scope::parse).unwrap_or_default(),
        client_nonce: request.nonce.clone().unwrap_or_default(),
    };

    let sealed = ctx.issuer.encrypt_jwe(&state).map_err(|e| {
        AuthorizeError::redirect(
            client_redirect_uri.clone(),
            ProtocolError::ServerError,
            &format!("failed to encode oidc state: {}", e.public_message()),
        )
    })?;

    oidc::authorization_url(AuthorizationUrlParams {
        discovery: &discovery,
        provider: &provider_resource,
        extra_scopes: strategy.scopes(),
        host: ctx.host,
        code_verifier: &code_verifier,
        login_hint: email,
        nonce: &nonce,
        state: &sealed,
    })
    .map_err(|e| {
        AuthorizeError::redirect(
            client_redirect_uri,
            ProtocolError::ServerError,
            &e.public_message(),
        )
    })
}

/// Handles the upstream provider's response: recover the sealed state,
/// exchange the code, verify the id_token, and mint the authorization code
/// for the downstream client.
pub async fn oidc_callback<S: ResourceStore>(
    ctx: &FlowContext<'_, S>,
    request: &CallbackRequest,
) -> Result<String, AuthorizeError> {
    // Without the state there is nowhere trustworthy to send an error: the
    // client redirect URI travels inside it.
    let Some(sealed) = request.state.as_deref() else {
        return Err(AuthorizeError::page(
            StatusCode::BAD_REQUEST,
            "oidc state is required",
        ));
    };

    let state: State = ctx.issuer.decrypt_jwe(sealed).map_err(|_| {
        AuthorizeError::page(StatusCode::BAD_REQUEST, "oidc state failed to decode")
    })?;

    let redirect_uri = state.client_redirect_uri.clone();

    if let Some(error) = &request.error {
        return Err(AuthorizeError::relay(
            redirect_uri,
            error,
            request.description.as_deref().unwrap_or_default(),
        ));
    }

    let fail = |description: String| {
        AuthorizeError::redirect(redirect_uri.clone(), ProtocolError::ServerError, &description)
    };

    let Some(code) = request.code.as_deref() else {
        return Err(fail(
            "oidc callback does not contain an authorization code".to_string(),
        ));
    };

    let provider_resource: OAuth2Provider = ctx
        .store
        .get(ctx.namespace, &state.oauth2_provider)
        .await
        .map_err(|e| fail(format!("failed to load identity provider: {}", e.public_message())))?;

    let discovery = ctx
        .discovery
        .discover(&provider_resource.issuer)
        .await
        .map_err(|e| fail(format!("oidc discovery failed: {}", e.public_message())))?;

    let tokens = oidc::code_exchange(CodeExchangeParams {
        discovery: &discovery,
        provider: &provider_resource,
        host: ctx.host,
        code,
        code_verifier: &state.code_verifier,
    })
    .await
    .map_err(|e| fail(format!("oidc code exchange failed: {}", e.public_message())))?;

    let claims = oidc::verify_id_token(
        ctx.upstream_jwks,
        &discovery,
        &provider_resource,
        &tokens.id_token,
    )
    .await
    .map_err(|e| fail(format!("id_token verification failed: {}", e.public_message())))?;

    if claims.nonce.as_deref() != Some(state.nonce.as_str()) {
        return Err(fail("id_token nonce mismatch".to_string()));
    }

    let Some(email) = claims.email else {
        return Err(fail("id_token does not contain an email claim".to_string()));
    };

    // Group memberships are fetched while the upstream access token is in
    // hand; mapping them onto internal roles is still to come.
    let strategy = provider(provider_resource.kind);

    let groups = strategy
        .groups(&tokens.access_token)
        .await
        .map_err(|e| fail(format!("failed to lookup user groups: {}", e.public_message())))?;

    tracing::debug!(?groups, subject = %email, "upstream group memberships");

    let code_envelope = Code {
        client_id: state.client_id,
        client_redirect_uri: state.client_redirect_uri,
        client_code_challenge: state.client_code_challenge,
        client_scope: state.client_scope,
        client_nonce: state.client_nonce,
        subject: email,
        organization: state.organization,
    };

    let sealed_code = ctx
        .issuer
        .encrypt_jwe(&code_envelope)
        .map_err(|e| fail(format!("failed to encode authorization code: {}", e.public_message())))?;

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("code", &sealed_code);

    if !state.client_state.is_empty() {
        query.append_pair("state", &state.client_state);
    }

    Ok(format!("{redirect_uri}?{}", query.finish()))
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, TokenError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            TokenError::new(
                ProtocolError::InvalidRequest,
                &format!("{name} must be specified"),
            )
        })
}

/// Issues an access token (and id_token when `openid` is in scope) from an
/// authorization code, after byte-exact binding checks against the sealed
/// envelope.
pub fn token(issuer: &TokenIssuer, host: &str, request: &TokenRequest) -> Result<TokenResponse, TokenError> {
    if request.grant_type.as_deref() != Some("authorization_code") {
        return Err(TokenError::new(
            ProtocolError::UnsupportedGrantType,
            "grant_type must be 'authorization_code'",
        ));
    }

    let client_id = required(&request.client_id, "client_id")?;
    let redirect_uri = required(&request.redirect_uri, "redirect_uri")?;
    let sealed = required(&request.code, "code")?;
    let code_verifier = required(&request.code_verifier, "code_verifier")?;

    let code: Code = issuer.decrypt_jwe(sealed).map_err(|e| {
        TokenError::new(
            ProtocolError::InvalidRequest,
            &format!("failed to parse code: {}", e.public_message()),
        )
    })?;

    if code.client_id != client_id {
        return Err(TokenError::new(ProtocolError::InvalidGrant, "client_id mismatch"));
    }

    if code.client_redirect_uri != redirect_uri {
        return Err(TokenError::new(
            ProtocolError::InvalidGrant,
            "redirect_uri mismatch",
        ));
    }

    if code.client_code_challenge != encode_code_challenge_s256(code_verifier) {
        return Err(TokenError::new(
            ProtocolError::InvalidClient,
            "code_verifier invalid",
        ));
    }

    let now = Utc::now();
    let expiry = now + Duration::hours(ACCESS_TOKEN_LIFETIME_HOURS);

    let claims = AccessTokenClaims {
        iss: format!("https://{host}"),
        sub: code.subject.clone(),
        org: code.organization.clone(),
        scope: code.client_scope.clone(),
        iat: now.timestamp(),
        exp: expiry.timestamp(),
    };

    let access_token = issuer.sign_jwt(&claims).map_err(|e| {
        tracing::error!("failed to issue access token: {e:#}");
        TokenError::new(ProtocolError::ServerError, "failed to issue access token")
    })?;

    let id_token = oidc_id_token(issuer, host, &code, expiry.timestamp(), &oidc_hash(&access_token))
        .map_err(|e| {
            tracing::error!("failed to issue id_token: {e:#}");
            TokenError::new(ProtocolError::ServerError, "failed to issue id_token")
        })?;

    Ok(TokenResponse {
        token_type: "Bearer".to_string(),
        access_token,
        id_token,
        expires_in: (expiry - Utc::now()).num_seconds(),
    })
}

fn oidc_id_token(
    issuer: &TokenIssuer,
    host: &str,
    code: &Code,
    exp: i64,
    at_hash: &str,
) -> Result<Option<String>, CommonError> {
    if !code.client_scope.contains("openid") {
        return Ok(None);
    }

    let claims = IdTokenClaims {
        iss: format!("https://{host}"),
        sub: code.subject.clone(),
        aud: vec![code.client_id.clone()],
        iat: Utc::now().timestamp(),
        exp,
        nonce: (!code.client_nonce.is_empty()).then(|| code.client_nonce.clone()),
        at_hash: at_hash.to_string(),
        email: code
            .client_scope
            .contains("email")
            .then(|| code.subject.clone()),
        picture: code
            .client_scope
            .contains("profile")
            .then(|| gravatar_url(&code.subject)),
    };

    issuer.sign_jwt(&claims).map(Some)
}
