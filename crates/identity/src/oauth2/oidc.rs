//! Upstream OIDC plumbing: discovery, the provider JWKS cache, authorization
//! URL shaping, the authorization-code exchange and id_token verification.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, TokenUrl};
use serde::Deserialize;
use serde_json::{Map, Value};
use shared::error::CommonError;

use crate::resources::OAuth2Provider;

/// Subset of the discovery document the flows need.
#[derive(Debug, Clone, Deserialize)]
pub struct Discovery {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
}

/// The redirect URL registered with upstream providers.
pub fn callback_url(host: &str) -> String {
    format!("https://{host}/oidc/callback")
}

/// Create an HTTP client for upstream requests.
pub(crate) fn create_http_client() -> Result<reqwest::Client, CommonError> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to create HTTP client: {e}")))
}

struct CachedDiscovery {
    document: Discovery,
    expires_at: DateTime<Utc>,
}

/// Per-issuer discovery document cache. Entries expire on a jittered TTL so
/// replicas do not refetch in lockstep; a miss is just a refetch.
pub struct DiscoveryCache {
    entries: DashMap<String, CachedDiscovery>,
    ttl: Duration,
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::hours(1),
        }
    }

    /// Seed the cache with a known document, bypassing the network.
    pub fn prime(&self, issuer: &str, document: Discovery) {
        self.entries.insert(
            issuer.to_string(),
            CachedDiscovery {
                document,
                expires_at: Utc::now() + self.ttl,
            },
        );
    }

    /// Fetch the discovery document for an issuer, from cache if fresh.
    pub async fn discover(&self, issuer: &str) -> Result<Discovery, CommonError> {
        if let Some(cached) = self.entries.get(issuer) {
            if Utc::now() < cached.expires_at {
                return Ok(cached.document.clone());
            }
        }

        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );

        tracing::debug!(%url, "oidc discovery");

        let document: Discovery = create_http_client()?
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let jitter = Duration::seconds((rand::random::<u64>() % 300) as i64);

        self.entries.insert(
            issuer.to_string(),
            CachedDiscovery {
                document: document.clone(),
                expires_at: Utc::now() + self.ttl - jitter,
            },
        );

        Ok(document)
    }
}

struct CachedJwks {
    keys: HashMap<String, (DecodingKey, Algorithm)>,
    fetched_at: DateTime<Utc>,
}

/// Per-issuer JWKS cache for upstream id_token verification. Staleness is
/// bounded because providers rotate keys; an unknown `kid` forces a refetch.
#[derive(Clone)]
pub struct JwksCache {
    keys: Arc<DashMap<String, CachedJwks>>,
    ttl: Duration,
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JwksCache {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(DashMap::new()),
            ttl: Duration::hours(1),
        }
    }

    async fn fetch(&self, jwks_uri: &str) -> Result<(), CommonError> {
        let response = create_http_client()?.get(jwks_uri).send().await?;

        let jwks: Value = response
            .json()
            .await
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to parse JWKS: {e}")))?;

        let keys = jwks["keys"]
            .as_array()
            .ok_or_else(|| CommonError::Unknown(anyhow::anyhow!("JWKS missing 'keys' array")))?;

        let mut key_map = HashMap::new();

        for key in keys {
            let Some(kid) = key["kid"].as_str() else {
                continue;
            };

            let kty = key["kty"].as_str().unwrap_or("RSA");
            if kty != "RSA" {
                tracing::warn!("unsupported JWK key type: {kty}");
                continue;
            }

            let (Some(n), Some(e)) = (key["n"].as_str(), key["e"].as_str()) else {
                continue;
            };

            let decoding_key = DecodingKey::from_rsa_components(n, e).map_err(|e| {
                CommonError::Unknown(anyhow::anyhow!("failed to build RSA key: {e}"))
            })?;

            let algorithm = match key["alg"].as_str() {
                Some("RS384") => Algorithm::RS384,
                Some("RS512") => Algorithm::RS512,
                _ => Algorithm::RS256,
            };

            key_map.insert(kid.to_string(), (decoding_key, algorithm));
        }

        self.keys.insert(
            jwks_uri.to_string(),
            CachedJwks {
                keys: key_map,
                fetched_at: Utc::now(),
            },
        );

        Ok(())
    }

    /// Get the decoding key for a key ID, refetching on miss or staleness.
    pub async fn decoding_key(
        &self,
        jwks_uri: &str,
        kid: &str,
    ) -> Result<(DecodingKey, Algorithm), CommonError> {
        let cached = self.keys.get(jwks_uri).and_then(|entry| {
            if Utc::now() - entry.fetched_at < self.ttl {
                entry.keys.get(kid).cloned()
            } else {
                None
            }
        });

        if let Some(found) = cached {
            return Ok(found);
        }

        self.fetch(jwks_uri).await?;

        self.keys
            .get(jwks_uri)
            .and_then(|entry| entry.keys.get(kid).cloned())
            .ok_or_else(|| CommonError::Authentication {
                msg: format!("no JWK found for kid {kid}"),
                source: None,
            })
    }
}

/// Claims we read out of a verified upstream id_token.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamClaims {
    pub email: Option<String>,
    pub nonce: Option<String>,
}

/// Verify an upstream id_token against the provider JWKS: signature, issuer,
/// audience and expiry.
pub async fn verify_id_token(
    jwks: &JwksCache,
    discovery: &Discovery,
    provider: &OAuth2Provider,
    token: &str,
) -> Result<UpstreamClaims, CommonError> {
    let header = decode_header(token).map_err(|e| CommonError::Authentication {
        msg: format!("failed to decode id_token header: {e}"),
        source: None,
    })?;

    let kid = header.kid.ok_or_else(|| CommonError::Authentication {
        msg: "id_token missing 'kid' in header".to_string(),
        source: None,
    })?;

    let (key, algorithm) = jwks.decoding_key(&discovery.jwks_uri, &kid).await?;

    let mut validation = Validation::new(algorithm);
    validation.set_audience(&[&provider.client_id]);
    validation.set_issuer(&[&discovery.issuer]);

    let data = decode::<UpstreamClaims>(token, &key, &validation).map_err(|e| {
        CommonError::Authentication {
            msg: format!("id_token verification failed: {e}"),
            source: None,
        }
    })?;

    Ok(data.claims)
}

/// Everything needed to shape the upstream authorization redirect.
pub struct AuthorizationUrlParams<'a> {
    pub discovery: &'a Discovery,
    pub provider: &'a OAuth2Provider,
    /// Provider-specific scopes appended to `openid profile email`.
    pub extra_scopes: Vec<String>,
    pub host: &'a str,
    pub code_verifier: &'a str,
    pub login_hint: &'a str,
    pub nonce: &'a str,
    /// The sealed state envelope, carried verbatim through the provider.
    pub state: &'a str,
}

/// Compose the upstream authorization URL with PKCE, login hint and nonce.
pub fn authorization_url(params: AuthorizationUrlParams<'_>) -> Result<String, CommonError> {
    let auth_url = AuthUrl::new(params.discovery.authorization_endpoint.clone())?;
    let token_url = TokenUrl::new(params.discovery.token_endpoint.clone())?;
    let redirect_url = RedirectUrl::new(callback_url(params.host))?;

    let client = BasicClient::new(ClientId::new(params.provider.client_id.clone()))
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(redirect_url);

    let state = CsrfToken::new(params.state.to_string());
    let mut request = client.authorize_url(move || state.clone());

    // openid for the flow itself, profile for the user's name, email for the
    // real address rather than an alias.
    let mut scopes = vec![
        "openid".to_string(),
        "profile".to_string(),
        "email".to_string(),
    ];
    scopes.extend(params.extra_scopes);

    for scope in scopes {
        request = request.add_scope(oauth2::Scope::new(scope));
    }

    let verifier = PkceCodeVerifier::new(params.code_verifier.to_string());
    request = request.set_pkce_challenge(PkceCodeChallenge::from_code_verifier_sha256(&verifier));

    let (mut url, _) = request.url();

    url.query_pairs_mut()
        .append_pair("login_hint", params.login_hint)
        .append_pair("nonce", params.nonce);

    Ok(url.to_string())
}

/// Parameters for the authorization-code exchange with the provider.
pub struct CodeExchangeParams<'a> {
    pub discovery: &'a Discovery,
    pub provider: &'a OAuth2Provider,
    pub host: &'a str,
    pub code: &'a str,
    pub code_verifier: &'a str,
}

/// Tokens returned by the provider's token endpoint.
pub struct CodeExchangeResponse {
    pub access_token: String,
    pub id_token: String,
}

/// Exchange the authorization code, proving our identity with the client
/// secret and the original code verifier.
pub async fn code_exchange(
    params: CodeExchangeParams<'_>,
) -> Result<CodeExchangeResponse, CommonError> {
    let form = [
        ("grant_type", "authorization_code".to_string()),
        ("code", params.code.to_string()),
        ("redirect_uri", callback_url(params.host)),
        ("client_id", params.provider.client_id.clone()),
        ("client_secret", params.provider.client_secret.clone()),
        ("code_verifier", params.code_verifier.to_string()),
    ];

    let response = create_http_client()?
        .post(&params.discovery.token_endpoint)
        .form(&form)
        .send()
        .await
        .map_err(|e| CommonError::Unknown(anyhow::anyhow!("token exchange request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(CommonError::Unknown(anyhow::anyhow!(
            "token exchange failed: HTTP {status} - {body}"
        )));
    }

    let tokens: Map<String, Value> = response
        .json()
        .await
        .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to parse token response: {e}")))?;

    let access_token = tokens
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CommonError::Unknown(anyhow::anyhow!("no access token in response")))?;

    let id_token = tokens
        .get("id_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CommonError::Unknown(anyhow::anyhow!("no id_token in response")))?;

    Ok(CodeExchangeResponse {
        access_token: access_token.to_string(),
        id_token: id_token.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Metadata, ProviderKind};

    fn test_provider() -> OAuth2Provider {
        OAuth2Provider {
            metadata: Metadata::new("default", "primary"),
            kind: ProviderKind::Null,
            issuer: "https://idp.example".to_string(),
            client_id: "broker-client".to_string(),
            client_secret: "s3cret".to_string(),
        }
    }

    fn test_discovery() -> Discovery {
        Discovery {
            issuer: "https://idp.example".to_string(),
            authorization_endpoint: "https://idp.example/authorize".to_string(),
            token_endpoint: "https://idp.example/token".to_string(),
            jwks_uri: "https://idp.example/jwks".to_string(),
        }
    }

    #[test]
    fn authorization_url_carries_pkce_and_nonce() {
        let provider = test_provider();
        let discovery = test_discovery();

        let url = authorization_url(AuthorizationUrlParams {
            discovery: &discovery,
            provider: &provider,
            extra_scopes: vec![],
            host: "id.broker.test",
            code_verifier: "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk",
            login_hint: "alice@acme.test",
            nonce: "random-nonce",
            state: "sealed-state",
        })
        .unwrap();

        let url = url::Url::parse(&url).unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.domain(), Some("idp.example"));
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "broker-client");
        assert_eq!(query["code_challenge_method"], "S256");
        // RFC 7636 appendix B test vector.
        assert_eq!(
            query["code_challenge"],
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        assert_eq!(query["login_hint"], "alice@acme.test");
        assert_eq!(query["nonce"], "random-nonce");
        assert_eq!(query["state"], "sealed-state");
        assert_eq!(
            query["redirect_uri"],
            "https://id.broker.test/oidc/callback"
        );
        assert!(query["scope"].contains("openid"));
        assert!(query["scope"].contains("email"));
    }

    #[test]
    fn extra_scopes_are_appended() {
        let provider = test_provider();
        let discovery = test_discovery();

        let url = authorization_url(AuthorizationUrlParams {
            discovery: &discovery,
            provider: &provider,
            extra_scopes: vec!["groups".to_string()],
            host: "id.broker.test",
            code_verifier: "verifier",
            login_hint: "alice@acme.test",
            nonce: "n",
            state: "s",
        })
        .unwrap();

        let url = url::Url::parse(&url).unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert!(query["scope"].contains("groups"));
    }

    #[tokio::test]
    async fn primed_discovery_skips_the_network() {
        let cache = DiscoveryCache::new();
        cache.prime("https://idp.example", test_discovery());

        let document = cache.discover("https://idp.example").await.unwrap();
        assert_eq!(document.jwks_uri, "https://idp.example/jwks");
    }
}
