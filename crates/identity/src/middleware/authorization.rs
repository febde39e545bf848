//! Bearer-token authentication and the request-scoped principal.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD, engine::general_purpose::URL_SAFE_NO_PAD};
use http::HeaderMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::error::CommonError;
use utoipa::ToSchema;

use crate::jose::TokenIssuer;
use crate::oauth2::AccessTokenClaims;
use crate::rbac::{Acl, Authorizer};
use crate::repository::Repository;

/// Front-proxy header carrying the urlencoded client certificate PEM.
pub const CLIENT_CERTIFICATE_HEADER: &str = "ssl-client-cert";

/// Authenticated principal injected into the request scope.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Info {
    pub subject: String,
    pub claims: AccessTokenClaims,
    /// Fingerprint of the presented client certificate, for token-binding
    /// checks further down the pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_fingerprint: Option<String>,
}

/// Raw request material the authenticator works from.
pub struct AuthenticationInput<'a> {
    pub authorization: Option<&'a str>,
    pub certificate_fingerprint: Option<String>,
}

/// Verifies downstream bearer tokens and resolves per-request ACLs.
#[derive(Clone)]
pub struct Authenticator {
    issuer: Arc<TokenIssuer>,
    authorizer: Authorizer<Repository>,
}

impl Authenticator {
    pub fn new(issuer: Arc<TokenIssuer>, authorizer: Authorizer<Repository>) -> Self {
        Self { issuer, authorizer }
    }

    /// Authenticate a request from its raw credentials.
    pub fn authorize(&self, input: &AuthenticationInput<'_>) -> Result<Info, CommonError> {
        let Some(header) = input.authorization else {
            return Err(CommonError::Authentication {
                msg: "authorization header is not specified".to_string(),
                source: None,
            });
        };

        let Some((scheme, token)) = header.split_once(' ') else {
            return Err(CommonError::Authentication {
                msg: "authorization header is malformed".to_string(),
                source: None,
            });
        };

        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(CommonError::Authentication {
                msg: "authorization scheme must be Bearer".to_string(),
                source: None,
            });
        }

        let claims: AccessTokenClaims = self.issuer.verify_jwt(token.trim())?;

        Ok(Info {
            subject: claims.sub.clone(),
            claims,
            certificate_fingerprint: input.certificate_fingerprint.clone(),
        })
    }

    pub async fn get_acl(
        &self,
        info: &Info,
        organization_id: Option<&str>,
    ) -> Result<Acl, CommonError> {
        self.authorizer.get_acl(&info.subject, organization_id).await
    }
}

/// SHA-256 fingerprint of the client certificate the front proxy forwarded,
/// if any. A malformed certificate is a request error, not an absence.
pub fn extract_certificate_fingerprint(
    headers: &HeaderMap,
) -> Result<Option<String>, CommonError> {
    let Some(value) = headers.get(CLIENT_CERTIFICATE_HEADER) else {
        return Ok(None);
    };

    let invalid = |msg: &str| CommonError::InvalidRequest {
        msg: msg.to_string(),
        source: None,
    };

    let value = value
        .to_str()
        .map_err(|_| invalid("client certificate header is not valid UTF-8"))?;

    let pem = urlencoding::decode(value)
        .map_err(|_| invalid("client certificate header is not urlencoded"))?;

    let body: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();

    if body.is_empty() {
        return Err(invalid("client certificate is not PEM encoded"));
    }

    let der = STANDARD
        .decode(body.trim())
        .map_err(|_| invalid("client certificate is not valid base64"))?;

    Ok(Some(URL_SAFE_NO_PAD.encode(Sha256::digest(der))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn authenticator() -> (Authenticator, Arc<TokenIssuer>) {
        let issuer = Arc::new(TokenIssuer::generate().unwrap());
        let authorizer = Authorizer::new(Repository::new(), "default");
        (Authenticator::new(issuer.clone(), authorizer), issuer)
    }

    fn claims(exp_offset: i64) -> AccessTokenClaims {
        AccessTokenClaims {
            iss: "https://id.broker.test".to_string(),
            sub: "alice@acme.test".to_string(),
            org: "acme-org".to_string(),
            scope: crate::oauth2::Scope::parse("openid"),
            iat: Utc::now().timestamp(),
            exp: Utc::now().timestamp() + exp_offset,
        }
    }

    #[test]
    fn valid_bearer_token_authenticates() {
        let (authenticator, issuer) = authenticator();
        let token = issuer.sign_jwt(&claims(3600)).unwrap();

        let header = format!("Bearer {token}");
        let info = authenticator
            .authorize(&AuthenticationInput {
                authorization: Some(&header),
                certificate_fingerprint: None,
            })
            .unwrap();

        assert_eq!(info.subject, "alice@acme.test");
        assert_eq!(info.claims.org, "acme-org");
    }

    #[test]
    fn missing_expired_and_garbled_tokens_are_rejected() {
        let (authenticator, issuer) = authenticator();

        let err = authenticator
            .authorize(&AuthenticationInput {
                authorization: None,
                certificate_fingerprint: None,
            })
            .unwrap_err();
        assert!(matches!(err, CommonError::Authentication { .. }));

        let expired = format!("Bearer {}", issuer.sign_jwt(&claims(-3600)).unwrap());
        assert!(
            authenticator
                .authorize(&AuthenticationInput {
                    authorization: Some(&expired),
                    certificate_fingerprint: None,
                })
                .is_err()
        );

        assert!(
            authenticator
                .authorize(&AuthenticationInput {
                    authorization: Some("Bearer not-a-jwt"),
                    certificate_fingerprint: None,
                })
                .is_err()
        );

        let token = issuer.sign_jwt(&claims(3600)).unwrap();
        let basic = format!("Basic {token}");
        assert!(
            authenticator
                .authorize(&AuthenticationInput {
                    authorization: Some(&basic),
                    certificate_fingerprint: None,
                })
                .is_err()
        );
    }

    #[test]
    fn fingerprint_absent_without_the_header() {
        let headers = HeaderMap::new();
        assert!(extract_certificate_fingerprint(&headers).unwrap().is_none());
    }

    #[test]
    fn malformed_certificate_is_an_error() {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_CERTIFICATE_HEADER, "%%%garbage".parse().unwrap());
        assert!(extract_certificate_fingerprint(&headers).is_err());
    }

    #[test]
    fn pem_certificate_fingerprints() {
        let pem = "-----BEGIN CERTIFICATE-----\nAAECAwQF\n-----END CERTIFICATE-----";
        let mut headers = HeaderMap::new();
        headers.insert(
            CLIENT_CERTIFICATE_HEADER,
            urlencoding::encode(pem).parse().unwrap(),
        );

        let fingerprint = extract_certificate_fingerprint(&headers).unwrap().unwrap();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest([0u8, 1, 2, 3, 4, 5]));
        assert_eq!(fingerprint, expected);
    }
}
