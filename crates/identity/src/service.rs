use std::sync::Arc;

use shared::error::CommonError;

use crate::jose::TokenIssuer;
use crate::middleware::authorization::Authenticator;
use crate::oauth2::FlowContext;
use crate::oauth2::oidc::{DiscoveryCache, JwksCache};
use crate::oauth2::templates::Templates;
use crate::rbac::Authorizer;
use crate::repository::Repository;

/// Parameters for constructing an IdentityService.
pub struct IdentityServiceParams {
    /// Namespace holding the server-global resources.
    pub namespace: String,
    pub repository: Repository,
    pub issuer: Arc<TokenIssuer>,
}

/// Shared state for the authorization server and the request pipeline.
///
/// Everything here is immutable after startup apart from the repository,
/// whose consistency guarantees are its own; request handlers never need a
/// lock.
#[derive(Clone)]
pub struct IdentityService {
    pub namespace: String,
    pub repository: Repository,
    pub issuer: Arc<TokenIssuer>,
    pub discovery: Arc<DiscoveryCache>,
    pub upstream_jwks: Arc<JwksCache>,
    pub templates: Arc<Templates>,
}

impl IdentityService {
    pub fn new(params: IdentityServiceParams) -> Result<Self, CommonError> {
        Ok(Self {
            namespace: params.namespace,
            repository: params.repository,
            issuer: params.issuer,
            discovery: Arc::new(DiscoveryCache::new()),
            upstream_jwks: Arc::new(JwksCache::new()),
            templates: Arc::new(Templates::load()?),
        })
    }

    /// Dependencies for one leg of the authorization flow.
    pub fn flow_context<'a>(&'a self, host: &'a str) -> FlowContext<'a, Repository> {
        FlowContext {
            store: &self.repository,
            issuer: self.issuer.as_ref(),
            discovery: self.discovery.as_ref(),
            upstream_jwks: self.upstream_jwks.as_ref(),
            namespace: &self.namespace,
            host,
        }
    }

    /// The authenticator backing the request pipeline.
    pub fn authenticator(&self) -> Authenticator {
        Authenticator::new(
            self.issuer.clone(),
            Authorizer::new(self.repository.clone(), self.namespace.clone()),
        )
    }
}
