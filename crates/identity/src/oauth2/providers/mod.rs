//! Upstream provider strategies.
//!
//! Providers share the generic OIDC flow; a strategy only contributes the
//! extra scopes it wants requested and a group-membership lookup.

mod null;

pub use null::NullProvider;

use async_trait::async_trait;
use shared::error::CommonError;

use crate::resources::ProviderKind;

/// Provider-specific extensions over the generic OIDC flow.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Extra scopes appended to the baseline `openid profile email` set.
    fn scopes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Upstream group memberships for the authenticated user.
    async fn groups(&self, _access_token: &str) -> Result<Vec<String>, CommonError> {
        Ok(Vec::new())
    }
}

static NULL_PROVIDER: NullProvider = NullProvider;

/// Select the strategy for a provider type. Selection is total: unknown
/// types run the generic OIDC path.
pub fn provider(kind: ProviderKind) -> &'static dyn Provider {
    match kind {
        ProviderKind::Null | ProviderKind::Generic | ProviderKind::Unknown => &NULL_PROVIDER,
    }
}
