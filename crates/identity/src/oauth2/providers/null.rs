use async_trait::async_trait;

use crate::oauth2::providers::Provider;

/// Generic OIDC with no provider-specific extensions.
pub struct NullProvider;

#[async_trait]
impl Provider for NullProvider {}
