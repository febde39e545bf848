//! Typed tenant resources.
//!
//! Server-global resources (clients, providers, organizations, roles) live in
//! the service's configured namespace; per-tenant resources (groups, users)
//! live in the owning organization's namespace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label carrying the human-chosen resource name.
pub const NAME_LABEL: &str = "identity.io/name";

/// Label tying per-organization resources back to their organization.
pub const ORGANIZATION_LABEL: &str = "identity.io/organization";

/// Common identification shared by every resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }
}

/// A resource the repository can store and retrieve by namespace and name.
pub trait Resource:
    Clone + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static
{
    const KIND: &'static str;

    fn metadata(&self) -> &Metadata;
}

/// A registered downstream relying party.
///
/// `id` is the `client_id` presented on `/authorize`; the redirect URI must
/// match requests byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Client {
    pub metadata: Metadata,
    pub id: String,
    pub redirect_uri: String,
}

impl Resource for OAuth2Client {
    const KIND: &'static str = "oauth2clients";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// Upstream provider family tag. Selection is total: anything we do not
/// recognise runs the generic OIDC path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Null,
    Generic,
    #[serde(other)]
    Unknown,
}

/// A configured upstream identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Provider {
    pub metadata: Metadata,
    #[serde(rename = "type", default)]
    pub kind: ProviderKind,
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Resource for OAuth2Provider {
    const KIND: &'static str = "oauth2providers";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// A tenant. The email domain routes users here, the provider reference says
/// where they authenticate, and `namespace` holds the per-tenant resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub metadata: Metadata,
    pub domain: String,
    pub provider_name: String,
    pub namespace: String,
}

impl Resource for Organization {
    const KIND: &'static str = "organizations";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// Membership and role binding within an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub metadata: Metadata,
    #[serde(default)]
    pub role_ids: Vec<String>,
    #[serde(default)]
    pub user_ids: Vec<String>,
}

impl Resource for Group {
    const KIND: &'static str = "groups";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// A named capability bundle referenced by groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub metadata: Metadata,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Resource for Role {
    const KIND: &'static str = "roles";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// A principal within an organization. The subject is the canonical
/// identifier, typically the verified email from the upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub metadata: Metadata,
    pub subject: String,
}

impl Resource for User {
    const KIND: &'static str = "users";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}
