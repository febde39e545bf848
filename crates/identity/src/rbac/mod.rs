//! ACL resolution over the organization / group / role model.

use std::collections::BTreeSet;

use serde::Serialize;
use shared::error::CommonError;
use utoipa::ToSchema;

use crate::repository::ResourceStore;
use crate::resources::{Group, Organization, Role, User};

/// Effective permission set for a principal, optionally scoped to an
/// organization. Computed by unioning the roles of the user's groups.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct Acl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub permissions: BTreeSet<String>,
}

impl Acl {
    pub fn allows(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Builds ACLs from the tenant model.
#[derive(Clone)]
pub struct Authorizer<S> {
    store: S,
    namespace: String,
}

impl<S: ResourceStore> Authorizer<S> {
    pub fn new(store: S, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Resolve the ACL for a subject within an organization. Without an
    /// organization there is nothing tenant-scoped to union, so the result
    /// is a globally-scoped, empty permission set.
    pub async fn get_acl(
        &self,
        subject: &str,
        organization_id: Option<&str>,
    ) -> Result<Acl, CommonError> {
        let Some(organization_id) = organization_id else {
            return Ok(Acl::default());
        };

        let organization: Organization =
            self.store.get(&self.namespace, organization_id).await?;

        let users: Vec<User> = self.store.list(&organization.namespace, None).await?;

        let Some(user) = users.into_iter().find(|u| u.subject == subject) else {
            // Not a member: scoped, but entitled to nothing.
            return Ok(Acl {
                organization_id: Some(organization_id.to_string()),
                permissions: BTreeSet::new(),
            });
        };

        let groups: Vec<Group> = self.store.list(&organization.namespace, None).await?;

        let role_ids: BTreeSet<&str> = groups
            .iter()
            .filter(|g| g.user_ids.contains(&user.metadata.name))
            .flat_map(|g| g.role_ids.iter())
            .map(String::as_str)
            .collect();

        let mut permissions = BTreeSet::new();

        for role_id in role_ids {
            let role: Role = self.store.get(&self.namespace, role_id).await?;
            permissions.extend(role.permissions.iter().cloned());
        }

        Ok(Acl {
            organization_id: Some(organization_id.to_string()),
            permissions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;
    use crate::resources::{Metadata, NAME_LABEL, ORGANIZATION_LABEL};

    async fn seeded_repository() -> Repository {
        let repository = Repository::new();

        repository
            .create(&Organization {
                metadata: Metadata::new("default", "acme-org"),
                domain: "acme.test".to_string(),
                provider_name: "primary".to_string(),
                namespace: "org-acme".to_string(),
            })
            .await
            .unwrap();

        repository
            .create(&Role {
                metadata: Metadata::new("default", "role-reader"),
                permissions: vec!["projects:read".to_string()],
            })
            .await
            .unwrap();

        repository
            .create(&Role {
                metadata: Metadata::new("default", "role-admin"),
                permissions: vec!["projects:read".to_string(), "projects:write".to_string()],
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

        repository
            .create(&Group {
                metadata: Metadata::new("org-acme", "group-2")
                    .with_label(NAME_LABEL, "admins")
                    .with_label(ORGANIZATION_LABEL, "acme-org"),
                role_ids: vec!["role-admin".to_string()],
                user_ids: vec!["user-1".to_string()],
            })
            .await
            .unwrap();

        repository
    }

    #[tokio::test]
    async fn acl_unions_roles_across_groups() {
        let authorizer = Authorizer::new(seeded_repository().await, "default");

        let acl = authorizer
            .get_acl("alice@acme.test", Some("acme-org"))
            .await
            .unwrap();

        assert_eq!(acl.organization_id.as_deref(), Some("acme-org"));
        assert!(acl.allows("projects:read"));
        assert!(acl.allows("projects:write"));
        assert_eq!(acl.permissions.len(), 2);
    }

    #[tokio::test]
    async fn unknown_subject_gets_an_empty_acl() {
        let authorizer = Authorizer::new(seeded_repository().await, "default");

        let acl = authorizer
            .get_acl("mallory@acme.test", Some("acme-org"))
            .await
            .unwrap();

        assert!(acl.permissions.is_empty());
    }

    #[tokio::test]
    async fn missing_organization_parameter_yields_a_global_acl() {
        let authorizer = Authorizer::new(seeded_repository().await, "default");

        let acl = authorizer.get_acl("alice@acme.test", None).await.unwrap();

        assert!(acl.organization_id.is_none());
        assert!(acl.permissions.is_empty());
    }

    #[tokio::test]
    async fn unknown_organization_is_an_error() {
        let authorizer = Authorizer::new(seeded_repository().await, "default");

        let err = authorizer
            .get_acl("alice@acme.test", Some("ghost-org"))
            .await
            .unwrap_err();

        assert!(matches!(err, CommonError::NotFound { .. }));
    }
}
