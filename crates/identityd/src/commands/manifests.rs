//! Resource manifests: the file-backed seed for the in-memory repository.
//!
//! Each manifest is a JSON file carrying a `kind` tag alongside the resource
//! fields. The admin commands write them; `serve` loads every manifest in
//! the configured directory at startup.

use std::path::{Path, PathBuf};

use identity::repository::{Repository, ResourceStore};
use identity::resources::{Group, OAuth2Client, OAuth2Provider, Organization, Resource, Role, User};
use serde::{Deserialize, Serialize};
use shared::error::CommonError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    OAuth2Client(OAuth2Client),
    OAuth2Provider(OAuth2Provider),
    Organization(Organization),
    Group(Group),
    Role(Role),
    User(User),
}

impl Manifest {
    pub async fn create_in(&self, repository: &Repository) -> Result<(), CommonError> {
        match self {
            Manifest::OAuth2Client(resource) => repository.create(resource).await,
            Manifest::OAuth2Provider(resource) => repository.create(resource).await,
            Manifest::Organization(resource) => repository.create(resource).await,
            Manifest::Group(resource) => repository.create(resource).await,
            Manifest::Role(resource) => repository.create(resource).await,
            Manifest::User(resource) => repository.create(resource).await,
        }
    }

    fn file_name(&self) -> String {
        let (kind, name) = match self {
            Manifest::OAuth2Client(r) => (OAuth2Client::KIND, &r.metadata.name),
            Manifest::OAuth2Provider(r) => (OAuth2Provider::KIND, &r.metadata.name),
            Manifest::Organization(r) => (Organization::KIND, &r.metadata.name),
            Manifest::Group(r) => (Group::KIND, &r.metadata.name),
            Manifest::Role(r) => (Role::KIND, &r.metadata.name),
            Manifest::User(r) => (User::KIND, &r.metadata.name),
        };

        format!("{kind}-{name}.json")
    }
}

/// Load every manifest in a directory into the repository.
pub async fn load_dir(repository: &Repository, dir: &Path) -> Result<usize, CommonError> {
    let mut count = 0;

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let contents = std::fs::read_to_string(&path)?;

        let manifest: Manifest =
            serde_json::from_str(&contents).map_err(|e| CommonError::Validation {
                msg: format!("manifest {} is malformed: {e}", path.display()),
            })?;

        manifest.create_in(repository).await?;
        count += 1;
    }

    Ok(count)
}

/// Persist a new manifest alongside its siblings.
pub fn write(dir: &Path, manifest: &Manifest) -> Result<PathBuf, CommonError> {
    std::fs::create_dir_all(dir)?;

    let path = dir.join(manifest.file_name());

    if path.exists() {
        return Err(CommonError::AlreadyExists {
            msg: format!("{} already exists", path.display()),
        });
    }

    std::fs::write(&path, serde_json::to_string_pretty(manifest)?)?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use identity::repository::ResourceStore;
    use identity::resources::Metadata;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("identityd-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn manifests_roundtrip_through_the_directory() {
        let dir = scratch_dir();

        let role = Role {
            metadata: Metadata::new("default", "role-1"),
            permissions: vec!["projects:read".to_string()],
        };

        write(&dir, &Manifest::Role(role.clone())).unwrap();

        let repository = Repository::new();
        let count = load_dir(&repository, &dir).await.unwrap();
        assert_eq!(count, 1);

        let loaded: Role = repository.get("default", "role-1").await.unwrap();
        assert_eq!(loaded, role);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn duplicate_manifests_are_rejected() {
        let dir = scratch_dir();

        let role = Role {
            metadata: Metadata::new("default", "role-1"),
            permissions: vec![],
        };

        write(&dir, &Manifest::Role(role.clone())).unwrap();

        let err = write(&dir, &Manifest::Role(role)).unwrap_err();
        assert!(matches!(err, CommonError::AlreadyExists { .. }));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn manifest_json_carries_the_kind_tag() {
        let manifest = Manifest::Organization(Organization {
            metadata: Metadata::new("default", "org-1"),
            domain: "acme.test".to_string(),
            provider_name: "primary".to_string(),
            namespace: "org-acme".to_string(),
        });

        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["kind"], "Organization");
        assert_eq!(value["domain"], "acme.test");
    }
}
