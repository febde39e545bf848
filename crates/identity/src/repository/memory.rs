use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use shared::error::CommonError;

use crate::repository::{LabelSelector, ResourceStore};
use crate::resources::Resource;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct ObjectKey {
    kind: &'static str,
    namespace: String,
    name: String,
}

/// In-memory resource store. Entries are kept as JSON values so a single map
/// can hold every resource kind; per-object operations go through the map
/// entry API and are therefore linearizable.
#[derive(Clone, Default)]
pub struct Repository {
    objects: Arc<DashMap<ObjectKey, Value>>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceStore for Repository {
    async fn list<T: Resource>(
        &self,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<T>, CommonError> {
        let mut items = Vec::new();

        for entry in self.objects.iter() {
            if entry.key().kind != T::KIND || entry.key().namespace != namespace {
                continue;
            }

            let resource: T =
                serde_json::from_value(entry.value().clone()).map_err(|e| {
                    CommonError::Repository {
                        msg: format!("stored {} is not decodable", T::KIND),
                        source: Some(anyhow::Error::from(e)),
                    }
                })?;

            if selector.is_none_or(|s| s.matches(resource.metadata())) {
                items.push(resource);
            }
        }

        // Deterministic ordering for callers and tests alike.
        items.sort_by(|a, b| a.metadata().name.cmp(&b.metadata().name));

        Ok(items)
    }

    async fn get<T: Resource>(&self, namespace: &str, name: &str) -> Result<T, CommonError> {
        let key = ObjectKey {
            kind: T::KIND,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };

        let Some(value) = self.objects.get(&key) else {
            return Err(CommonError::NotFound {
                msg: format!("{} {namespace}/{name} not found", T::KIND),
                lookup_id: name.to_string(),
                source: None,
            });
        };

        serde_json::from_value(value.clone()).map_err(|e| CommonError::Repository {
            msg: format!("stored {} is not decodable", T::KIND),
            source: Some(anyhow::Error::from(e)),
        })
    }

    async fn create<T: Resource>(&self, resource: &T) -> Result<(), CommonError> {
        let metadata = resource.metadata();

        let key = ObjectKey {
            kind: T::KIND,
            namespace: metadata.namespace.clone(),
            name: metadata.name.clone(),
        };

        match self.objects.entry(key) {
            Entry::Occupied(_) => Err(CommonError::AlreadyExists {
                msg: format!(
                    "{} {}/{} already exists",
                    T::KIND,
                    metadata.namespace,
                    metadata.name
                ),
            }),
            Entry::Vacant(entry) => {
                entry.insert(serde_json::to_value(resource)?);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Metadata, NAME_LABEL, Role};

    fn role(namespace: &str, name: &str, label: &str) -> Role {
        Role {
            metadata: Metadata::new(namespace, name).with_label(NAME_LABEL, label),
            permissions: vec!["projects:read".to_string()],
        }
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let repository = Repository::new();
        let resource = role("default", "r-1", "reader");

        repository.create(&resource).await.unwrap();

        let fetched: Role = repository.get("default", "r-1").await.unwrap();
        assert_eq!(fetched, resource);
    }

    #[tokio::test]
    async fn create_twice_is_rejected() {
        let repository = Repository::new();
        let resource = role("default", "r-1", "reader");

        repository.create(&resource).await.unwrap();

        let err = repository.create(&resource).await.unwrap_err();
        assert!(matches!(err, CommonError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let repository = Repository::new();

        let err = repository.get::<Role>("default", "absent").await.unwrap_err();
        assert!(matches!(err, CommonError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_is_namespace_scoped_and_selectable() {
        let repository = Repository::new();
        repository.create(&role("default", "r-1", "reader")).await.unwrap();
        repository.create(&role("default", "r-2", "writer")).await.unwrap();
        repository.create(&role("other", "r-3", "reader")).await.unwrap();

        let all: Vec<Role> = repository.list("default", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let selector = LabelSelector::equals(NAME_LABEL, "writer");
        let writers: Vec<Role> = repository.list("default", Some(&selector)).await.unwrap();
        assert_eq!(writers.len(), 1);
        assert_eq!(writers[0].metadata.name, "r-2");
    }
}
