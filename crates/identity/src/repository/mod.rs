//! Namespaced storage for tenant resources.

mod memory;

pub use memory::Repository;

use shared::error::CommonError;

use crate::resources::{Metadata, Resource};

/// Equality predicate over a single label key.
#[derive(Debug, Clone)]
pub struct LabelSelector {
    key: String,
    value: String,
}

impl LabelSelector {
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        metadata.labels.get(&self.key).is_some_and(|v| v == &self.value)
    }
}

/// Namespaced list/get/create over typed tenant resources.
///
/// The store is linearizable per object; nothing here is transactional
/// across objects.
#[allow(async_fn_in_trait)]
pub trait ResourceStore {
    async fn list<T: Resource>(
        &self,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<T>, CommonError>;

    async fn get<T: Resource>(&self, namespace: &str, name: &str) -> Result<T, CommonError>;

    async fn create<T: Resource>(&self, resource: &T) -> Result<(), CommonError>;
}
