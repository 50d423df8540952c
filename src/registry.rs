use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::{ApprovalState, Resource, ResourceId};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    #[error("catalog io: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog format: {0}")]
    Format(#[from] serde_json::Error),
}

/// Read-only view of the resource catalog. The approval workflow that owns
/// `approval_state` lives elsewhere; the engine never writes through this.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    async fn get_resource(&self, id: &str) -> Result<Option<Resource>, RegistryError>;
}

/// Catalog held in memory. Used by the binary (seeded from a JSON file) and by tests.
#[derive(Default)]
pub struct InMemoryRegistry {
    resources: DashMap<ResourceId, Resource>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of resources, e.g.
    /// `[{"id": "V1", "owner_id": "host-1", "approval_state": "approved"}]`.
    pub fn from_json_file(path: &Path) -> Result<Self, RegistryError> {
        let bytes = std::fs::read(path)?;
        let resources: Vec<Resource> = serde_json::from_slice(&bytes)?;
        let registry = Self::new();
        for resource in resources {
            registry.upsert(resource);
        }
        Ok(registry)
    }

    pub fn upsert(&self, resource: Resource) {
        self.resources.insert(resource.id.clone(), resource);
    }

    pub fn insert(&self, id: &str, owner_id: &str, approval_state: ApprovalState) {
        self.upsert(Resource {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            approval_state,
        });
    }

    /// Stand-in for the external approval workflow.
    pub fn set_approval_state(&self, id: &str, approval_state: ApprovalState) -> bool {
        match self.resources.get_mut(id) {
            Some(mut entry) => {
                entry.approval_state = approval_state;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[async_trait]
impl ResourceRegistry for InMemoryRegistry {
    async fn get_resource(&self, id: &str) -> Result<Option<Resource>, RegistryError> {
        Ok(self.resources.get(id).map(|e| e.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn lookup_and_approval_changes() {
        let registry = InMemoryRegistry::new();
        registry.insert("V1", "host-1", ApprovalState::Pending);

        let v1 = registry.get_resource("V1").await.unwrap().unwrap();
        assert_eq!(v1.owner_id, "host-1");
        assert!(!v1.approval_state.is_bookable());

        assert!(registry.set_approval_state("V1", ApprovalState::Approved));
        let v1 = registry.get_resource("V1").await.unwrap().unwrap();
        assert!(v1.approval_state.is_bookable());

        assert!(!registry.set_approval_state("V9", ApprovalState::Approved));
        assert!(registry.get_resource("V9").await.unwrap().is_none());
    }

    #[test]
    fn loads_catalog_file() {
        let dir = std::env::temp_dir().join("fleetlock_test_registry");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("catalog.json");
        fs::write(
            &path,
            r#"[
                {"id": "V1", "owner_id": "host-1", "approval_state": "approved"},
                {"id": "V2", "owner_id": "host-2", "approval_state": "draft"}
            ]"#,
        )
        .unwrap();

        let registry = InMemoryRegistry::from_json_file(&path).unwrap();
        assert_eq!(registry.len(), 2);

        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            InMemoryRegistry::from_json_file(&path),
            Err(RegistryError::Format(_))
        ));
        let _ = fs::remove_file(&path);
    }
}
