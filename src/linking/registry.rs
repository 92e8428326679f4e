// src/linking/registry.rs - Canonical registry access
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::models::records::{CanonicalParty, CanonicalPerson, EntityId};

/// Read and upsert access to canonical entities. The linking engine only
/// reads; upserts come from adjudication ("create new entity").
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn load_persons(&self) -> Result<Vec<CanonicalPerson>, StorageError>;

    async fn load_parties(&self) -> Result<Vec<CanonicalParty>, StorageError>;

    /// Inserts the person unless one with the same name and last name
    /// exists; returns the id either way.
    async fn upsert_person(&self, name: &str, last_name: &str) -> Result<EntityId, StorageError>;

    async fn upsert_party(&self, denomination: &str) -> Result<EntityId, StorageError>;
}

#[derive(Default)]
struct Registry {
    persons: Vec<CanonicalPerson>,
    parties: Vec<CanonicalParty>,
}

impl Registry {
    fn next_id(&self) -> EntityId {
        self.persons
            .iter()
            .map(|p| p.id)
            .chain(self.parties.iter().map(|p| p.id))
            .max()
            .unwrap_or(0)
            + 1
    }
}

#[derive(Default)]
pub struct MemoryRegistry {
    inner: Mutex<Registry>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(persons: Vec<CanonicalPerson>, parties: Vec<CanonicalParty>) -> Self {
        Self {
            inner: Mutex::new(Registry { persons, parties }),
        }
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistry {
    async fn load_persons(&self) -> Result<Vec<CanonicalPerson>, StorageError> {
        Ok(self.inner.lock().await.persons.clone())
    }

    async fn load_parties(&self) -> Result<Vec<CanonicalParty>, StorageError> {
        Ok(self.inner.lock().await.parties.clone())
    }

    async fn upsert_person(&self, name: &str, last_name: &str) -> Result<EntityId, StorageError> {
        let mut registry = self.inner.lock().await;
        if let Some(p) = registry
            .persons
            .iter()
            .find(|p| p.name == name && p.last_name == last_name)
        {
            return Ok(p.id);
        }
        let id = registry.next_id();
        registry.persons.push(CanonicalPerson {
            id,
            name: name.to_string(),
            last_name: last_name.to_string(),
        });
        Ok(id)
    }

    async fn upsert_party(&self, denomination: &str) -> Result<EntityId, StorageError> {
        let mut registry = self.inner.lock().await;
        if let Some(p) = registry.parties.iter().find(|p| p.denomination == denomination) {
            return Ok(p.id);
        }
        let id = registry.next_id();
        registry.parties.push(CanonicalParty {
            id,
            denomination: denomination.to_string(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_is_keyed_by_natural_key() {
        let registry = MemoryRegistry::new();
        let a = registry.upsert_person("Juan", "Perez").await.unwrap();
        let b = registry.upsert_person("Juan", "Perez").await.unwrap();
        let c = registry.upsert_party("Frente Amplio").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.load_persons().await.unwrap().len(), 1);
        assert_eq!(registry.load_parties().await.unwrap()[0].id, c);
    }
}
