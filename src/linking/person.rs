// src/linking/person.rs
use futures::future::BoxFuture;

use super::registry::RegistryStore;
use super::EntitySchema;
use crate::error::StorageError;
use crate::matching::normalize::{normalize_given_name, normalize_value};
use crate::models::records::{CanonicalPerson, ComparisonRecord, EntityId, EntityKind, MessyPerson};

/// Persons compare on given name (honorifics dropped) and last name.
pub struct PersonSchema;

fn record(id: Option<EntityId>, name: &str, last_name: &str) -> ComparisonRecord {
    ComparisonRecord::new(
        id,
        [
            ("name", normalize_given_name(name)),
            ("last_name", normalize_value(last_name)),
        ],
    )
}

fn exact_key(name: &str, last_name: &str) -> String {
    format!("{} {}", normalize_given_name(name), normalize_value(last_name))
        .trim()
        .to_string()
}

impl EntitySchema for PersonSchema {
    type Canonical = CanonicalPerson;
    type Messy = MessyPerson;

    const KIND: EntityKind = EntityKind::Person;
    const FK_COLUMN: &'static str = "person_id";

    fn load_registry(
        registry: &dyn RegistryStore,
    ) -> BoxFuture<'_, Result<Vec<CanonicalPerson>, StorageError>> {
        registry.load_persons()
    }

    fn canonical_id(canonical: &CanonicalPerson) -> EntityId {
        canonical.id
    }

    fn canonical_record(canonical: &CanonicalPerson) -> ComparisonRecord {
        record(Some(canonical.id), &canonical.name, &canonical.last_name)
    }

    fn messy_record(messy: &MessyPerson) -> ComparisonRecord {
        record(None, &messy.name, &messy.last_name)
    }

    fn canonical_exact_key(canonical: &CanonicalPerson) -> String {
        exact_key(&canonical.name, &canonical.last_name)
    }

    fn messy_exact_key(messy: &MessyPerson) -> String {
        exact_key(&messy.name, &messy.last_name)
    }
}
