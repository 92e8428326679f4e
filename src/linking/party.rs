// src/linking/party.rs
use futures::future::BoxFuture;

use super::registry::RegistryStore;
use super::EntitySchema;
use crate::error::StorageError;
use crate::matching::normalize::normalize_denomination;
use crate::models::records::{CanonicalParty, ComparisonRecord, EntityId, EntityKind, MessyParty};

/// Parties compare on denomination only. `alternate_denomination` rides
/// along on the row untouched so writers can restore the source spelling.
pub struct PartySchema;

impl EntitySchema for PartySchema {
    type Canonical = CanonicalParty;
    type Messy = MessyParty;

    const KIND: EntityKind = EntityKind::Party;
    const FK_COLUMN: &'static str = "party_id";

    fn load_registry(
        registry: &dyn RegistryStore,
    ) -> BoxFuture<'_, Result<Vec<CanonicalParty>, StorageError>> {
        registry.load_parties()
    }

    fn canonical_id(canonical: &CanonicalParty) -> EntityId {
        canonical.id
    }

    fn canonical_record(canonical: &CanonicalParty) -> ComparisonRecord {
        ComparisonRecord::new(
            Some(canonical.id),
            [("denomination", normalize_denomination(&canonical.denomination))],
        )
    }

    fn messy_record(messy: &MessyParty) -> ComparisonRecord {
        ComparisonRecord::new(None, [("denomination", normalize_denomination(&messy.denomination))])
    }

    fn canonical_exact_key(canonical: &CanonicalParty) -> String {
        normalize_denomination(&canonical.denomination)
    }

    fn messy_exact_key(messy: &MessyParty) -> String {
        normalize_denomination(&messy.denomination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::{MemoryDependentStore, MemoryLedger};
    use crate::ledger::Ledger;
    use crate::linking::registry::MemoryRegistry;
    use crate::linking::Linker;
    use crate::matching::matcher::EditDistanceMatcher;
    use crate::models::linking::LinkStatus;
    use crate::models::records::MessyRow;
    use crate::utils::config::LinkingConfig;
    use std::sync::Arc;

    fn party(denomination: &str, alternate: Option<&str>) -> MessyParty {
        MessyParty {
            denomination: denomination.into(),
            alternate_denomination: alternate.map(String::from),
        }
    }

    #[test]
    fn test_alternate_denomination_is_not_compared() {
        let a = PartySchema::messy_record(&party("Frente Amplio", Some("F.A.")));
        let b = PartySchema::messy_record(&party("FRENTE  AMPLIO", None));
        assert!(a.same_fields(&b));
        assert_eq!(a.fields.len(), 1);
    }

    #[test]
    fn test_ampersand_reads_as_conjunction() {
        assert_eq!(
            PartySchema::messy_exact_key(&party("Trabajo & Justicia", None)),
            "trabajo y justicia"
        );
    }

    #[tokio::test]
    async fn test_party_linking_passes_alternate_through() {
        let dir = tempfile::tempdir().unwrap();
        let config = LinkingConfig {
            training_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let registry = MemoryRegistry::with_entities(
            vec![],
            vec![
                CanonicalParty { id: 10, denomination: "Frente Amplio".into() },
                CanonicalParty { id: 11, denomination: "Partido Nacional".into() },
            ],
        );
        let ledger = Ledger::new(Arc::new(MemoryLedger::new()), Arc::new(MemoryDependentStore::new()));
        let mut linker: Linker<PartySchema> =
            Linker::new(Box::new(EditDistanceMatcher), Arc::new(registry), ledger, &config);

        let (rows, _) = linker
            .link(vec![
                MessyRow::new("seat/1", party("FRENTE AMPLIO", Some("Frente Amplio (FA)"))),
                MessyRow::new("seat/2", party("Partido Colorado", Some("P. Colorado"))),
            ])
            .await
            .unwrap();

        assert_eq!(rows[0].status, LinkStatus::Certain);
        assert_eq!(rows[0].canonical_id, Some(10));
        assert_eq!(
            rows[0].record.alternate_denomination.as_deref(),
            Some("Frente Amplio (FA)")
        );
        // 0.5625 against "partido nacional" falls inside (0.05625, 0.6)
        assert_eq!(rows[1].status, LinkStatus::Dubious);
        assert_eq!(rows[1].record.alternate_denomination.as_deref(), Some("P. Colorado"));
    }
}
