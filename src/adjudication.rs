// src/adjudication.rs - Human resolution of pending linking decisions
use log::{info, warn};
use uuid::Uuid;

use crate::error::{LinkingError, LinkingResult};
use crate::ledger::Ledger;
use crate::linking::registry::RegistryStore;
use crate::models::linking::Decision;
use crate::models::records::{EntityId, EntityKind};
use crate::models::stats::FanOutReport;

/// A canonical entity to create when no registry entry fits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewEntity {
    Person { name: String, last_name: String },
    Party { denomination: String },
}

impl NewEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            NewEntity::Person { .. } => EntityKind::Person,
            NewEntity::Party { .. } => EntityKind::Party,
        }
    }
}

/// An operator's answer for one pending entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Same entity. `canonical_id` overrides or supplies the candidate.
    Approve { canonical_id: Option<EntityId> },
    Deny,
    /// Register a new canonical entity and approve the entry against it.
    CreateNew(NewEntity),
}

/// Resolves the entry and fans the outcome out before returning. `None`
/// means nothing changed (the entry was already decided).
pub async fn adjudicate(
    ledger: &Ledger,
    registry: &dyn RegistryStore,
    linking_id: Uuid,
    verdict: Verdict,
) -> LinkingResult<Option<FanOutReport>> {
    let entry = ledger
        .get(linking_id)
        .await?
        .ok_or(LinkingError::UnknownLinkingId(linking_id))?;
    if entry.decision.is_terminal() {
        warn!("{} is already {}; nothing to adjudicate", linking_id, entry.decision);
        return Ok(None);
    }

    let (decision, canonical_id) = match verdict {
        Verdict::Approve { canonical_id } => (Decision::Approved, canonical_id),
        Verdict::Deny => (Decision::Denied, None),
        Verdict::CreateNew(new) => {
            if new.kind() != entry.kind {
                warn!(
                    "Cannot create a {} for {} entry {}",
                    new.kind(),
                    entry.kind,
                    linking_id
                );
                return Ok(None);
            }
            let id = match &new {
                NewEntity::Person { name, last_name } => registry.upsert_person(name, last_name).await?,
                NewEntity::Party { denomination } => registry.upsert_party(denomination).await?,
            };
            info!("Registered new {} {} for {}", entry.kind, id, linking_id);
            (Decision::Approved, Some(id))
        }
    };

    if ledger.resolve(linking_id, decision, canonical_id).await?.is_none() {
        return Ok(None);
    }
    Ok(Some(ledger.fan_out(linking_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::{MemoryDependentStore, MemoryLedger};
    use crate::ledger::{dependent_tables, DependentTable};
    use crate::linking::registry::MemoryRegistry;
    use std::sync::Arc;

    fn vote() -> &'static DependentTable {
        &dependent_tables(EntityKind::Person)[0]
    }

    fn setup() -> (Ledger, Arc<MemoryDependentStore>, MemoryRegistry) {
        let deps = Arc::new(MemoryDependentStore::new());
        let ledger = Ledger::new(Arc::new(MemoryLedger::new()), deps.clone());
        (ledger, deps, MemoryRegistry::new())
    }

    #[tokio::test]
    async fn test_approve_fans_out_to_all_rows() {
        let (ledger, deps, registry) = setup();
        let (entry, _) = ledger
            .get_or_create_pending(EntityKind::Person, Some(1), "juan c perez")
            .await
            .unwrap();
        let mut rows = Vec::new();
        for i in 0..5 {
            rows.push(
                deps.insert(vote(), &format!("vote/{}", i), None, Some(entry.uuid))
                    .await
                    .unwrap(),
            );
        }

        let report = adjudicate(&ledger, &registry, entry.uuid, Verdict::Approve { canonical_id: None })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.updated, 5);
        for id in rows {
            assert_eq!(deps.row(id).await.unwrap().fk, Some(1));
        }

        // a second verdict is ignored
        assert!(adjudicate(&ledger, &registry, entry.uuid, Verdict::Deny)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_create_new_registers_and_links() {
        let (ledger, deps, registry) = setup();
        let (entry, _) = ledger
            .get_or_create_pending(EntityKind::Person, Some(1), "eustaquio quintero")
            .await
            .unwrap();
        let row = deps.insert(vote(), "vote/1", None, Some(entry.uuid)).await.unwrap();

        let verdict = Verdict::CreateNew(NewEntity::Person {
            name: "Eustaquio".into(),
            last_name: "Quintero".into(),
        });
        adjudicate(&ledger, &registry, entry.uuid, verdict).await.unwrap().unwrap();

        let persons = registry.load_persons().await.unwrap();
        assert_eq!(persons.len(), 1);
        let decided = ledger.get(entry.uuid).await.unwrap().unwrap();
        assert_eq!(decided.decision, Decision::Approved);
        assert_eq!(decided.canonical_entity_id, Some(persons[0].id));
        assert_eq!(deps.row(row).await.unwrap().fk, Some(persons[0].id));
    }

    #[tokio::test]
    async fn test_deny_leaves_rows_unlinked() {
        let (ledger, deps, registry) = setup();
        let (entry, _) = ledger
            .get_or_create_pending(EntityKind::Person, Some(1), "pedro perez")
            .await
            .unwrap();
        let row = deps.insert(vote(), "vote/1", None, Some(entry.uuid)).await.unwrap();

        let report = adjudicate(&ledger, &registry, entry.uuid, Verdict::Deny)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.cleared, 1);
        let stored = deps.row(row).await.unwrap();
        assert_eq!((stored.fk, stored.tag), (None, None));
    }

    #[tokio::test]
    async fn test_create_new_of_wrong_kind_is_refused() {
        let (ledger, _, registry) = setup();
        let (entry, _) = ledger
            .get_or_create_pending(EntityKind::Person, None, "ana")
            .await
            .unwrap();
        let verdict = Verdict::CreateNew(NewEntity::Party {
            denomination: "Ana".into(),
        });
        assert!(adjudicate(&ledger, &registry, entry.uuid, verdict).await.unwrap().is_none());
        assert!(registry.load_parties().await.unwrap().is_empty());
        assert_eq!(ledger.list_pending(None).await.unwrap().len(), 1);
    }
}
