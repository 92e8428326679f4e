// src/ledger/mod.rs - Linking decision ledger and fan-out onto dependent rows
pub mod db;
pub mod memory;

use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{LinkingError, LinkingResult, StorageError};
use crate::models::linking::{Decision, LinkingDecision};
use crate::models::records::{EntityId, EntityKind};
use crate::models::stats::FanOutReport;
use crate::utils::logging::LinkingLogger;

/// Durable store of adjudications, unique per
/// `(kind, canonical_entity_id, messy_signature)`. Entries are never deleted.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Returns the entry for the key, creating a PENDING one if none exists.
    /// The flag is true when this call created it. Must be safe under
    /// concurrent callers for the same key.
    async fn get_or_create_pending(
        &self,
        kind: EntityKind,
        canonical_id: Option<EntityId>,
        signature: &str,
    ) -> Result<(LinkingDecision, bool), StorageError>;

    /// Most recently APPROVED entry for a signature, whatever its canonical id.
    async fn find_approved(
        &self,
        kind: EntityKind,
        signature: &str,
    ) -> Result<Option<LinkingDecision>, StorageError>;

    /// The entry for exactly `(kind, canonical_id, signature)`, in any state.
    async fn find(
        &self,
        kind: EntityKind,
        canonical_id: Option<EntityId>,
        signature: &str,
    ) -> Result<Option<LinkingDecision>, StorageError>;

    async fn get(&self, linking_id: Uuid) -> Result<Option<LinkingDecision>, StorageError>;

    /// PENDING entries ordered by serial id, optionally for one kind.
    async fn list_pending(
        &self,
        kind: Option<EntityKind>,
    ) -> Result<Vec<LinkingDecision>, StorageError>;

    /// Moves a PENDING entry to `decision`. Returns `None` without touching
    /// anything when the entry is missing or no longer PENDING.
    async fn set_decision(
        &self,
        linking_id: Uuid,
        decision: Decision,
        canonical_id: Option<EntityId>,
    ) -> Result<Option<LinkingDecision>, StorageError>;
}

/// A table whose rows reference a canonical entity and may carry a linking
/// id while that reference is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependentTable {
    pub table: &'static str,
    pub fk_column: &'static str,
    pub tag_column: &'static str,
}

const PERSON_DEPENDENTS: &[DependentTable] = &[
    DependentTable { table: "vote", fk_column: "person_id", tag_column: "person_linking_id" },
    DependentTable { table: "authorship", fk_column: "person_id", tag_column: "person_linking_id" },
    DependentTable { table: "seat", fk_column: "person_id", tag_column: "person_linking_id" },
    DependentTable { table: "affidavit", fk_column: "person_id", tag_column: "person_linking_id" },
];

const PARTY_DEPENDENTS: &[DependentTable] = &[
    DependentTable { table: "vote", fk_column: "party_id", tag_column: "party_linking_id" },
    DependentTable { table: "seat", fk_column: "party_id", tag_column: "party_linking_id" },
];

pub fn dependent_tables(kind: EntityKind) -> &'static [DependentTable] {
    match kind {
        EntityKind::Person => PERSON_DEPENDENTS,
        EntityKind::Party => PARTY_DEPENDENTS,
    }
}

/// Write access to dependent rows, addressed by correlation tag.
#[async_trait]
pub trait DependentStore: Send + Sync {
    /// Points every row tagged with `linking_id` at `canonical_id` in one
    /// statement. Fails with [`StorageError::UniqueViolation`], changing
    /// nothing, if any updated row would duplicate an existing one.
    async fn bulk_relink(
        &self,
        table: &DependentTable,
        linking_id: Uuid,
        canonical_id: EntityId,
    ) -> Result<u64, StorageError>;

    async fn tagged_rows(
        &self,
        table: &DependentTable,
        linking_id: Uuid,
    ) -> Result<Vec<i64>, StorageError>;

    async fn relink_row(
        &self,
        table: &DependentTable,
        row_id: i64,
        canonical_id: EntityId,
    ) -> Result<(), StorageError>;

    async fn delete_row(&self, table: &DependentTable, row_id: i64) -> Result<(), StorageError>;

    /// Clears both the foreign key and the tag on every tagged row.
    async fn clear_links(&self, table: &DependentTable, linking_id: Uuid) -> Result<u64, StorageError>;
}

/// The ledger operations used by classification and adjudication.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    dependents: Arc<dyn DependentStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, dependents: Arc<dyn DependentStore>) -> Self {
        Self { store, dependents }
    }

    pub async fn get_or_create_pending(
        &self,
        kind: EntityKind,
        canonical_id: Option<EntityId>,
        signature: &str,
    ) -> LinkingResult<(LinkingDecision, bool)> {
        Ok(self.store.get_or_create_pending(kind, canonical_id, signature).await?)
    }

    /// Latest approval of the signature. An approval says which entity the
    /// signature is, so it applies before any candidate is known.
    pub async fn prior_approval(
        &self,
        kind: EntityKind,
        signature: &str,
    ) -> LinkingResult<Option<LinkingDecision>> {
        Ok(self.store.find_approved(kind, signature).await?)
    }

    /// Decision recorded for one candidate pair, if any.
    pub async fn pair_decision(
        &self,
        kind: EntityKind,
        canonical_id: EntityId,
        signature: &str,
    ) -> LinkingResult<Option<LinkingDecision>> {
        Ok(self.store.find(kind, Some(canonical_id), signature).await?)
    }

    pub async fn get(&self, linking_id: Uuid) -> LinkingResult<Option<LinkingDecision>> {
        Ok(self.store.get(linking_id).await?)
    }

    pub async fn list_pending(&self, kind: Option<EntityKind>) -> LinkingResult<Vec<LinkingDecision>> {
        Ok(self.store.list_pending(kind).await?)
    }

    /// PENDING → APPROVED/DENIED. Already-terminal or unknown entries are
    /// left alone and yield `None`. Approval needs a canonical id, either
    /// given here or already on the entry.
    pub async fn resolve(
        &self,
        linking_id: Uuid,
        decision: Decision,
        canonical_id: Option<EntityId>,
    ) -> LinkingResult<Option<LinkingDecision>> {
        let Some(entry) = self.store.get(linking_id).await? else {
            warn!("Cannot resolve unknown linking id {}", linking_id);
            return Ok(None);
        };
        if entry.decision.is_terminal() {
            warn!(
                "Linking id {} is already {}; ignoring {}",
                linking_id, entry.decision, decision
            );
            return Ok(None);
        }

        let target_id = match decision {
            Decision::Approved => Some(
                canonical_id
                    .or(entry.canonical_entity_id)
                    .ok_or(LinkingError::MissingCanonicalId(linking_id))?,
            ),
            Decision::Denied => entry.canonical_entity_id,
            Decision::Pending => {
                warn!("Refusing to resolve {} back to PENDING", linking_id);
                return Ok(None);
            }
        };

        let updated = match self.store.set_decision(linking_id, decision, target_id).await {
            Ok(updated) => updated,
            Err(StorageError::UniqueViolation(detail)) => {
                return Err(self.conflict(&entry, target_id, detail).await?);
            }
            Err(e) => return Err(e.into()),
        };
        match &updated {
            Some(d) => info!(
                "Resolved {} {} as {} (canonical id {:?})",
                d.kind, linking_id, d.decision, d.canonical_entity_id
            ),
            None => warn!("Linking id {} was resolved concurrently", linking_id),
        }
        Ok(updated)
    }

    /// Moving `entry` to `canonical_id` would duplicate another entry's key.
    async fn conflict(
        &self,
        entry: &LinkingDecision,
        canonical_id: Option<EntityId>,
        detail: String,
    ) -> LinkingResult<LinkingError> {
        let existing = self
            .store
            .find(entry.kind, canonical_id, &entry.messy_signature)
            .await?;
        match (existing, canonical_id) {
            (Some(existing), Some(canonical_id)) => {
                warn!(
                    "Cannot point {} at {} {}: '{}' already has entry {} ({}) for it",
                    entry.uuid,
                    entry.kind,
                    canonical_id,
                    entry.messy_signature,
                    existing.uuid,
                    existing.decision
                );
                Ok(LinkingError::ConflictingDecision {
                    linking_id: entry.uuid,
                    canonical_id,
                    existing: existing.uuid,
                })
            }
            _ => Ok(StorageError::UniqueViolation(detail).into()),
        }
    }

    /// Propagates a terminal decision to every dependent row tagged with
    /// `linking_id`.
    pub async fn fan_out(&self, linking_id: Uuid) -> LinkingResult<FanOutReport> {
        let entry = self
            .store
            .get(linking_id)
            .await?
            .ok_or(LinkingError::UnknownLinkingId(linking_id))?;
        let logger = LinkingLogger::new(entry.kind);
        let mut report = FanOutReport::default();

        match entry.decision {
            Decision::Pending => {
                logger.log_warning(&format!("Skipping fan-out of still pending {}", linking_id));
                return Ok(report);
            }
            Decision::Approved => {
                let canonical_id = entry
                    .canonical_entity_id
                    .ok_or(LinkingError::MissingCanonicalId(linking_id))?;
                for table in dependent_tables(entry.kind) {
                    self.relink_table(table, linking_id, canonical_id, &mut report)
                        .await?;
                }
            }
            Decision::Denied => {
                for table in dependent_tables(entry.kind) {
                    report.cleared += self.dependents.clear_links(table, linking_id).await?;
                }
            }
        }

        logger.log_fan_out(&linking_id, &report);
        Ok(report)
    }

    async fn relink_table(
        &self,
        table: &DependentTable,
        linking_id: Uuid,
        canonical_id: EntityId,
        report: &mut FanOutReport,
    ) -> LinkingResult<()> {
        match self.dependents.bulk_relink(table, linking_id, canonical_id).await {
            Ok(n) => {
                report.updated += n;
                return Ok(());
            }
            Err(StorageError::UniqueViolation(detail)) => {
                warn!(
                    "Bulk relink of {}.{} for {} hit a duplicate ({}); updating row by row",
                    table.table, table.fk_column, linking_id, detail
                );
                report.used_fallback = true;
            }
            Err(e) => return Err(e.into()),
        }

        for row_id in self.dependents.tagged_rows(table, linking_id).await? {
            match self.dependents.relink_row(table, row_id, canonical_id).await {
                Ok(()) => report.updated += 1,
                Err(StorageError::UniqueViolation(_)) => {
                    self.dependents.delete_row(table, row_id).await?;
                    report.deleted_duplicates += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryDependentStore, MemoryLedger};
    use super::*;

    static VOTE: DependentTable = DependentTable {
        table: "vote",
        fk_column: "person_id",
        tag_column: "person_linking_id",
    };
    static SEAT: DependentTable = DependentTable {
        table: "seat",
        fk_column: "person_id",
        tag_column: "person_linking_id",
    };

    fn ledger() -> (Ledger, Arc<MemoryDependentStore>) {
        let deps = Arc::new(MemoryDependentStore::new());
        (Ledger::new(Arc::new(MemoryLedger::new()), deps.clone()), deps)
    }

    #[tokio::test]
    async fn test_pending_entry_is_created_once() {
        let (ledger, _) = ledger();
        let (first, created) = ledger
            .get_or_create_pending(EntityKind::Person, Some(1), "juan c perez")
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.decision, Decision::Pending);

        let (second, created) = ledger
            .get_or_create_pending(EntityKind::Person, Some(1), "juan c perez")
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.uuid, second.uuid);

        let (other, created) = ledger
            .get_or_create_pending(EntityKind::Party, Some(1), "juan c perez")
            .await
            .unwrap();
        assert!(created);
        assert_ne!(other.uuid, first.uuid);
        assert_eq!(ledger.list_pending(Some(EntityKind::Person)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_is_terminal() {
        let (ledger, _) = ledger();
        let (entry, _) = ledger
            .get_or_create_pending(EntityKind::Person, Some(3), "ma gomez")
            .await
            .unwrap();

        let denied = ledger.resolve(entry.uuid, Decision::Denied, None).await.unwrap().unwrap();
        assert_eq!(denied.decision, Decision::Denied);
        assert!(denied.decided_at.is_some());

        assert!(ledger
            .resolve(entry.uuid, Decision::Approved, Some(3))
            .await
            .unwrap()
            .is_none());
        let prior = ledger
            .pair_decision(EntityKind::Person, 3, "ma gomez")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prior.decision, Decision::Denied);
        assert!(ledger.prior_approval(EntityKind::Person, "ma gomez").await.unwrap().is_none());
        assert!(ledger.list_pending(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approval_requires_canonical_id() {
        let (ledger, _) = ledger();
        let (entry, _) = ledger
            .get_or_create_pending(EntityKind::Party, None, "frente amplio")
            .await
            .unwrap();
        let err = ledger.resolve(entry.uuid, Decision::Approved, None).await.unwrap_err();
        assert!(matches!(err, LinkingError::MissingCanonicalId(id) if id == entry.uuid));

        let approved = ledger
            .resolve(entry.uuid, Decision::Approved, Some(12))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(approved.canonical_entity_id, Some(12));
    }

    #[tokio::test]
    async fn test_approval_onto_an_existing_pair_is_a_conflict() {
        let (ledger, _) = ledger();
        let (first, _) = ledger
            .get_or_create_pending(EntityKind::Person, Some(1), "juan c perez")
            .await
            .unwrap();
        let (second, _) = ledger
            .get_or_create_pending(EntityKind::Person, Some(2), "juan c perez")
            .await
            .unwrap();

        let err = ledger
            .resolve(first.uuid, Decision::Approved, Some(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LinkingError::ConflictingDecision { linking_id, canonical_id: 2, existing }
                if linking_id == first.uuid && existing == second.uuid
        ));
        // both entries are still open; approving the existing pair works
        assert_eq!(ledger.list_pending(None).await.unwrap().len(), 2);
        let approved = ledger
            .resolve(second.uuid, Decision::Approved, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(approved.canonical_entity_id, Some(2));
    }

    #[tokio::test]
    async fn test_unknown_linking_id() {
        let (ledger, _) = ledger();
        let id = Uuid::new_v4();
        assert!(ledger.resolve(id, Decision::Denied, None).await.unwrap().is_none());
        assert!(matches!(
            ledger.fan_out(id).await,
            Err(LinkingError::UnknownLinkingId(_))
        ));
    }

    #[tokio::test]
    async fn test_approved_fan_out_relinks_every_tagged_row() {
        let (ledger, deps) = ledger();
        let (entry, _) = ledger
            .get_or_create_pending(EntityKind::Person, Some(1), "juan c perez")
            .await
            .unwrap();
        let rows: Vec<i64> = vec![
            deps.insert(&VOTE, "vote/1", None, Some(entry.uuid)).await.unwrap(),
            deps.insert(&VOTE, "vote/2", None, Some(entry.uuid)).await.unwrap(),
            deps.insert(&SEAT, "seat/2019", None, Some(entry.uuid)).await.unwrap(),
        ];
        let untouched = deps.insert(&VOTE, "vote/3", None, Some(Uuid::new_v4())).await.unwrap();

        ledger.resolve(entry.uuid, Decision::Approved, None).await.unwrap();
        let report = ledger.fan_out(entry.uuid).await.unwrap();
        assert_eq!(report.updated, 3);
        assert_eq!(report.deleted_duplicates, 0);
        assert!(!report.used_fallback);

        for id in rows {
            assert_eq!(deps.row(id).await.unwrap().fk, Some(1));
        }
        assert_eq!(deps.row(untouched).await.unwrap().fk, None);
    }

    #[tokio::test]
    async fn test_approved_fan_out_deletes_duplicates() {
        let (ledger, deps) = ledger();
        let (entry, _) = ledger
            .get_or_create_pending(EntityKind::Person, Some(1), "juan c perez")
            .await
            .unwrap();
        let existing = deps.insert(&VOTE, "vote/1", Some(1), None).await.unwrap();
        let duplicate = deps.insert(&VOTE, "vote/1", None, Some(entry.uuid)).await.unwrap();
        let fresh = deps.insert(&VOTE, "vote/2", None, Some(entry.uuid)).await.unwrap();

        ledger.resolve(entry.uuid, Decision::Approved, None).await.unwrap();
        let report = ledger.fan_out(entry.uuid).await.unwrap();
        assert!(report.used_fallback);
        assert_eq!(report.updated, 1);
        assert_eq!(report.deleted_duplicates, 1);

        assert!(deps.row(duplicate).await.is_none());
        assert_eq!(deps.row(existing).await.unwrap().fk, Some(1));
        assert_eq!(deps.row(fresh).await.unwrap().fk, Some(1));
    }

    #[tokio::test]
    async fn test_denied_fan_out_clears_links() {
        let (ledger, deps) = ledger();
        let (entry, _) = ledger
            .get_or_create_pending(EntityKind::Person, Some(1), "pedro perez")
            .await
            .unwrap();
        let a = deps.insert(&VOTE, "vote/1", None, Some(entry.uuid)).await.unwrap();
        let b = deps.insert(&SEAT, "seat/1", None, Some(entry.uuid)).await.unwrap();

        ledger.resolve(entry.uuid, Decision::Denied, None).await.unwrap();
        let report = ledger.fan_out(entry.uuid).await.unwrap();
        assert_eq!(report.cleared, 2);
        for id in [a, b] {
            let row = deps.row(id).await.unwrap();
            assert_eq!(row.fk, None);
            assert_eq!(row.tag, None);
        }
    }

    #[tokio::test]
    async fn test_pending_fan_out_is_a_no_op() {
        let (ledger, deps) = ledger();
        let (entry, _) = ledger
            .get_or_create_pending(EntityKind::Person, Some(1), "pedro perez")
            .await
            .unwrap();
        let row = deps.insert(&VOTE, "vote/1", None, Some(entry.uuid)).await.unwrap();
        assert_eq!(ledger.fan_out(entry.uuid).await.unwrap(), FanOutReport::default());
        assert_eq!(deps.row(row).await.unwrap().tag, Some(entry.uuid));
    }
}
