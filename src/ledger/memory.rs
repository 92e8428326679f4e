// src/ledger/memory.rs - In-process ledger and dependent-row stores
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{DependentStore, DependentTable, LedgerStore};
use crate::error::StorageError;
use crate::models::linking::{Decision, LinkingDecision};
use crate::models::records::{EntityId, EntityKind};

/// Ledger kept in memory. Same uniqueness and transition rules as the
/// database store; used by tests and dry runs.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<LinkingDecision>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

fn same_key(d: &LinkingDecision, kind: EntityKind, canonical_id: Option<EntityId>, signature: &str) -> bool {
    d.kind == kind && d.canonical_entity_id == canonical_id && d.messy_signature == signature
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn get_or_create_pending(
        &self,
        kind: EntityKind,
        canonical_id: Option<EntityId>,
        signature: &str,
    ) -> Result<(LinkingDecision, bool), StorageError> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.iter().find(|d| same_key(d, kind, canonical_id, signature)) {
            return Ok((existing.clone(), false));
        }
        let entry = LinkingDecision {
            id: entries.len() as i64 + 1,
            uuid: Uuid::new_v4(),
            kind,
            canonical_entity_id: canonical_id,
            messy_signature: signature.to_string(),
            decision: Decision::Pending,
            created_at: Utc::now(),
            decided_at: None,
        };
        entries.push(entry.clone());
        Ok((entry, true))
    }

    async fn find_approved(
        &self,
        kind: EntityKind,
        signature: &str,
    ) -> Result<Option<LinkingDecision>, StorageError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|d| {
                d.kind == kind && d.messy_signature == signature && d.decision == Decision::Approved
            })
            .max_by_key(|d| (d.decided_at, d.id))
            .cloned())
    }

    async fn find(
        &self,
        kind: EntityKind,
        canonical_id: Option<EntityId>,
        signature: &str,
    ) -> Result<Option<LinkingDecision>, StorageError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .find(|d| same_key(d, kind, canonical_id, signature))
            .cloned())
    }

    async fn get(&self, linking_id: Uuid) -> Result<Option<LinkingDecision>, StorageError> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().find(|d| d.uuid == linking_id).cloned())
    }

    async fn list_pending(
        &self,
        kind: Option<EntityKind>,
    ) -> Result<Vec<LinkingDecision>, StorageError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|d| d.decision == Decision::Pending && kind.map_or(true, |k| d.kind == k))
            .cloned()
            .collect())
    }

    async fn set_decision(
        &self,
        linking_id: Uuid,
        decision: Decision,
        canonical_id: Option<EntityId>,
    ) -> Result<Option<LinkingDecision>, StorageError> {
        let mut entries = self.entries.lock().await;
        let Some(pos) = entries
            .iter()
            .position(|d| d.uuid == linking_id && d.decision == Decision::Pending)
        else {
            return Ok(None);
        };
        let (kind, signature) = (entries[pos].kind, entries[pos].messy_signature.clone());
        let clash = entries
            .iter()
            .enumerate()
            .any(|(i, d)| i != pos && same_key(d, kind, canonical_id, &signature));
        if clash {
            return Err(StorageError::UniqueViolation(format!(
                "linking_decision ({}, {:?}, {})",
                kind, canonical_id, signature
            )));
        }

        let entry = &mut entries[pos];
        entry.decision = decision;
        entry.canonical_entity_id = canonical_id;
        entry.decided_at = Some(Utc::now());
        Ok(Some(entry.clone()))
    }
}

/// One dependent row: a natural key (e.g. the vote it records) plus the
/// entity reference and its pending tag.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRow {
    pub id: i64,
    pub table: &'static str,
    pub fk_column: &'static str,
    pub natural_key: String,
    pub fk: Option<EntityId>,
    pub tag: Option<Uuid>,
}

/// Dependent rows with `(table, fk column, natural key, fk)` uniqueness,
/// mirroring the constraints of the real tables.
#[derive(Default)]
pub struct MemoryDependentStore {
    rows: Mutex<Vec<MemoryRow>>,
}

fn conflicts(rows: &[MemoryRow], candidate: &MemoryRow) -> bool {
    candidate.fk.is_some()
        && rows.iter().any(|r| {
            r.id != candidate.id
                && r.table == candidate.table
                && r.fk_column == candidate.fk_column
                && r.natural_key == candidate.natural_key
                && r.fk == candidate.fk
        })
}

fn violation(table: &DependentTable, row: &MemoryRow) -> StorageError {
    StorageError::UniqueViolation(format!(
        "{} ({}, {}={:?})",
        table.table, row.natural_key, table.fk_column, row.fk
    ))
}

fn in_table(row: &MemoryRow, table: &DependentTable) -> bool {
    row.table == table.table && row.fk_column == table.fk_column
}

impl MemoryDependentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(
        &self,
        table: &DependentTable,
        natural_key: &str,
        fk: Option<EntityId>,
        tag: Option<Uuid>,
    ) -> Result<i64, StorageError> {
        let mut rows = self.rows.lock().await;
        let row = MemoryRow {
            id: rows.iter().map(|r| r.id).max().unwrap_or(0) + 1,
            table: table.table,
            fk_column: table.fk_column,
            natural_key: natural_key.to_string(),
            fk,
            tag,
        };
        if conflicts(&rows, &row) {
            return Err(violation(table, &row));
        }
        let id = row.id;
        rows.push(row);
        Ok(id)
    }

    pub async fn row(&self, id: i64) -> Option<MemoryRow> {
        self.rows.lock().await.iter().find(|r| r.id == id).cloned()
    }
}

#[async_trait]
impl DependentStore for MemoryDependentStore {
    async fn bulk_relink(
        &self,
        table: &DependentTable,
        linking_id: Uuid,
        canonical_id: EntityId,
    ) -> Result<u64, StorageError> {
        let mut rows = self.rows.lock().await;
        let mut staged = rows.clone();
        let mut updated = 0;
        for row in staged.iter_mut() {
            if in_table(row, table) && row.tag == Some(linking_id) {
                row.fk = Some(canonical_id);
                updated += 1;
            }
        }
        if let Some(bad) = staged.iter().find(|r| conflicts(&staged, r)) {
            return Err(violation(table, bad));
        }
        *rows = staged;
        Ok(updated)
    }

    async fn tagged_rows(
        &self,
        table: &DependentTable,
        linking_id: Uuid,
    ) -> Result<Vec<i64>, StorageError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|r| in_table(r, table) && r.tag == Some(linking_id))
            .map(|r| r.id)
            .collect())
    }

    async fn relink_row(
        &self,
        table: &DependentTable,
        row_id: i64,
        canonical_id: EntityId,
    ) -> Result<(), StorageError> {
        let mut rows = self.rows.lock().await;
        let Some(pos) = rows.iter().position(|r| r.id == row_id && in_table(r, table)) else {
            return Ok(());
        };
        let mut candidate = rows[pos].clone();
        candidate.fk = Some(canonical_id);
        if conflicts(&rows, &candidate) {
            return Err(violation(table, &candidate));
        }
        rows[pos] = candidate;
        Ok(())
    }

    async fn delete_row(&self, table: &DependentTable, row_id: i64) -> Result<(), StorageError> {
        let mut rows = self.rows.lock().await;
        rows.retain(|r| !(r.id == row_id && in_table(r, table)));
        Ok(())
    }

    async fn clear_links(&self, table: &DependentTable, linking_id: Uuid) -> Result<u64, StorageError> {
        let mut rows = self.rows.lock().await;
        let mut cleared = 0;
        for row in rows.iter_mut().filter(|r| in_table(r, table) && r.tag == Some(linking_id)) {
            row.fk = None;
            row.tag = None;
            cleared += 1;
        }
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static VOTE: DependentTable = DependentTable {
        table: "vote",
        fk_column: "person_id",
        tag_column: "person_linking_id",
    };

    #[tokio::test]
    async fn test_concurrent_get_or_create_yields_one_entry() {
        let ledger = std::sync::Arc::new(MemoryLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .get_or_create_pending(EntityKind::Person, Some(5), "ana rodriguez")
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut created = 0;
        let mut uuids = std::collections::HashSet::new();
        for handle in handles {
            let (entry, was_created) = handle.await.unwrap();
            created += was_created as usize;
            uuids.insert(entry.uuid);
        }
        assert_eq!(created, 1);
        assert_eq!(uuids.len(), 1);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates() {
        let store = MemoryDependentStore::new();
        store.insert(&VOTE, "vote/9", Some(2), None).await.unwrap();
        assert!(matches!(
            store.insert(&VOTE, "vote/9", Some(2), None).await,
            Err(StorageError::UniqueViolation(_))
        ));
        store.insert(&VOTE, "vote/9", None, Some(Uuid::new_v4())).await.unwrap();
    }

    #[tokio::test]
    async fn test_bulk_relink_is_all_or_nothing() {
        let store = MemoryDependentStore::new();
        let tag = Uuid::new_v4();
        store.insert(&VOTE, "vote/1", Some(2), None).await.unwrap();
        let a = store.insert(&VOTE, "vote/1", None, Some(tag)).await.unwrap();
        let b = store.insert(&VOTE, "vote/2", None, Some(tag)).await.unwrap();

        assert!(store.bulk_relink(&VOTE, tag, 2).await.is_err());
        assert_eq!(store.row(a).await.unwrap().fk, None);
        assert_eq!(store.row(b).await.unwrap().fk, None);
    }
}
