// src/linking/mod.rs - Entity-specific linkers over the shared classifier
pub mod db;
pub mod party;
pub mod person;
pub mod registry;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{LinkingResult, StorageError};
use crate::ledger::Ledger;
use crate::matching::classifier::{CanonicalEntry, Classifier, MessyEntry};
use crate::matching::corpus::TrainingCorpusStore;
use crate::matching::matcher::Matcher;
use crate::models::linking::{Decision, LinkStatus, LinkedRow, LinkingDecision};
use crate::models::records::{BatchKey, ComparisonRecord, EntityId, EntityKind, MessyRow};
use crate::models::stats::LinkingStats;
use crate::utils::config::LinkingConfig;
use registry::RegistryStore;

/// What the linker needs to know about one kind of entity: how to load its
/// registry, how to map both record shapes onto comparison records, and
/// which keys identify exact matches and ledger entries.
pub trait EntitySchema: Send + Sync + 'static {
    type Canonical: Clone + Send + Sync + 'static;
    type Messy: Clone + Send + Sync + Serialize + 'static;

    const KIND: EntityKind;
    /// Foreign-key column writers fill for certain matches.
    const FK_COLUMN: &'static str;

    fn load_registry(
        registry: &dyn RegistryStore,
    ) -> BoxFuture<'_, Result<Vec<Self::Canonical>, StorageError>>;

    fn canonical_id(canonical: &Self::Canonical) -> EntityId;
    fn canonical_record(canonical: &Self::Canonical) -> ComparisonRecord;
    fn messy_record(messy: &Self::Messy) -> ComparisonRecord;
    fn canonical_exact_key(canonical: &Self::Canonical) -> String;
    fn messy_exact_key(messy: &Self::Messy) -> String;

    /// Ledger key of a messy record.
    fn signature(messy: &Self::Messy) -> String {
        Self::messy_exact_key(messy)
    }
}

/// Links batches of one entity kind. Each ingestion job builds its own.
pub struct Linker<S: EntitySchema> {
    classifier: Classifier,
    registry: Arc<dyn RegistryStore>,
    ledger: Ledger,
    _schema: PhantomData<fn() -> S>,
}

impl<S: EntitySchema> Linker<S> {
    pub fn new(
        matcher: Box<dyn Matcher>,
        registry: Arc<dyn RegistryStore>,
        ledger: Ledger,
        config: &LinkingConfig,
    ) -> Self {
        let classifier = Classifier::new(
            S::KIND,
            matcher,
            TrainingCorpusStore::new(config.training_dir.clone()),
            ledger.clone(),
            config.thresholds,
        );
        Self {
            classifier,
            registry,
            ledger,
            _schema: PhantomData,
        }
    }

    /// Classifies the batch against the current registry and returns every
    /// row, in input order, annotated with its outcome.
    pub async fn link(
        &mut self,
        batch: Vec<MessyRow<S::Messy>>,
    ) -> LinkingResult<(Vec<LinkedRow<S::Messy>>, LinkingStats)> {
        let registry = S::load_registry(self.registry.as_ref()).await?;
        let canonical: Vec<CanonicalEntry> = registry
            .iter()
            .map(|c| CanonicalEntry {
                id: S::canonical_id(c),
                record: S::canonical_record(c),
                exact_key: S::canonical_exact_key(c),
            })
            .collect();
        let messy: Vec<MessyEntry> = batch
            .iter()
            .map(|row| MessyEntry {
                key: row.key.clone(),
                record: S::messy_record(&row.record),
                exact_key: S::messy_exact_key(&row.record),
                signature: S::signature(&row.record),
            })
            .collect();

        let (classification, stats) = self.classifier.classify(&messy, &canonical).await?;

        let mut outcomes: HashMap<BatchKey, (LinkStatus, Option<EntityId>, Option<Uuid>)> =
            HashMap::with_capacity(batch.len());
        for m in classification.certain {
            outcomes.insert(m.key, (LinkStatus::Certain, Some(m.canonical_id), None));
        }
        for m in classification.dubious {
            outcomes.insert(m.key, (LinkStatus::Dubious, None, Some(m.linking_id)));
        }
        for m in classification.distinct {
            outcomes.insert(m.key, (LinkStatus::Distinct, None, None));
        }

        let linked = batch
            .into_iter()
            .map(|row| {
                let (status, canonical_id, linking_id) = outcomes
                    .remove(&row.key)
                    .unwrap_or((LinkStatus::Unresolved, None, None));
                LinkedRow {
                    key: row.key,
                    record: row.record,
                    status,
                    canonical_id,
                    linking_id,
                }
            })
            .collect();
        Ok((linked, stats))
    }

    /// Records a decision taken outside classification, e.g. by a writer
    /// that confirmed a link itself. Terminal decisions are applied at once.
    pub async fn save_linking_decision(
        &self,
        canonical_id: Option<EntityId>,
        messy: &S::Messy,
        decision: Decision,
    ) -> LinkingResult<LinkingDecision> {
        let signature = S::signature(messy);
        let (entry, _) = self
            .ledger
            .get_or_create_pending(S::KIND, canonical_id, &signature)
            .await?;
        if decision.is_terminal() && entry.decision == Decision::Pending {
            if let Some(updated) = self.ledger.resolve(entry.uuid, decision, canonical_id).await? {
                return Ok(updated);
            }
        }
        Ok(entry)
    }
}

/// Flat JSON view of a linked row for writers: the record's own fields plus
/// `key`, the kind's foreign-key column, `linking_id` and `link_status`.
pub fn linked_row_json<R: Serialize>(
    row: &LinkedRow<R>,
    fk_column: &str,
) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(&row.record)?;
    if !value.is_object() {
        value = json!({ "record": value });
    }
    if let Value::Object(map) = &mut value {
        map.insert("key".into(), json!(row.key));
        map.insert(fk_column.into(), json!(row.canonical_id));
        map.insert("linking_id".into(), json!(row.linking_id));
        map.insert("link_status".into(), serde_json::to_value(row.status)?);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::person::PersonSchema;
    use super::registry::MemoryRegistry;
    use super::*;
    use crate::ledger::memory::{MemoryDependentStore, MemoryLedger};
    use crate::matching::matcher::EditDistanceMatcher;
    use crate::models::records::{CanonicalPerson, MessyPerson};

    fn setup() -> (tempfile::TempDir, Linker<PersonSchema>, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let config = LinkingConfig {
            training_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let registry = MemoryRegistry::with_entities(
            vec![
                CanonicalPerson { id: 1, name: "Juan".into(), last_name: "Pérez".into() },
                CanonicalPerson { id: 2, name: "María".into(), last_name: "Gómez".into() },
            ],
            vec![],
        );
        let ledger = Ledger::new(Arc::new(MemoryLedger::new()), Arc::new(MemoryDependentStore::new()));
        let linker = Linker::new(Box::new(EditDistanceMatcher), Arc::new(registry), ledger.clone(), &config);
        (dir, linker, ledger)
    }

    fn row(key: &str, name: &str, last_name: &str) -> MessyRow<MessyPerson> {
        MessyRow::new(key, MessyPerson { name: name.into(), last_name: last_name.into() })
    }

    fn batch() -> Vec<MessyRow<MessyPerson>> {
        vec![
            row("vote/1", "JUAN", "Perez"),
            row("vote/2", "Dr. Juan C.", "Perez"),
            row("vote/3", "Eustaquio", "Quintero"),
            row("vote/4", "Xyzw", "Qqqq"),
        ]
    }

    #[tokio::test]
    async fn test_link_keeps_every_row_in_order() {
        let (_dir, mut linker, _) = setup();
        let (rows, stats) = linker.link(batch()).await.unwrap();

        let keys: Vec<_> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["vote/1", "vote/2", "vote/3", "vote/4"]);
        let statuses: Vec<_> = rows.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![LinkStatus::Certain, LinkStatus::Certain, LinkStatus::Dubious, LinkStatus::Distinct]
        );
        assert_eq!(rows[0].canonical_id, Some(1));
        assert_eq!(rows[1].canonical_id, Some(1));
        assert!(rows[2].linking_id.is_some());
        assert_eq!(rows[2].canonical_id, None);
        assert_eq!((rows[3].canonical_id, rows[3].linking_id), (None, None));
        assert_eq!(rows[1].record.name, "Dr. Juan C.");
        assert_eq!((stats.exact, stats.pending_created), (1, 1));
    }

    #[tokio::test]
    async fn test_relinking_after_denial_is_stable() {
        let (_dir, mut linker, ledger) = setup();
        let (first, _) = linker.link(batch()).await.unwrap();
        let (second, stats) = linker.link(batch()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(stats.pending_created, 0);

        let linking_id = first[2].linking_id.unwrap();
        ledger.resolve(linking_id, Decision::Denied, None).await.unwrap();
        let (third, stats) = linker.link(batch()).await.unwrap();
        assert_eq!(third[2].status, LinkStatus::Distinct);
        assert_eq!(third[2].linking_id, None);
        assert_eq!(stats.prior_denied, 1);
    }

    #[tokio::test]
    async fn test_save_linking_decision_is_reused_by_link() {
        let (_dir, mut linker, _) = setup();
        let messy = MessyPerson { name: "Xyzw".into(), last_name: "Qqqq".into() };
        let saved = linker
            .save_linking_decision(Some(2), &messy, Decision::Approved)
            .await
            .unwrap();
        assert_eq!(saved.decision, Decision::Approved);

        let (rows, stats) = linker.link(batch()).await.unwrap();
        assert_eq!(rows[3].status, LinkStatus::Certain);
        assert_eq!(rows[3].canonical_id, Some(2));
        assert_eq!(stats.prior_approved, 1);
    }

    #[test]
    fn test_linked_row_json_exposes_writer_columns() {
        let linked = LinkedRow {
            key: BatchKey::new("vote/7"),
            record: MessyPerson { name: "Ana".into(), last_name: "Ruiz".into() },
            status: LinkStatus::Certain,
            canonical_id: Some(4),
            linking_id: None,
        };
        let value = linked_row_json(&linked, "person_id").unwrap();
        assert_eq!(value["person_id"], 4);
        assert_eq!(value["name"], "Ana");
        assert_eq!(value["link_status"], "certain");
        assert!(value["linking_id"].is_null());
    }
}
