// src/matching/corpus.rs - Persisted pairwise training labels, one file per entity kind
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CorpusError;
use crate::models::records::{ComparisonRecord, EntityKind};

/// `(messy, canonical)` pair of comparison records.
pub type RecordPair = (ComparisonRecord, ComparisonRecord);

/// Labeled pairs. Serialized as `{"match": [...], "distinct": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingCorpus {
    #[serde(rename = "match", default)]
    pub matches: Vec<RecordPair>,
    #[serde(default)]
    pub distinct: Vec<RecordPair>,
}

/// Strips ids so a stored corpus cannot leak or go stale against id
/// reassignment.
pub fn reduce(pair: &RecordPair) -> RecordPair {
    (pair.0.without_id(), pair.1.without_id())
}

impl TrainingCorpus {
    pub fn len(&self) -> usize {
        self.matches.len() + self.distinct.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty() && self.distinct.is_empty()
    }

    pub fn add_match(&mut self, pair: RecordPair) {
        self.matches.push(pair);
    }

    pub fn add_distinct(&mut self, pair: RecordPair) {
        self.distinct.push(pair);
    }

    /// Whether the pair was already labeled either way (ids ignored).
    pub fn contains(&self, pair: &RecordPair) -> bool {
        let reduced = reduce(pair);
        self.matches
            .iter()
            .chain(self.distinct.iter())
            .any(|p| reduce(p) == reduced)
    }

    /// Reduced, deduplicated and sorted copy: the persisted form.
    pub fn reduced(&self) -> Self {
        let canonical_form = |pairs: &[RecordPair]| -> Vec<RecordPair> {
            pairs
                .iter()
                .map(reduce)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };
        Self {
            matches: canonical_form(&self.matches),
            distinct: canonical_form(&self.distinct),
        }
    }
}

/// Loads and saves training corpora under a directory.
///
/// Files are rewritten after every classification pass without locking; two
/// concurrent passes for the same kind race and the later write wins.
#[derive(Debug, Clone)]
pub struct TrainingCorpusStore {
    dir: PathBuf,
}

impl TrainingCorpusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: EntityKind) -> PathBuf {
        self.dir.join(format!("{}_training.json", kind.as_str()))
    }

    pub fn load(&self, kind: EntityKind) -> Result<Option<TrainingCorpus>, CorpusError> {
        let path = self.path_for(kind);
        if !path.exists() {
            debug!("No training corpus at {}", path.display());
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|source| CorpusError::Io {
            path: path.clone(),
            source,
        })?;
        let corpus: TrainingCorpus = serde_json::from_str(&raw)
            .map_err(|source| CorpusError::Corrupted { path: path.clone(), source })?;
        info!(
            "Loaded {} training corpus: {} match / {} distinct pairs",
            kind,
            corpus.matches.len(),
            corpus.distinct.len()
        );
        Ok(Some(corpus))
    }

    pub fn save(&self, kind: EntityKind, corpus: &TrainingCorpus) -> Result<(), CorpusError> {
        let path = self.path_for(kind);
        let io_err = |source| CorpusError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;

        let mut body = serde_json::to_string_pretty(&corpus.reduced())
            .map_err(|source| CorpusError::Corrupted { path: path.clone(), source })?;
        body.push('\n');

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: Option<i64>, name: &str, last_name: &str) -> ComparisonRecord {
        ComparisonRecord::new(id, [("name", name), ("last_name", last_name)])
    }

    #[test]
    fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrainingCorpusStore::new(dir.path());
        assert!(store.load(EntityKind::Person).unwrap().is_none());
    }

    #[test]
    fn test_save_strips_ids_and_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrainingCorpusStore::new(dir.path().join("nested"));

        let mut corpus = TrainingCorpus::default();
        corpus.add_match((rec(None, "juan c", "perez"), rec(Some(1), "juan", "perez")));
        corpus.add_match((rec(None, "juan c", "perez"), rec(Some(99), "juan", "perez")));
        corpus.add_distinct((rec(None, "ana", "gomez"), rec(Some(2), "juan", "perez")));
        store.save(EntityKind::Person, &corpus).unwrap();

        let raw = fs::read_to_string(store.path_for(EntityKind::Person)).unwrap();
        assert!(raw.contains("\"match\""));
        assert!(!raw.contains("\"id\""));

        let loaded = store.load(EntityKind::Person).unwrap().unwrap();
        assert_eq!(loaded.matches.len(), 1);
        assert_eq!(loaded.distinct.len(), 1);
        assert!(loaded.contains(&(rec(None, "ana", "gomez"), rec(Some(7), "juan", "perez"))));
    }

    #[test]
    fn test_round_trip_is_byte_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrainingCorpusStore::new(dir.path());

        let mut corpus = TrainingCorpus::default();
        corpus.add_distinct((rec(None, "zulma", "ruiz"), rec(None, "ana", "gomez")));
        corpus.add_distinct((rec(None, "ana", "gomez"), rec(None, "juan", "perez")));
        corpus.add_match((rec(None, "jose", "lopez"), rec(None, "jose", "lópez")));
        store.save(EntityKind::Party, &corpus).unwrap();
        let first = fs::read(store.path_for(EntityKind::Party)).unwrap();

        let reloaded = store.load(EntityKind::Party).unwrap().unwrap();
        store.save(EntityKind::Party, &reloaded).unwrap();
        let second = fs::read(store.path_for(EntityKind::Party)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_corrupted_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrainingCorpusStore::new(dir.path());
        fs::write(store.path_for(EntityKind::Person), "{not json").unwrap();
        assert!(matches!(
            store.load(EntityKind::Person),
            Err(CorpusError::Corrupted { .. })
        ));
    }
}
