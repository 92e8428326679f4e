// src/matching/features.rs - Pairwise comparison features and blocking
use std::collections::{BTreeSet, HashMap};
use strsim::{jaro_winkler, normalized_levenshtein};

use crate::matching::normalize::{block_keys, tokenize};
use crate::models::records::ComparisonRecord;

/// Similarity measures computed for each comparison field.
pub const FEATURES_PER_FIELD: usize = 3;

/// Sorted union of the field names present in the given records.
pub fn field_names<'a, I>(records: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a ComparisonRecord>,
{
    records
        .into_iter()
        .flat_map(|r| r.fields.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

/// Jaro-Winkler, normalized Levenshtein and token Jaccard for one field.
pub fn field_similarities(a: &str, b: &str) -> [f64; FEATURES_PER_FIELD] {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => [1.0, 1.0, 1.0],
        (true, false) | (false, true) => [0.0, 0.0, 0.0],
        (false, false) => [
            jaro_winkler(a, b),
            normalized_levenshtein(a, b),
            token_jaccard(a, b),
        ],
    }
}

/// Feature vector for a (messy, canonical) pair: the per-field similarities
/// in `fields` order followed by a whole-record equality flag.
pub fn pair_features(
    fields: &[String],
    messy: &ComparisonRecord,
    canonical: &ComparisonRecord,
) -> Vec<f64> {
    let mut features = Vec::with_capacity(fields.len() * FEATURES_PER_FIELD + 1);
    for field in fields {
        features.extend_from_slice(&field_similarities(messy.get(field), canonical.get(field)));
    }
    features.push(if messy.same_fields(canonical) { 1.0 } else { 0.0 });
    features
}

pub fn feature_count(fields: &[String]) -> usize {
    fields.len() * FEATURES_PER_FIELD + 1
}

/// Untrained similarity: mean Jaro-Winkler over the fields. Used to order
/// bootstrap questions before any model exists.
pub fn heuristic_score(fields: &[String], a: &ComparisonRecord, b: &ComparisonRecord) -> f64 {
    if fields.is_empty() {
        return 0.0;
    }
    fields
        .iter()
        .map(|f| field_similarities(a.get(f), b.get(f))[0])
        .sum::<f64>()
        / fields.len() as f64
}

/// Inverted index from blocking key to canonical positions.
pub struct BlockIndex {
    index: HashMap<String, Vec<usize>>,
}

impl BlockIndex {
    pub fn build(canonical: &[ComparisonRecord]) -> Self {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, record) in canonical.iter().enumerate() {
            for key in block_keys(&record.joined()) {
                index.entry(key).or_default().push(i);
            }
        }
        Self { index }
    }

    /// Canonical positions sharing at least one blocking key with `messy`.
    pub fn candidates(&self, messy: &ComparisonRecord) -> BTreeSet<usize> {
        block_keys(&messy.joined())
            .iter()
            .filter_map(|key| self.index.get(key))
            .flatten()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str, last_name: &str) -> ComparisonRecord {
        ComparisonRecord::new(None, [("name", name), ("last_name", last_name)])
    }

    #[test]
    fn test_pair_features_shape_and_equality_flag() {
        let fields = field_names([&person("juan", "perez")]);
        assert_eq!(fields, vec!["last_name".to_string(), "name".to_string()]);

        let same = pair_features(&fields, &person("juan", "perez"), &person("juan", "perez"));
        assert_eq!(same.len(), feature_count(&fields));
        assert!(same.iter().all(|f| (*f - 1.0).abs() < 1e-9));

        let different = pair_features(&fields, &person("juan c", "perez"), &person("juan", "perez"));
        assert_eq!(*different.last().unwrap(), 0.0);
        assert!(different[0] > 0.99);
    }

    #[test]
    fn test_empty_fields() {
        assert_eq!(field_similarities("", ""), [1.0, 1.0, 1.0]);
        assert_eq!(field_similarities("juan", ""), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_heuristic_orders_similar_pairs_first() {
        let fields = field_names([&person("juan", "perez")]);
        let close = heuristic_score(&fields, &person("juan c", "perez"), &person("juan", "perez"));
        let far = heuristic_score(&fields, &person("eustaquio", "quintero"), &person("juan", "perez"));
        assert!(close > far);
    }

    #[test]
    fn test_block_index_candidates() {
        let canonical = vec![person("juan", "perez"), person("maria", "gomez")];
        let index = BlockIndex::build(&canonical);
        assert!(!index.is_empty());

        let hits = index.candidates(&person("juan c", "perez"));
        assert_eq!(hits.into_iter().collect::<Vec<_>>(), vec![0]);

        assert!(index.candidates(&person("eustaquio", "quintero")).is_empty());
        assert_eq!(
            index.candidates(&person("mariana", "gomes")).into_iter().collect::<Vec<_>>(),
            vec![1]
        );
    }
}
