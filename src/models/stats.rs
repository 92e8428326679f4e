// src/models/stats.rs
use serde::Serialize;

use crate::models::linking::Classification;

/// Counts reported after each linking pass so operators can audit match
/// quality without the job failing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkingStats {
    pub total: usize,
    pub exact: usize,
    pub prior_approved: usize,
    pub prior_denied: usize,
    pub certain: usize,
    pub dubious: usize,
    pub distinct: usize,
    pub unresolved: usize,
    pub pending_created: usize,
}

impl LinkingStats {
    pub fn absorb(&mut self, classification: &Classification) {
        self.certain = classification.certain.len();
        self.dubious = classification.dubious.len();
        self.distinct = classification.distinct.len();
        self.unresolved = classification.unresolved.len();
    }
}

/// Result of propagating one resolved decision to dependent rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub updated: u64,
    pub deleted_duplicates: u64,
    pub cleared: u64,
    pub used_fallback: bool,
}
