// src/models/linking.rs
use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::records::{BatchKey, EntityId, EntityKind};

/// Score reported for a messy record that has no candidate at all.
pub const NO_CANDIDATE_SCORE: f64 = -1.0;

/// Lifecycle of a ledger entry. APPROVED and DENIED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "UPPERCASE")]
#[postgres(name = "linking_decision_state")]
pub enum Decision {
    #[postgres(name = "PENDING")]
    Pending,
    #[postgres(name = "APPROVED")]
    Approved,
    #[postgres(name = "DENIED")]
    Denied,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Pending => "PENDING",
            Decision::Approved => "APPROVED",
            Decision::Denied => "DENIED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Decision::Pending)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One adjudication in the ledger. `uuid` is the linking id carried by every
/// dependent row written while the decision was pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkingDecision {
    pub id: i64,
    pub uuid: Uuid,
    pub kind: EntityKind,
    pub canonical_entity_id: Option<EntityId>,
    pub messy_signature: String,
    pub decision: Decision,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Best canonical candidate for one messy record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCandidate {
    pub messy_index: usize,
    pub canonical_index: Option<usize>,
    pub score: f64,
}

impl MatchCandidate {
    pub fn none(messy_index: usize) -> Self {
        Self {
            messy_index,
            canonical_index: None,
            score: NO_CANDIDATE_SCORE,
        }
    }

    pub fn has_candidate(&self) -> bool {
        self.canonical_index.is_some()
    }
}

/// Why a record was classified as certain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertainReason {
    ExactKey,
    PriorApproval,
    IdenticalFields,
    AboveUpper,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CertainMatch {
    pub key: BatchKey,
    pub canonical_id: EntityId,
    pub reason: CertainReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DubiousMatch {
    pub key: BatchKey,
    pub canonical_id: EntityId,
    pub linking_id: Uuid,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistinctMatch {
    pub key: BatchKey,
    pub canonical_id: Option<EntityId>,
    pub score: f64,
}

/// Output of one classification pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub certain: Vec<CertainMatch>,
    pub dubious: Vec<DubiousMatch>,
    pub distinct: Vec<DistinctMatch>,
    pub unresolved: Vec<BatchKey>,
}

/// Final per-row outcome merged back into a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Certain,
    Dubious,
    Distinct,
    Unresolved,
}

/// A batch row after linking. `canonical_id` is set for certain rows,
/// `linking_id` for dubious rows; no row is ever dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedRow<R> {
    pub key: BatchKey,
    pub record: R,
    pub status: LinkStatus,
    pub canonical_id: Option<EntityId>,
    pub linking_id: Option<Uuid>,
}
