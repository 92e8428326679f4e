// src/error.rs
//! Error taxonomy for the linking engine.
//!
//! Matching errors are recoverable: the classifier turns them into an
//! unresolved batch. Storage and corpus errors are infrastructural and
//! propagate to the caller, aborting the job.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::models::records::{BatchKey, EntityId};

/// Raised by a [`crate::matching::matcher::Matcher`].
#[derive(Debug, Error)]
pub enum MatchingError {
    #[error("insufficient training data: {matches} match and {distinct} distinct pairs (need at least {required} pairs covering both classes)")]
    InsufficientTrainingData {
        matches: usize,
        distinct: usize,
        required: usize,
    },

    #[error("incompatible datasets: {messy} messy records against {canonical} canonical records")]
    IncompatibleDatasets { messy: usize, canonical: usize },

    #[error("matcher used before training")]
    NotTrained,
}

/// Raised by ledger, dependent-row and registry stores.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database pool error: {0}")]
    Pool(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

impl From<bb8::RunError<tokio_postgres::Error>> for StorageError {
    fn from(e: bb8::RunError<tokio_postgres::Error>) -> Self {
        match e {
            bb8::RunError::User(inner) => StorageError::Database(inner),
            bb8::RunError::TimedOut => StorageError::Pool("timed out waiting for a connection".into()),
        }
    }
}

/// Raised by the training corpus store.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to access training corpus {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("training corpus {path} is corrupted: {source}")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level error for linking, ledger and adjudication operations.
#[derive(Debug, Error)]
pub enum LinkingError {
    #[error(transparent)]
    Matching(#[from] MatchingError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error("batch key {0} appears more than once in the batch")]
    DuplicateBatchKey(BatchKey),

    #[error("linking decision {0} cannot be approved without a canonical entity id")]
    MissingCanonicalId(Uuid),

    #[error("unknown linking id {0}")]
    UnknownLinkingId(Uuid),

    #[error("linking decision {linking_id} cannot take canonical id {canonical_id}: entry {existing} already holds that pair")]
    ConflictingDecision {
        linking_id: Uuid,
        canonical_id: EntityId,
        existing: Uuid,
    },
}

pub type LinkingResult<T> = Result<T, LinkingError>;
