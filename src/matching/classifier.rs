// src/matching/classifier.rs - Three-way classification of a messy batch
use std::collections::{HashMap, HashSet};

use crate::error::{LinkingError, LinkingResult};
use crate::ledger::Ledger;
use crate::matching::corpus::{TrainingCorpus, TrainingCorpusStore};
use crate::matching::matcher::Matcher;
use crate::models::linking::{
    CertainMatch, CertainReason, Classification, Decision, DistinctMatch, DubiousMatch,
    MatchCandidate,
};
use crate::models::records::{BatchKey, ComparisonRecord, EntityId, EntityKind};
use crate::models::stats::LinkingStats;
use crate::utils::config::ThresholdConfig;
use crate::utils::logging::LinkingLogger;

/// A messy record prepared for classification.
#[derive(Debug, Clone)]
pub struct MessyEntry {
    pub key: BatchKey,
    pub record: ComparisonRecord,
    pub exact_key: String,
    pub signature: String,
}

/// A canonical record prepared for classification.
#[derive(Debug, Clone)]
pub struct CanonicalEntry {
    pub id: EntityId,
    pub record: ComparisonRecord,
    pub exact_key: String,
}

/// Runs the linking passes for one entity kind: exact keys, prior ledger
/// decisions, the matcher with batch-relative thresholds, then corpus
/// persistence. Each job owns its classifier and matcher.
pub struct Classifier {
    kind: EntityKind,
    matcher: Box<dyn Matcher>,
    corpus_store: TrainingCorpusStore,
    ledger: Ledger,
    thresholds: ThresholdConfig,
    logger: LinkingLogger,
}

impl Classifier {
    pub fn new(
        kind: EntityKind,
        matcher: Box<dyn Matcher>,
        corpus_store: TrainingCorpusStore,
        ledger: Ledger,
        thresholds: ThresholdConfig,
    ) -> Self {
        Self {
            kind,
            matcher,
            corpus_store,
            ledger,
            thresholds,
            logger: LinkingLogger::new(kind),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub async fn classify(
        &mut self,
        messy: &[MessyEntry],
        canonical: &[CanonicalEntry],
    ) -> LinkingResult<(Classification, LinkingStats)> {
        let mut seen = HashSet::new();
        for entry in messy {
            if !seen.insert(&entry.key) {
                return Err(LinkingError::DuplicateBatchKey(entry.key.clone()));
            }
        }

        self.logger = LinkingLogger::new(self.kind);
        self.logger.log_start(messy.len(), canonical.len());
        let mut out = Classification::default();
        let mut stats = LinkingStats {
            total: messy.len(),
            ..Default::default()
        };

        let remaining = self.exact_prepass(messy, canonical, &mut out);
        stats.exact = out.certain.len();
        self.logger.log_exact_prepass(stats.exact, remaining.len());

        let remaining = self.prior_approval_prepass(remaining, &mut out, &mut stats).await?;

        if !remaining.is_empty() {
            self.match_remaining(&remaining, canonical, &mut out, &mut stats)
                .await?;
        }

        stats.absorb(&out);
        self.logger.log_completion(&stats);
        Ok((out, stats))
    }

    fn exact_prepass<'a>(
        &self,
        messy: &'a [MessyEntry],
        canonical: &[CanonicalEntry],
        out: &mut Classification,
    ) -> Vec<&'a MessyEntry> {
        self.logger.log_phase("exact pre-pass", None);
        let mut by_key: HashMap<&str, EntityId> = HashMap::new();
        for c in canonical.iter().filter(|c| !c.exact_key.is_empty()) {
            by_key
                .entry(c.exact_key.as_str())
                .and_modify(|id| *id = (*id).min(c.id))
                .or_insert(c.id);
        }

        let mut remaining = Vec::new();
        for entry in messy {
            match by_key.get(entry.exact_key.as_str()) {
                Some(&id) if !entry.exact_key.is_empty() => out.certain.push(CertainMatch {
                    key: entry.key.clone(),
                    canonical_id: id,
                    reason: CertainReason::ExactKey,
                }),
                _ => remaining.push(entry),
            }
        }
        remaining
    }

    async fn prior_approval_prepass<'a>(
        &self,
        remaining: Vec<&'a MessyEntry>,
        out: &mut Classification,
        stats: &mut LinkingStats,
    ) -> LinkingResult<Vec<&'a MessyEntry>> {
        self.logger.log_phase("prior approvals", None);
        let mut cache: HashMap<&str, Option<EntityId>> = HashMap::new();
        let mut still_open = Vec::new();

        for entry in remaining {
            let approved = match cache.get(entry.signature.as_str()) {
                Some(&hit) => hit,
                None => {
                    let found = self
                        .ledger
                        .prior_approval(self.kind, &entry.signature)
                        .await?
                        .and_then(|d| d.canonical_entity_id);
                    cache.insert(entry.signature.as_str(), found);
                    found
                }
            };

            match approved {
                Some(id) => {
                    stats.prior_approved += 1;
                    out.certain.push(CertainMatch {
                        key: entry.key.clone(),
                        canonical_id: id,
                        reason: CertainReason::PriorApproval,
                    });
                }
                None => still_open.push(entry),
            }
        }

        self.logger
            .log_prior_approvals(stats.prior_approved, still_open.len());
        Ok(still_open)
    }

    async fn match_remaining(
        &mut self,
        remaining: &[&MessyEntry],
        canonical: &[CanonicalEntry],
        out: &mut Classification,
        stats: &mut LinkingStats,
    ) -> LinkingResult<()> {
        self.logger.log_phase("matching", Some(&format!("{} records", remaining.len())));
        let messy_records: Vec<ComparisonRecord> =
            remaining.iter().map(|e| e.record.clone()).collect();
        let canonical_records: Vec<ComparisonRecord> =
            canonical.iter().map(|c| c.record.clone()).collect();

        let mut corpus = self.corpus_store.load(self.kind)?.unwrap_or_default();
        self.logger.log_corpus(corpus.matches.len(), corpus.distinct.len());

        let searched = self
            .matcher
            .train(&messy_records, &canonical_records, &mut corpus)
            .and_then(|()| self.matcher.search(&messy_records, &canonical_records));

        let candidates = match searched {
            Ok(candidates) => candidates,
            Err(e) => {
                self.logger.log_unresolved(remaining.len(), &e.to_string());
                out.unresolved.extend(remaining.iter().map(|entry| entry.key.clone()));
                return self.finish_training(&corpus);
            }
        };

        let max_score = candidates
            .iter()
            .map(|c| c.score)
            .fold(f64::NEG_INFINITY, f64::max);
        if !(max_score > 0.0) {
            self.logger
                .log_unresolved(remaining.len(), "no candidate has a positive score");
            out.unresolved.extend(remaining.iter().map(|entry| entry.key.clone()));
            return self.finish_training(&corpus);
        }

        let (lower, upper) = self.thresholds.bounds(max_score);
        self.logger.log_thresholds(max_score, lower, upper);

        for candidate in &candidates {
            let entry = remaining[candidate.messy_index];
            self.bucket(entry, candidate, canonical, lower, upper, out, stats)
                .await?;
        }

        self.finish_training(&corpus)
    }

    #[allow(clippy::too_many_arguments)]
    async fn bucket(
        &self,
        entry: &MessyEntry,
        candidate: &MatchCandidate,
        canonical: &[CanonicalEntry],
        lower: f64,
        upper: f64,
        out: &mut Classification,
        stats: &mut LinkingStats,
    ) -> LinkingResult<()> {
        let Some(target) = candidate.canonical_index.map(|j| &canonical[j]) else {
            out.distinct.push(DistinctMatch {
                key: entry.key.clone(),
                canonical_id: None,
                score: candidate.score,
            });
            return Ok(());
        };
        let s = candidate.score;

        // A decision on this exact pair outranks the score.
        if let Some(prior) = self
            .ledger
            .pair_decision(self.kind, target.id, &entry.signature)
            .await?
        {
            match prior.decision {
                Decision::Approved => {
                    stats.prior_approved += 1;
                    out.certain.push(CertainMatch {
                        key: entry.key.clone(),
                        canonical_id: target.id,
                        reason: CertainReason::PriorApproval,
                    });
                    return Ok(());
                }
                Decision::Denied => {
                    stats.prior_denied += 1;
                    out.distinct.push(DistinctMatch {
                        key: entry.key.clone(),
                        canonical_id: Some(target.id),
                        score: s,
                    });
                    return Ok(());
                }
                Decision::Pending => {}
            }
        }

        let certain_reason = if entry.record.same_fields(&target.record) {
            Some(CertainReason::IdenticalFields)
        } else if s > upper {
            Some(CertainReason::AboveUpper)
        } else {
            None
        };
        if let Some(reason) = certain_reason {
            out.certain.push(CertainMatch {
                key: entry.key.clone(),
                canonical_id: target.id,
                reason,
            });
            return Ok(());
        }

        if s > lower && s < upper {
            let (decision, created) = self
                .ledger
                .get_or_create_pending(self.kind, Some(target.id), &entry.signature)
                .await?;
            if created {
                stats.pending_created += 1;
            }
            match decision.decision {
                Decision::Pending => out.dubious.push(DubiousMatch {
                    key: entry.key.clone(),
                    canonical_id: target.id,
                    linking_id: decision.uuid,
                    score: s,
                }),
                // Decided between the prior-decision pass and now.
                Decision::Approved => out.certain.push(CertainMatch {
                    key: entry.key.clone(),
                    canonical_id: decision.canonical_entity_id.unwrap_or(target.id),
                    reason: CertainReason::PriorApproval,
                }),
                Decision::Denied => out.distinct.push(DistinctMatch {
                    key: entry.key.clone(),
                    canonical_id: Some(target.id),
                    score: s,
                }),
            }
            return Ok(());
        }

        self.logger.log_debug(&format!(
            "'{}' scored {:.3} against {} outside the dubious band",
            entry.signature, s, target.id
        ));
        out.distinct.push(DistinctMatch {
            key: entry.key.clone(),
            canonical_id: Some(target.id),
            score: s,
        });
        Ok(())
    }

    fn finish_training(&mut self, corpus: &TrainingCorpus) -> LinkingResult<()> {
        if corpus.is_empty() {
            self.logger.log_debug("No training pairs to save");
        } else {
            self.corpus_store.save(self.kind, corpus)?;
            self.logger.log_corpus(corpus.matches.len(), corpus.distinct.len());
        }
        self.matcher.cleanup_training();
        Ok(())
    }
}
