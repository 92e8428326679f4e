// src/matching/matcher.rs - Pairwise similarity matchers
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

use crate::error::MatchingError;
use crate::matching::corpus::{RecordPair, TrainingCorpus};
use crate::matching::features::{
    feature_count, field_names, field_similarities, heuristic_score, pair_features, BlockIndex,
};
use crate::matching::labeler::{Label, Labeler};
use crate::matching::model::LogisticRegression;
use crate::models::linking::MatchCandidate;
use crate::models::records::ComparisonRecord;
use crate::utils::config::MatcherConfig;

const MAX_BOOTSTRAP_POOL: usize = 5_000;
const RANDOM_BOOTSTRAP_PAIRS: usize = 10;

/// Anything that can score messy records against a canonical set.
///
/// `train` must be called before `search`. Implementations may append
/// labels gathered while training to `corpus`; the caller persists it.
pub trait Matcher: Send + Sync {
    fn train(
        &mut self,
        messy: &[ComparisonRecord],
        canonical: &[ComparisonRecord],
        corpus: &mut TrainingCorpus,
    ) -> Result<(), MatchingError>;

    /// Best candidate per messy record, in messy order.
    fn search(
        &self,
        messy: &[ComparisonRecord],
        canonical: &[ComparisonRecord],
    ) -> Result<Vec<MatchCandidate>, MatchingError>;

    /// Drops transient training state.
    fn cleanup_training(&mut self) {}
}

fn check_datasets(
    messy: &[ComparisonRecord],
    canonical: &[ComparisonRecord],
) -> Result<(), MatchingError> {
    if messy.is_empty() || canonical.is_empty() {
        return Err(MatchingError::IncompatibleDatasets {
            messy: messy.len(),
            canonical: canonical.len(),
        });
    }
    Ok(())
}

/// Learned matcher: logistic regression over string-similarity features,
/// restricted to blocked candidates. Bootstraps its corpus through a
/// [`Labeler`] when either class is missing.
pub struct LogisticMatcher {
    config: MatcherConfig,
    labeler: Box<dyn Labeler>,
    fields: Vec<String>,
    model: Option<LogisticRegression>,
    training_examples: Vec<(Vec<f64>, f64)>,
}

impl LogisticMatcher {
    pub fn new(config: MatcherConfig, labeler: Box<dyn Labeler>) -> Self {
        Self {
            config,
            labeler,
            fields: Vec::new(),
            model: None,
            training_examples: Vec::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    /// Asks the labeler about blocked pairs, alternating between the most
    /// and the least similar ones, until both classes reach the per-class
    /// target, the question budget runs out, or the labeler stops.
    fn bootstrap(
        &mut self,
        messy: &[ComparisonRecord],
        canonical: &[ComparisonRecord],
        corpus: &mut TrainingCorpus,
    ) -> usize {
        let index = BlockIndex::build(canonical);
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut pool: Vec<(usize, usize, f64)> = Vec::new();

        'outer: for (i, m) in messy.iter().enumerate() {
            for j in index.candidates(m) {
                if pool.len() >= MAX_BOOTSTRAP_POOL {
                    break 'outer;
                }
                seen.insert((i, j));
                pool.push((i, j, heuristic_score(&self.fields, m, &canonical[j])));
            }
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        for _ in 0..RANDOM_BOOTSTRAP_PAIRS {
            let pair = (rng.gen_range(0..messy.len()), rng.gen_range(0..canonical.len()));
            if seen.insert(pair) {
                let score = heuristic_score(&self.fields, &messy[pair.0], &canonical[pair.1]);
                pool.push((pair.0, pair.1, score));
            }
        }

        pool.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then((a.0, a.1).cmp(&(b.0, b.1)))
        });

        let target = self.config.bootstrap_target_per_class;
        let (mut lo, mut hi) = (0usize, pool.len());
        let mut from_top = true;
        let mut asked = 0usize;
        let mut labeled = 0usize;

        while lo < hi && asked < self.config.max_bootstrap_questions {
            if corpus.matches.len() >= target && corpus.distinct.len() >= target {
                break;
            }
            let (i, j, _) = if from_top {
                lo += 1;
                pool[lo - 1]
            } else {
                hi -= 1;
                pool[hi]
            };
            from_top = !from_top;

            let pair: RecordPair = (messy[i].clone(), canonical[j].clone());
            if corpus.contains(&pair) {
                continue;
            }
            asked += 1;
            match self.labeler.label(&pair.0, &pair.1) {
                Label::Match => {
                    corpus.add_match(pair);
                    labeled += 1;
                }
                Label::Distinct => {
                    corpus.add_distinct(pair);
                    labeled += 1;
                }
                Label::Unsure => {}
                Label::Stop => break,
            }
        }

        info!(
            "Bootstrap labeling asked {} questions, {} labeled ({} match / {} distinct in corpus)",
            asked,
            labeled,
            corpus.matches.len(),
            corpus.distinct.len()
        );
        labeled
    }
}

impl Matcher for LogisticMatcher {
    fn train(
        &mut self,
        messy: &[ComparisonRecord],
        canonical: &[ComparisonRecord],
        corpus: &mut TrainingCorpus,
    ) -> Result<(), MatchingError> {
        check_datasets(messy, canonical)?;

        self.fields = field_names(
            messy
                .iter()
                .chain(canonical.iter())
                .chain(corpus.matches.iter().chain(corpus.distinct.iter()).flat_map(|(a, b)| [a, b])),
        );

        if corpus.matches.is_empty() || corpus.distinct.is_empty() {
            self.bootstrap(messy, canonical, corpus);
        }

        let required = self.config.min_training_pairs.max(2);
        if corpus.matches.is_empty() || corpus.distinct.is_empty() || corpus.len() < required {
            return Err(MatchingError::InsufficientTrainingData {
                matches: corpus.matches.len(),
                distinct: corpus.distinct.len(),
                required,
            });
        }

        self.training_examples = corpus
            .matches
            .iter()
            .map(|(a, b)| (pair_features(&self.fields, a, b), 1.0))
            .chain(
                corpus
                    .distinct
                    .iter()
                    .map(|(a, b)| (pair_features(&self.fields, a, b), 0.0)),
            )
            .collect();

        let mut model = LogisticRegression::new(feature_count(&self.fields), self.config.learning_rate);
        model.fit(&self.training_examples, self.config.epochs, self.config.seed);
        debug!(
            "Trained matcher on {} pairs over fields {:?}",
            self.training_examples.len(),
            self.fields
        );
        self.model = Some(model);
        Ok(())
    }

    fn search(
        &self,
        messy: &[ComparisonRecord],
        canonical: &[ComparisonRecord],
    ) -> Result<Vec<MatchCandidate>, MatchingError> {
        let model = self.model.as_ref().ok_or(MatchingError::NotTrained)?;
        check_datasets(messy, canonical)?;

        let index = BlockIndex::build(canonical);
        let candidates = messy
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let mut best = MatchCandidate::none(i);
                for j in index.candidates(m) {
                    let score = model.predict(&pair_features(&self.fields, m, &canonical[j]));
                    if !best.has_candidate() || score > best.score {
                        best = MatchCandidate {
                            messy_index: i,
                            canonical_index: Some(j),
                            score,
                        };
                    }
                }
                best
            })
            .collect();
        Ok(candidates)
    }

    fn cleanup_training(&mut self) {
        self.training_examples.clear();
    }
}

/// Deterministic, training-free matcher: mean normalized Levenshtein
/// similarity over the comparison fields, against every canonical record.
#[derive(Debug, Default, Clone)]
pub struct EditDistanceMatcher;

impl EditDistanceMatcher {
    pub fn score(fields: &[String], a: &ComparisonRecord, b: &ComparisonRecord) -> f64 {
        if fields.is_empty() {
            return 0.0;
        }
        fields
            .iter()
            .map(|f| field_similarities(a.get(f), b.get(f))[1])
            .sum::<f64>()
            / fields.len() as f64
    }
}

impl Matcher for EditDistanceMatcher {
    fn train(
        &mut self,
        messy: &[ComparisonRecord],
        canonical: &[ComparisonRecord],
        _corpus: &mut TrainingCorpus,
    ) -> Result<(), MatchingError> {
        check_datasets(messy, canonical)
    }

    fn search(
        &self,
        messy: &[ComparisonRecord],
        canonical: &[ComparisonRecord],
    ) -> Result<Vec<MatchCandidate>, MatchingError> {
        check_datasets(messy, canonical)?;
        let fields = field_names(messy.iter().chain(canonical.iter()));
        Ok(messy
            .iter()
            .enumerate()
            .map(|(i, m)| {
                canonical
                    .iter()
                    .enumerate()
                    .map(|(j, c)| MatchCandidate {
                        messy_index: i,
                        canonical_index: Some(j),
                        score: Self::score(&fields, m, c),
                    })
                    .fold(MatchCandidate::none(i), |best, c| {
                        if !best.has_candidate() || c.score > best.score {
                            c
                        } else {
                            best
                        }
                    })
            })
            .collect())
    }
}
