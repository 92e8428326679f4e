// src/matching/model.rs
use log::warn;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// A lightweight logistic regression trained by stochastic gradient descent.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LogisticRegression {
    // feature weights followed by the bias term
    weights: Vec<f64>,
    learning_rate: f64,
    trials: usize,
}

impl LogisticRegression {
    pub fn new(feature_count: usize, learning_rate: f64) -> Self {
        Self {
            weights: vec![0.0; feature_count + 1],
            learning_rate,
            trials: 0,
        }
    }

    pub fn feature_count(&self) -> usize {
        self.weights.len() - 1
    }

    pub fn trials(&self) -> usize {
        self.trials
    }

    /// Probability that the pair described by `features` is a match.
    pub fn predict(&self, features: &[f64]) -> f64 {
        if features.len() != self.feature_count() {
            warn!(
                "Expected {} features, but got {}. Prediction will be unreliable.",
                self.feature_count(),
                features.len()
            );
            return 0.5;
        }
        let features_with_bias = features.iter().chain(std::iter::once(&1.0));
        let logit: f64 = self
            .weights
            .iter()
            .zip(features_with_bias)
            .map(|(w, f)| w * f)
            .sum();
        1.0 / (1.0 + (-logit).exp())
    }

    /// One gradient step towards `label` (1.0 match, 0.0 distinct).
    pub fn update(&mut self, features: &[f64], label: f64) {
        if features.len() != self.feature_count() {
            warn!("Skipping model update due to feature vector length mismatch.");
            return;
        }
        let error = label - self.predict(features);
        for (i, feature_val) in features.iter().enumerate() {
            self.weights[i] += self.learning_rate * error * feature_val;
        }
        let bias_index = self.weights.len() - 1;
        self.weights[bias_index] += self.learning_rate * error;
        self.trials += 1;
    }

    /// Runs `epochs` shuffled passes over `examples`. The shuffle is seeded so
    /// the same corpus always yields the same weights.
    pub fn fit(&mut self, examples: &[(Vec<f64>, f64)], epochs: usize, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..examples.len()).collect();
        for _ in 0..epochs {
            order.shuffle(&mut rng);
            for &i in &order {
                let (features, label) = &examples[i];
                self.update(features, *label);
            }
        }
    }
}
