// src/utils/config.rs
use log::info;
use std::path::PathBuf;

use crate::utils::env::env_or;

/// Adaptive threshold parameters. The ratios are applied to the best score in
/// the batch; the floors keep a batch whose best match is itself poor from
/// producing certain links.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdConfig {
    pub lower_ratio: f64,
    pub upper_ratio: f64,
    pub min_lower: f64,
    pub min_upper: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            lower_ratio: 0.1,
            upper_ratio: 0.7,
            min_lower: 0.05,
            min_upper: 0.6,
        }
    }
}

impl ThresholdConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            lower_ratio: env_or("LINKING_LOWER_RATIO", d.lower_ratio),
            upper_ratio: env_or("LINKING_UPPER_RATIO", d.upper_ratio),
            min_lower: env_or("LINKING_MIN_LOWER", d.min_lower),
            min_upper: env_or("LINKING_MIN_UPPER", d.min_upper),
        }
    }

    /// `(lower, upper)` bounds of the dubious band for a batch whose best
    /// candidate scored `max_score`.
    pub fn bounds(&self, max_score: f64) -> (f64, f64) {
        let lower = (max_score * self.lower_ratio).max(self.min_lower);
        let upper = (max_score * self.upper_ratio).max(self.min_upper);
        (lower, upper)
    }
}

/// Training and bootstrap parameters for the learned matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    pub min_training_pairs: usize,
    pub max_bootstrap_questions: usize,
    pub bootstrap_target_per_class: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_training_pairs: 2,
            max_bootstrap_questions: 30,
            bootstrap_target_per_class: 5,
            epochs: 200,
            learning_rate: 0.1,
            seed: 42,
        }
    }
}

impl MatcherConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_training_pairs: env_or("LINKING_MIN_TRAINING_PAIRS", d.min_training_pairs),
            max_bootstrap_questions: env_or(
                "LINKING_BOOTSTRAP_MAX_QUESTIONS",
                d.max_bootstrap_questions,
            ),
            bootstrap_target_per_class: env_or(
                "LINKING_BOOTSTRAP_TARGET_PER_CLASS",
                d.bootstrap_target_per_class,
            ),
            epochs: env_or("LINKING_EPOCHS", d.epochs),
            learning_rate: env_or("LINKING_LEARNING_RATE", d.learning_rate),
            seed: env_or("LINKING_SEED", d.seed),
        }
    }
}

/// Everything a linking job needs besides its stores.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkingConfig {
    pub thresholds: ThresholdConfig,
    pub matcher: MatcherConfig,
    pub training_dir: PathBuf,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            matcher: MatcherConfig::default(),
            training_dir: PathBuf::from("training"),
        }
    }
}

impl LinkingConfig {
    pub fn from_env() -> Self {
        Self {
            thresholds: ThresholdConfig::from_env(),
            matcher: MatcherConfig::from_env(),
            training_dir: std::env::var("LINKING_TRAINING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("training")),
        }
    }

    pub fn log_config(&self) {
        let t = &self.thresholds;
        info!(
            "Linking thresholds: lower = max(best * {}, {}), upper = max(best * {}, {})",
            t.lower_ratio, t.min_lower, t.upper_ratio, t.min_upper
        );
        info!(
            "Matcher: min_training_pairs={}, bootstrap questions={} (target {}/class), epochs={}, lr={}, seed={}",
            self.matcher.min_training_pairs,
            self.matcher.max_bootstrap_questions,
            self.matcher.bootstrap_target_per_class,
            self.matcher.epochs,
            self.matcher.learning_rate,
            self.matcher.seed
        );
        info!("Training corpora directory: {}", self.training_dir.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_bounds() {
        let t = ThresholdConfig::default();
        let (lower, upper) = t.bounds(0.65);
        assert!((lower - 0.065).abs() < 1e-9);
        assert!((upper - 0.6).abs() < 1e-9);

        let (lower, upper) = t.bounds(1.0);
        assert!((lower - 0.1).abs() < 1e-9);
        assert!((upper - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_floors_apply_for_poor_batches() {
        let (lower, upper) = ThresholdConfig::default().bounds(0.02);
        assert_eq!(lower, 0.05);
        assert_eq!(upper, 0.6);
    }

    #[test]
    fn test_config_from_env() {
        env::set_var("LINKING_UPPER_RATIO", "0.8");
        env::set_var("LINKING_MIN_LOWER", "0.1");
        env::set_var("LINKING_EPOCHS", "50");
        env::set_var("LINKING_TRAINING_DIR", "/tmp/corpora");

        let config = LinkingConfig::from_env();
        assert_eq!(config.thresholds.upper_ratio, 0.8);
        assert_eq!(config.thresholds.min_lower, 0.1);
        assert_eq!(config.thresholds.lower_ratio, 0.1);
        assert_eq!(config.matcher.epochs, 50);
        assert_eq!(config.training_dir, PathBuf::from("/tmp/corpora"));

        env::remove_var("LINKING_UPPER_RATIO");
        env::remove_var("LINKING_MIN_LOWER");
        env::remove_var("LINKING_EPOCHS");
        env::remove_var("LINKING_TRAINING_DIR");
    }
}
