// src/utils/logging.rs - Logging helpers for linking passes
use log::{debug, info, warn};
use std::time::Instant;

use crate::models::records::EntityKind;
use crate::models::stats::{FanOutReport, LinkingStats};

#[derive(Clone)]
pub struct LinkingLogger {
    kind_name: &'static str,
    kind_emoji: &'static str,
    start_time: Instant,
}

impl LinkingLogger {
    pub fn new(kind: EntityKind) -> Self {
        let (kind_name, kind_emoji) = match kind {
            EntityKind::Person => ("PERSON", "👤"),
            EntityKind::Party => ("PARTY", "🏛️"),
        };
        Self {
            kind_name,
            kind_emoji,
            start_time: Instant::now(),
        }
    }

    pub fn log_start(&self, batch_size: usize, registry_size: usize) {
        info!(
            "[{}] {} 🚀 Linking {} messy records against {} canonical records",
            self.kind_name, self.kind_emoji, batch_size, registry_size
        );
    }

    pub fn log_phase(&self, phase: &str, details: Option<&str>) {
        let elapsed = self.start_time.elapsed();
        match details {
            Some(details) => info!(
                "[{}] {} 🔄 Phase: {} - {} [+{:.1}s]",
                self.kind_name, self.kind_emoji, phase, details, elapsed.as_secs_f32()
            ),
            None => info!(
                "[{}] {} 🔄 Phase: {} [+{:.1}s]",
                self.kind_name, self.kind_emoji, phase, elapsed.as_secs_f32()
            ),
        }
    }

    pub fn log_exact_prepass(&self, linked: usize, remaining: usize) {
        info!(
            "[{}] {} 🎯 Exact pre-pass linked {} records, {} remain",
            self.kind_name, self.kind_emoji, linked, remaining
        );
    }

    pub fn log_prior_approvals(&self, approved: usize, remaining: usize) {
        info!(
            "[{}] {} 📜 Prior approvals reused: {}, {} remain",
            self.kind_name, self.kind_emoji, approved, remaining
        );
    }

    pub fn log_thresholds(&self, max_score: f64, lower: f64, upper: f64) {
        info!(
            "[{}] {} 📏 Best score {:.4} → dubious band ({:.4}, {:.4})",
            self.kind_name, self.kind_emoji, max_score, lower, upper
        );
    }

    pub fn log_unresolved(&self, count: usize, reason: &str) {
        warn!(
            "[{}] {} ⚠️  {} records left unresolved: {}",
            self.kind_name, self.kind_emoji, count, reason
        );
    }

    pub fn log_corpus(&self, matches: usize, distinct: usize) {
        debug!(
            "[{}] {} 💾 Training corpus: {} match / {} distinct pairs",
            self.kind_name, self.kind_emoji, matches, distinct
        );
    }

    pub fn log_completion(&self, stats: &LinkingStats) {
        info!(
            "[{}] {} ✅ Linking complete in {:.2}s: {} total → {} certain ({} exact, {} prior), {} dubious ({} new questions), {} distinct ({} prior denials), {} unresolved",
            self.kind_name,
            self.kind_emoji,
            self.start_time.elapsed().as_secs_f32(),
            stats.total,
            stats.certain,
            stats.exact,
            stats.prior_approved,
            stats.dubious,
            stats.pending_created,
            stats.distinct,
            stats.prior_denied,
            stats.unresolved
        );
    }

    pub fn log_fan_out(&self, linking_id: &uuid::Uuid, report: &FanOutReport) {
        info!(
            "[{}] {} 📤 Fan-out for {}: {} rows updated, {} duplicates deleted, {} rows cleared{}",
            self.kind_name,
            self.kind_emoji,
            linking_id,
            report.updated,
            report.deleted_duplicates,
            report.cleared,
            if report.used_fallback { " (per-row fallback)" } else { "" }
        );
    }

    pub fn log_debug(&self, message: &str) {
        debug!("[{}] {} {}", self.kind_name, self.kind_emoji, message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!("[{}] {} ⚠️  {}", self.kind_name, self.kind_emoji, message);
    }
}
