// src/matching/labeler.rs
use log::warn;
use std::io::{self, BufRead, Write};

use crate::models::records::ComparisonRecord;

/// Answer to "do these two records refer to the same entity?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Match,
    Distinct,
    Unsure,
    /// No more questions this session.
    Stop,
}

/// Source of pairwise labels during bootstrap training.
pub trait Labeler: Send + Sync {
    fn label(&mut self, messy: &ComparisonRecord, canonical: &ComparisonRecord) -> Label;
}

/// Unattended runs: never answers, so bootstrap ends immediately.
pub struct NoLabeler;

impl Labeler for NoLabeler {
    fn label(&mut self, _messy: &ComparisonRecord, _canonical: &ComparisonRecord) -> Label {
        Label::Stop
    }
}

/// Wraps a closure; deterministic labeling for tests and scripted runs.
pub struct FnLabeler<F>(pub F);

impl<F> Labeler for FnLabeler<F>
where
    F: FnMut(&ComparisonRecord, &ComparisonRecord) -> Label + Send + Sync,
{
    fn label(&mut self, messy: &ComparisonRecord, canonical: &ComparisonRecord) -> Label {
        (self.0)(messy, canonical)
    }
}

/// Asks an operator on the terminal.
pub struct ConsoleLabeler {
    asked: usize,
}

impl ConsoleLabeler {
    pub fn new() -> Self {
        Self { asked: 0 }
    }

    fn render(messy: &ComparisonRecord, canonical: &ComparisonRecord) -> String {
        let mut out = String::new();
        for (field, value) in &messy.fields {
            out.push_str(&format!(
                "  {:<16} {:<32} | {}\n",
                field,
                value,
                canonical.get(field)
            ));
        }
        out
    }
}

impl Default for ConsoleLabeler {
    fn default() -> Self {
        Self::new()
    }
}

impl Labeler for ConsoleLabeler {
    fn label(&mut self, messy: &ComparisonRecord, canonical: &ComparisonRecord) -> Label {
        self.asked += 1;
        println!("\n--- Question {} ---", self.asked);
        println!("  {:<16} {:<32} | {}", "field", "incoming", "registry");
        print!("{}", Self::render(messy, canonical));

        let stdin = io::stdin();
        loop {
            print!("Same entity? (y)es / (n)o / (u)nsure / (f)inished: ");
            if io::stdout().flush().is_err() {
                return Label::Stop;
            }
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => return Label::Stop,
                Ok(_) => {}
                Err(e) => {
                    warn!("Failed to read label from stdin: {}", e);
                    return Label::Stop;
                }
            }
            match line.trim().to_lowercase().as_str() {
                "y" | "yes" => return Label::Match,
                "n" | "no" => return Label::Distinct,
                "u" | "unsure" => return Label::Unsure,
                "f" | "finished" => return Label::Stop,
                other => println!("Unrecognized answer {:?}", other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_labeler_delegates() {
        let mut calls = 0;
        let mut labeler = FnLabeler(|m: &ComparisonRecord, c: &ComparisonRecord| {
            calls += 1;
            if m.get("name") == c.get("name") {
                Label::Match
            } else {
                Label::Distinct
            }
        });
        let a = ComparisonRecord::new(None, [("name", "juan")]);
        let b = ComparisonRecord::new(None, [("name", "pedro")]);
        assert_eq!(labeler.label(&a, &a), Label::Match);
        assert_eq!(labeler.label(&a, &b), Label::Distinct);
        drop(labeler);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_no_labeler_stops() {
        let a = ComparisonRecord::default();
        assert_eq!(NoLabeler.label(&a, &a), Label::Stop);
    }

    #[test]
    fn test_console_render_aligns_fields() {
        let messy = ComparisonRecord::new(None, [("name", "juan c")]);
        let canonical = ComparisonRecord::new(Some(1), [("name", "juan")]);
        let rendered = ConsoleLabeler::render(&messy, &canonical);
        assert!(rendered.contains("juan c"));
        assert!(rendered.trim_end().ends_with("| juan"));
    }
}
