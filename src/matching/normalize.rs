// src/matching/normalize.rs - Field normalization shared by every entity kind
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

pub const MIN_TOKEN_LENGTH: usize = 2;
const BLOCK_PREFIX_LENGTH: usize = 3;

static HONORIFIC_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:dr|dra|ing|lic|prof|sr|sra|srta|cdor|arq)\s+)+")
        .expect("honorific pattern is valid")
});

/// Strips diacritics, case-folds, replaces punctuation with spaces and
/// collapses whitespace: `"  Pérez-Núñez, J. "` → `"perez nunez j"`.
pub fn normalize_value(raw: &str) -> String {
    let folded: String = raw
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// [`normalize_value`] plus removal of leading honorifics ("Dr.", "Lic.", ...).
pub fn normalize_given_name(raw: &str) -> String {
    let normalized = normalize_value(raw);
    HONORIFIC_PREFIX.replace(&normalized, "").trim().to_string()
}

/// Party names: `&` is read as the conjunction before normalizing.
pub fn normalize_denomination(raw: &str) -> String {
    normalize_value(&raw.replace('&', " y "))
}

/// Tokens of an already-normalized value, skipping very short ones.
pub fn tokenize(normalized: &str) -> BTreeSet<String> {
    normalized
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_LENGTH)
        .map(str::to_string)
        .collect()
}

/// Blocking keys: every token plus the first characters of each token, so a
/// truncated or misspelled token still shares a block with the full one.
pub fn block_keys(normalized: &str) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for token in tokenize(normalized) {
        if token.chars().count() > BLOCK_PREFIX_LENGTH {
            keys.insert(format!("{}*", token.chars().take(BLOCK_PREFIX_LENGTH).collect::<String>()));
        }
        keys.insert(token);
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_value_strips_diacritics_and_punctuation() {
        assert_eq!(normalize_value("  Pérez-Núñez, J. "), "perez nunez j");
        assert_eq!(normalize_value("MÜLLER"), "muller");
        assert_eq!(normalize_value(""), "");
        assert_eq!(normalize_value("Unión Cívica Radical"), "union civica radical");
    }

    #[test]
    fn test_normalize_given_name_drops_honorifics() {
        assert_eq!(normalize_given_name("Dr. Juan Carlos"), "juan carlos");
        assert_eq!(normalize_given_name("Lic. Dra. María"), "maria");
        assert_eq!(normalize_given_name("Drago"), "drago");
    }

    #[test]
    fn test_normalize_denomination() {
        assert_eq!(normalize_denomination("Trabajo & Progreso"), "trabajo y progreso");
    }

    #[test]
    fn test_block_keys_include_prefixes() {
        let keys = block_keys("juan c perez");
        assert!(keys.contains("juan"));
        assert!(keys.contains("jua*"));
        assert!(keys.contains("perez"));
        assert!(keys.contains("per*"));
        assert!(!keys.contains("c"));
    }
}
