// src/core/scanner/entropy_scanner.rs

//! Heuristics for machine-generated domain names.
//!
//! The registrable label (e.g. `example` in `example.co.uk`) is scored on
//! entropy, vowel and digit ratios, character variety, consonant runs and how
//! English its letter pairs look. Higher scores look more random.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tracing::debug;

use crate::core::error::ProbeFailure;
use crate::core::models::{DomainRandomness, Fragment, Input};
use crate::core::runner::{Probe, ProbeContext};

/// log2(62): bits per symbol of a uniformly random alphanumeric string.
const MAX_ALPHABET_BITS: f64 = 5.954_196_310_386_875;

const BASE_THRESHOLD: f64 = 0.50;
const SHORT_LABEL: usize = 6;

const W_ENTROPY: f64 = 0.25;
const W_VOWEL_INVERSE: f64 = 0.15;
const W_DIGITS: f64 = 0.15;
const W_BIGRAM_INVERSE: f64 = 0.20;
const W_UNIQUE_INVERSE: f64 = 0.10;
const W_LONG_RUN: f64 = 0.15;

static COMMON_BIGRAMS: &[&str] = &[
    "th", "he", "in", "er", "an", "re", "on", "at", "en", "nd", "ti", "es", "or", "te", "of", "ed", "is", "it",
    "al", "ar", "st", "to", "nt", "ng", "se", "ha", "as", "ou", "io", "le",
];

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    let total = s.chars().count();
    if total == 0 {
        return 0.0;
    }
    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_default() += 1;
    }
    freq.values()
        .map(|&count| {
            let p = count as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

// Zero for empty input.
fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { count as f64 / total as f64 }
}

/// Share of adjacent letter pairs that are common in English.
fn bigram_englishness(s: &str) -> f64 {
    let letters: Vec<char> = s.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 2 {
        return 0.0;
    }
    let pairs = letters.windows(2).count();
    let common = letters
        .windows(2)
        .filter(|pair| {
            let bigram: String = pair.iter().collect();
            COMMON_BIGRAMS.contains(&bigram.as_str())
        })
        .count();
    ratio(common, pairs)
}

/// Longest run of consonants and digits; hyphens break a run.
fn longest_consonant_run(s: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in s.chars() {
        if c.is_ascii_digit() || (c.is_alphabetic() && !is_vowel(c)) {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Scores how random the registrable label of `domain` looks.
///
/// # Arguments
///
/// * `domain` - A registrable domain such as `example.com`.
///
/// # Returns
///
/// The individual metrics, the combined score in 0..=1 and the reasons it was flagged.
pub fn analyze_domain_randomness(domain: &str) -> DomainRandomness {
    let label = domain.split('.').next().unwrap_or_default().to_lowercase();
    let s: String = label.chars().filter(|c| c.is_alphanumeric() || *c == '-').collect();
    let length = s.chars().count();

    let entropy = shannon_entropy(&s);
    let normalized_entropy = if length == 0 { 0.0 } else { entropy / length as f64 / MAX_ALPHABET_BITS };
    let vowel_ratio = ratio(s.chars().filter(|c| is_vowel(*c)).count(), length);
    let digit_ratio = ratio(s.chars().filter(|c| c.is_ascii_digit()).count(), length);
    let unique_char_ratio = ratio(s.chars().collect::<HashSet<_>>().len(), length);
    let longest_run = longest_consonant_run(&s);
    let bigram = bigram_englishness(&s);

    let long_run_norm = (longest_run as f64 / 6.0).min(1.0);
    let score = (W_ENTROPY * normalized_entropy
        + W_VOWEL_INVERSE * (1.0 - vowel_ratio)
        + W_DIGITS * digit_ratio
        + W_BIGRAM_INVERSE * (1.0 - bigram)
        + W_UNIQUE_INVERSE * (1.0 - unique_char_ratio)
        + W_LONG_RUN * long_run_norm)
        .clamp(0.0, 1.0);

    // Short labels need a slightly higher score before they count as random.
    let threshold = if length > 0 && length < SHORT_LABEL {
        BASE_THRESHOLD + 0.10 * ((SHORT_LABEL - length) as f64 / 5.0)
    } else {
        BASE_THRESHOLD
    };

    let mut is_suspicious = false;
    let mut reasons = Vec::new();
    if score > threshold {
        is_suspicious = true;
        reasons.push(format!("high randomness score={score:.3}>threshold={threshold:.3}"));
    }
    if longest_run >= 6 {
        is_suspicious = true;
        reasons.push(format!("long consonant/digit run={longest_run}"));
    }
    if digit_ratio > 0.5 && length >= SHORT_LABEL {
        is_suspicious = true;
        reasons.push(format!("high digit ratio={digit_ratio:.2}"));
    }
    if unique_char_ratio < 0.25 && length >= SHORT_LABEL {
        reasons.push(format!("low unique-char-ratio={unique_char_ratio:.2}"));
    }

    DomainRandomness {
        label,
        length,
        entropy,
        normalized_entropy,
        vowel_ratio,
        digit_ratio,
        unique_char_ratio,
        longest_consonant_run: longest_run,
        bigram_englishness: bigram,
        randomness_score: score,
        is_suspicious,
        reasons,
    }
}

pub struct EntropyProbe;

#[async_trait]
impl Probe for EntropyProbe {
    fn name(&self) -> &'static str {
        "entropy_check"
    }

    async fn run(&self, input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        let randomness = analyze_domain_randomness(&input.domain);
        debug!(domain = %input.domain, score = randomness.randomness_score, "Scored domain randomness.");
        Ok(Fragment::Randomness(randomness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dictionary_word_is_not_random() {
        let result = analyze_domain_randomness("google.com");
        assert_eq!(result.label, "google");
        assert_eq!(result.length, 6);
        assert_eq!(result.longest_consonant_run, 2);
        assert!(result.randomness_score < BASE_THRESHOLD);
        assert!(!result.is_suspicious);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_consonant_soup_is_flagged() {
        let result = analyze_domain_randomness("xkqzvbnmwrt.net");
        assert!(result.is_suspicious);
        assert_eq!(result.longest_consonant_run, 11);
        assert!(result.reasons.iter().any(|r| r.starts_with("long consonant/digit run")));
    }

    #[test]
    fn test_digit_heavy_label_is_flagged() {
        let result = analyze_domain_randomness("83920174xk.com");
        assert!(result.is_suspicious);
        assert!(result.digit_ratio > 0.5);
        assert!(result.reasons.iter().any(|r| r.starts_with("high digit ratio")));
    }

    #[test]
    fn test_entropy_of_uniform_string() {
        assert!((shannon_entropy("abcd") - 2.0).abs() < 1e-9);
        assert_eq!(shannon_entropy(""), 0.0);
        assert!((bigram_englishness("the") - 1.0).abs() < 1e-9);
    }
}
