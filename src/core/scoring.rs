// src/core/scoring.rs

//! Folds the aggregate feature vector into risk and trust scores, a final
//! score, a verdict and the reasons behind them.
//!
//! Every rule adds exactly one reason to one bucket and moves exactly one of
//! the two scores. The rules only read `AnalysisOutput`, so the result is a
//! pure function of the probe output.

use crate::core::models::{AnalysisOutput, Reasons, ScoringResult, Verdict};

/// How much each risk point pulls the final score down.
pub const RISK_WEIGHT: f64 = 0.2;

const MAX_SCORE: i32 = 100;

impl Verdict {
    /// Maps a final score onto the verdict bands.
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s < 50 => Verdict::Risky,
            50..=79 => Verdict::Suspicious,
            80..=100 => Verdict::Safe,
            _ => Verdict::Unclear,
        }
    }
}

enum Bucket {
    Good,
    Bad,
    Neutral,
}

enum Delta {
    Risk(i32),
    Trust(i32),
    None,
}

#[derive(Default)]
struct Tally {
    risk: i32,
    trust: i32,
    reasons: Reasons,
}

impl Tally {
    fn note(&mut self, bucket: Bucket, delta: Delta, reason: impl Into<String>) {
        let reason = reason.into();
        match bucket {
            Bucket::Good => self.reasons.good_reasons.push(reason),
            Bucket::Bad => self.reasons.bad_reasons.push(reason),
            Bucket::Neutral => self.reasons.neutral_reasons.push(reason),
        }
        match delta {
            Delta::Risk(points) => self.risk += points,
            Delta::Trust(points) => self.trust += points,
            Delta::None => {}
        }
    }
}

fn clamp(score: i32) -> i32 {
    score.clamp(0, MAX_SCORE)
}

/// Scores one analysis.
///
/// # Arguments
///
/// * `output` - The merged probe output; groups whose probe did not finish are zero-valued.
///
/// # Returns
///
/// A `ScoringResult` with both scores clamped to 0..=100 and the final score derived from them.
pub fn synthesize(output: &AnalysisOutput) -> ScoringResult {
    let mut tally = Tally::default();

    score_popularity(output, &mut tally);
    score_tld(output, &mut tally);
    score_url_features(output, &mut tally);
    score_infrastructure(output, &mut tally);
    score_registration(output, &mut tally);
    score_redirects(output, &mut tally);

    let risk = clamp(tally.risk);
    let trust = clamp(tally.trust);
    let final_score = clamp((f64::from(trust) - f64::from(risk) * RISK_WEIGHT).floor() as i32);

    ScoringResult {
        risk_score: risk as u8,
        trust_score: trust as u8,
        final_score: final_score as u8,
        verdict: Verdict::from_score(final_score),
        reasons: tally.reasons,
    }
}

fn score_popularity(output: &AnalysisOutput, tally: &mut Tally) {
    match output.rank {
        0 => tally.note(Bucket::Bad, Delta::Risk(20), "Very low traffic volume (unranked)."),
        rank @ 1..=10_000 => tally.note(
            Bucket::Good,
            Delta::Trust(90),
            format!("Global giant: ranked #{rank} worldwide."),
        ),
        rank @ 10_001..=100_000 => tally.note(
            Bucket::Good,
            Delta::Trust(45),
            format!("Established website with moderate popularity (#{rank})."),
        ),
        rank => tally.note(
            Bucket::Good,
            Delta::Trust(20),
            format!("Niche website with standard traffic volume (#{rank})."),
        ),
    }
}

fn score_tld(output: &AnalysisOutput, tally: &mut Tally) {
    let tld = &output.tld;
    if tld.is_risky {
        tally.note(
            Bucket::Bad,
            Delta::Risk(20),
            format!("High-risk domain extension .{} (often associated with spam).", tld.tld),
        );
    }
    if tld.is_trusted {
        tally.note(Bucket::Good, Delta::Trust(100), "High-trust official domain extension (government or education).");
    } else if tld.is_icann && !tld.is_risky {
        tally.note(Bucket::Neutral, Delta::None, "Standard, officially recognized domain extension.");
    }
    if !tld.is_icann {
        tally.note(Bucket::Bad, Delta::Risk(30), "Unregulated or non-standard domain extension.");
    }

    if output.http.supports_hsts {
        tally.note(Bucket::Good, Delta::Trust(20), "Enforces strict HTTPS (HSTS enabled).");
    }
}

fn score_url_features(output: &AnalysisOutput, tally: &mut Tally) {
    if output.is_shortener {
        tally.note(Bucket::Bad, Delta::Risk(25), "URL shortener detected (hides the true destination).");
    }
    if output.uses_ip {
        tally.note(Bucket::Bad, Delta::Risk(100), "Raw IP address used instead of a domain name.");
    }
    if output.contains_punycode {
        tally.note(Bucket::Bad, Delta::Risk(100), "Punycode detected in the host (possible spoofed domain).");
    }
    if output.structure.too_deep {
        tally.note(Bucket::Bad, Delta::Risk(30), "Excessively deep URL path.");
    }
    if output.structure.too_long {
        tally.note(Bucket::Bad, Delta::Risk(20), "URL length exceeds common limits.");
    }
    if output.subdomain_count > 2 {
        tally.note(
            Bucket::Bad,
            Delta::Risk(15),
            format!("Suspicious number of subdomains ({}).", output.subdomain_count),
        );
    }
    if output.keywords.has_keywords {
        tally.note(
            Bucket::Bad,
            Delta::Risk(10),
            format!("Sensitive keywords found in URL: {}", output.keywords.found.join(", ")),
        );
    }
    if output.has_homoglyph {
        tally.note(Bucket::Bad, Delta::Risk(60), "Look-alike characters detected in the domain (homoglyph attack).");
    }
}

fn score_infrastructure(output: &AnalysisOutput, tally: &mut Tally) {
    if output.dns.ns_valid {
        tally.note(Bucket::Good, Delta::Trust(10), "Valid DNS configuration detected.");
    } else {
        tally.note(Bucket::Bad, Delta::Risk(10), "Incomplete or missing DNS configuration.");
    }

    if output.dns.mx_valid {
        tally.note(Bucket::Good, Delta::Trust(10), "Valid email server configuration (MX records).");
    } else {
        tally.note(Bucket::Neutral, Delta::Risk(5), "No email server configured for this domain.");
    }
}

fn score_registration(output: &AnalysisOutput, tally: &mut Tally) {
    let Some(info) = &output.registration else {
        return;
    };

    if let Some(days) = info.age_days {
        let age = info.age_human.as_deref().unwrap_or("unknown age");
        match days {
            d if d <= 30 => tally.note(Bucket::Bad, Delta::Risk(25), format!("Newly created domain ({age}). High risk.")),
            d if d <= 365 => tally.note(Bucket::Bad, Delta::Risk(15), format!("Young domain ({age}). Use caution.")),
            d if d <= 1825 => tally.note(Bucket::Neutral, Delta::Trust(5), format!("Operational for {age}.")),
            _ => tally.note(Bucket::Good, Delta::Trust(15), format!("Long-standing domain history ({age}).")),
        }
    }

    if !info.registrar.is_empty() {
        tally.note(Bucket::Good, Delta::Trust(5), format!("Registered with {}.", info.registrar));
    }

    if info.dnssec {
        tally.note(Bucket::Good, Delta::Trust(10), "DNSSEC enabled.");
    } else {
        tally.note(Bucket::Neutral, Delta::None, "DNSSEC not enabled.");
    }
}

fn score_redirects(output: &AnalysisOutput, tally: &mut Tally) {
    let redirection = &output.http.redirection;
    if !redirection.is_redirected {
        return;
    }
    if redirection.chain_length > 3 {
        tally.note(
            Bucket::Bad,
            Delta::Risk(40),
            format!("Excessive redirection chain ({} hops).", redirection.chain_length),
        );
    }
    if redirection.has_domain_jump {
        tally.note(
            Bucket::Bad,
            Delta::Risk(50),
            format!("Cross-domain redirection to {}.", redirection.final_host),
        );
    }
}
