//! Raw text -> canonical value.
//!
//! Providers hand back whatever the upstream page or API rendered:
//! "1.20 Trillion", "-0.52%", "30.00 Months", "Positive OCF (No Burn)",
//! "2027-01-15". Normalization keeps the lowercased text (some rules match on
//! wording) and extracts the first numeric token with any magnitude suffix
//! applied. It never fails; anything unusable becomes a sentinel.

use analysis_core::{MetricKey, NormalizedValue};
use once_cell::sync::Lazy;
use regex::Regex;

static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(-)?\s*[$€£]?\s*(\d[\d,]*(?:\.\d+)?|\.\d+)\s*(trillion|billion|million|thousand|tn|bn|mn|t|b|m|k)?\b",
    )
    .expect("number pattern is valid")
});

// Blank and "-" cells are not sentinels: they read as zero.
const UNRESOLVED_TOKENS: [&str; 6] = ["n/a", "na", "none", "error", "nan", "null"];

/// Magnitude suffix found after a number.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Magnitude {
    None,
    Thousand,
    Million,
    Billion,
    Trillion,
}

impl Magnitude {
    fn parse(suffix: Option<&str>) -> Self {
        match suffix.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("k") | Some("thousand") => Magnitude::Thousand,
            Some("m") | Some("mn") | Some("million") => Magnitude::Million,
            Some("b") | Some("bn") | Some("billion") => Magnitude::Billion,
            Some("t") | Some("tn") | Some("trillion") => Magnitude::Trillion,
            _ => Magnitude::None,
        }
    }

    fn absolute(&self) -> f64 {
        match self {
            Magnitude::None => 1.0,
            Magnitude::Thousand => 1e3,
            Magnitude::Million => 1e6,
            Magnitude::Billion => 1e9,
            Magnitude::Trillion => 1e12,
        }
    }

    /// Scale into billions. A bare number is taken to already be billions,
    /// which is how market caps are quoted throughout the report.
    fn billions(&self) -> f64 {
        match self {
            Magnitude::None | Magnitude::Billion => 1.0,
            Magnitude::Thousand => 1e-6,
            Magnitude::Million => 1e-3,
            Magnitude::Trillion => 1e3,
        }
    }
}

pub fn is_unresolved_token(raw: &str) -> bool {
    let lower = raw.trim().to_ascii_lowercase();
    UNRESOLVED_TOKENS.contains(&lower.as_str())
}

/// First number in `raw` and the magnitude suffix attached to it.
fn extract_number(raw: &str) -> Option<(f64, Magnitude)> {
    let caps = NUMBER.captures(raw)?;
    let digits = caps.get(2)?.as_str().replace(',', "");
    let mut value: f64 = digits.parse().ok()?;
    if caps.get(1).is_some() {
        value = -value;
    }
    if !value.is_finite() {
        return None;
    }
    Some((value, Magnitude::parse(caps.get(3).map(|m| m.as_str()))))
}

/// Normalize a raw metric value. Market cap is expressed in billions; other
/// magnitudes are expanded to absolute units.
pub fn normalize(metric: MetricKey, raw: &str) -> NormalizedValue {
    if is_unresolved_token(raw) {
        return NormalizedValue::Unresolved;
    }

    let text = raw.trim().to_lowercase();
    let number = match extract_number(raw) {
        Some((value, magnitude)) if metric == MetricKey::MarketCap => value * magnitude.billions(),
        Some((value, magnitude)) => value * magnitude.absolute(),
        None => 0.0,
    };

    NormalizedValue::Value { number, text }
}
