//! Address normalization
//!
//! Trivially different spellings of one address ("123 Main St., Apt 4" and
//! "123 main street") must normalize to the same text before hashing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Structured address as supplied by field extraction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressParts {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
}

impl AddressParts {
    /// True when no component carries any text
    pub fn is_empty(&self) -> bool {
        [&self.street, &self.city, &self.state, &self.zip]
            .iter()
            .all(|part| part.as_deref().map(str::trim).unwrap_or("").is_empty())
    }
}

fn unit_regex() -> &'static Regex {
    static UNIT_RE: OnceLock<Regex> = OnceLock::new();
    UNIT_RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:\b(?:apt|apartment|unit|suite|ste|bldg|building|fl|floor|rm|room)\b\.?\s*#?\s*[a-z0-9-]+|#\s*[a-z0-9-]+)",
        )
        .unwrap()
    })
}

fn punctuation_regex() -> &'static Regex {
    static PUNCT_RE: OnceLock<Regex> = OnceLock::new();
    PUNCT_RE.get_or_init(|| Regex::new(r"[^a-z0-9\s]").unwrap())
}

fn expand_token(token: &str) -> &str {
    match token {
        "st" | "str" => "street",
        "ave" | "av" | "avn" => "avenue",
        "rd" => "road",
        "blvd" => "boulevard",
        "dr" => "drive",
        "ln" => "lane",
        "ct" => "court",
        "pl" => "place",
        "ter" | "terr" => "terrace",
        "cir" => "circle",
        "pkwy" => "parkway",
        "hwy" => "highway",
        "sq" => "square",
        "trl" => "trail",
        "n" => "north",
        "s" => "south",
        "e" => "east",
        "w" => "west",
        "ne" => "northeast",
        "nw" => "northwest",
        "se" => "southeast",
        "sw" => "southwest",
        other => other,
    }
}

/// Normalize one free-text address component
pub fn normalize_component(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let without_units = unit_regex().replace_all(&lowered, " ");
    let without_punct = punctuation_regex().replace_all(&without_units, " ");
    without_punct
        .split_whitespace()
        .map(expand_token)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a postal code to its first five digits (US ZIP+4 collapses to ZIP)
pub fn normalize_zip(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).take(5).collect();
    if digits.is_empty() {
        let cleaned = normalize_component(raw);
        return (!cleaned.is_empty()).then_some(cleaned);
    }
    Some(digits)
}

/// Canonical text form of an address, or None when the street is missing.
///
/// Only components that are present contribute; each is labelled so that a
/// city can never collide with a state of the same spelling.
pub fn canonical_address(parts: &AddressParts) -> Option<String> {
    let street = parts
        .street
        .as_deref()
        .map(normalize_component)
        .filter(|s| !s.is_empty())?;

    let mut canonical = format!("street={}", street);
    let city = parts.city.as_deref().map(normalize_component);
    let state = parts.state.as_deref().map(normalize_component);
    let zip = parts.zip.as_deref().and_then(normalize_zip);

    for (label, value) in [("city", city), ("state", state), ("zip", zip)] {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            canonical.push('|');
            canonical.push_str(label);
            canonical.push('=');
            canonical.push_str(&value);
        }
    }
    Some(canonical)
}
