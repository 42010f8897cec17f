//! Parsed listing fields supplied by upstream extraction

use crate::fingerprint::{normalize_image_hash, AddressParts};
use crate::meta::{format_timestamp, parse_timestamp, FingerprintKind, ListingStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw extraction output for one snapshot.
///
/// Every field is kept as loose JSON so a wrongly-typed value (a numeric zip,
/// a bare string where a list was expected) becomes an [`InputIssue`] during
/// [`ParsedFields::normalize`] instead of rejecting the whole feed line.
/// Numeric fields accept numeric strings since extractors frequently hand
/// over "$140,000" verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedFields {
    #[serde(default)]
    pub title: Option<Value>,
    #[serde(default)]
    pub description: Option<Value>,
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(default)]
    pub currency: Option<Value>,
    #[serde(default)]
    pub address: Option<Value>,
    #[serde(default)]
    pub lat: Option<Value>,
    #[serde(default)]
    pub lng: Option<Value>,
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub listed_at: Option<Value>,
    #[serde(default)]
    pub image_hashes: Option<Value>,
}

/// A field that was missing or malformed; resolution continues without it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputIssue {
    pub field: String,
    pub reason: String,
    /// Fingerprint the field feeds, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<FingerprintKind>,
}

impl InputIssue {
    fn field(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
            fingerprint: None,
        }
    }

    fn fingerprint(field: &str, kind: FingerprintKind, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
            fingerprint: Some(kind),
        }
    }
}

/// Cleaned fields ready for fingerprinting and storage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub address: AddressParts,
    pub coordinates: Option<(f64, f64)>,
    pub status: ListingStatus,
    pub listed_at: Option<String>,
    pub image_hashes: Vec<String>,
    /// Which fingerprint inputs were supplied at all, valid or not
    pub geo_attempted: bool,
    pub address_attempted: bool,
    pub media_attempted: bool,
}

/// Scalar JSON as trimmed text; numbers and booleans are taken verbatim
fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    Some(text).filter(|s| !s.is_empty())
}

/// Text field, recording an issue when a list or object shows up instead
fn text(
    field: &str,
    value: &Option<Value>,
    kind: Option<FingerprintKind>,
    issues: &mut Vec<InputIssue>,
) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(raw @ (Value::Array(_) | Value::Object(_))) => {
            let reason = format!("not text: {}", raw);
            issues.push(match kind {
                Some(kind) => InputIssue::fingerprint(field, kind, reason),
                None => InputIssue::field(field, reason),
            });
            None
        }
        Some(raw) => scalar_text(raw),
    }
}

/// Parse a JSON number or numeric string, tolerating currency symbols and separators
fn parse_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | '_') && !c.is_whitespace())
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn is_present(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

impl ParsedFields {
    /// Clean every field, collecting an issue for each one that had to be dropped
    pub fn normalize(&self) -> (NormalizedFields, Vec<InputIssue>) {
        let mut issues = Vec::new();
        let mut out = NormalizedFields {
            title: text("title", &self.title, None, &mut issues),
            description: text("description", &self.description, None, &mut issues),
            ..Default::default()
        };

        if let Some(ref raw) = self.price {
            if is_present(&self.price) {
                match parse_number(raw) {
                    Some(price) if price >= 0.0 => out.price = Some(price),
                    _ => issues.push(InputIssue::field("price", format!("not a price: {}", raw))),
                }
            }
        }

        out.currency = match text("currency", &self.currency, None, &mut issues) {
            Some(code) if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) => {
                Some(code.to_ascii_uppercase())
            }
            Some(code) => {
                issues.push(InputIssue::field("currency", format!("not an ISO 4217 code: {}", code)));
                None
            }
            None => None,
        };
        if out.currency.is_none() && out.price.is_some() {
            let dollar = matches!(&self.price, Some(Value::String(s)) if s.trim_start().starts_with('$'));
            if dollar {
                out.currency = Some("USD".to_string());
            }
        }

        out.address = self.address_parts(&mut issues);
        out.address_attempted = !out.address.is_empty();
        if out.address_attempted && out.address.street.is_none() {
            issues.push(InputIssue::fingerprint(
                "address.street",
                FingerprintKind::Address,
                "street missing",
            ));
        }

        let lat_present = is_present(&self.lat);
        let lng_present = is_present(&self.lng);
        out.geo_attempted = lat_present || lng_present;
        if out.geo_attempted {
            let lat = self.lat.as_ref().and_then(parse_number);
            let lng = self.lng.as_ref().and_then(parse_number);
            match (lat, lng) {
                (Some(lat), Some(lng))
                    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) =>
                {
                    out.coordinates = Some((lat, lng));
                }
                (Some(_), Some(_)) => issues.push(InputIssue::fingerprint(
                    "lat/lng",
                    FingerprintKind::Geo,
                    "coordinates out of range",
                )),
                (None, _) => issues.push(InputIssue::fingerprint(
                    "lat",
                    FingerprintKind::Geo,
                    if lat_present { "not a number" } else { "missing" },
                )),
                (_, None) => issues.push(InputIssue::fingerprint(
                    "lng",
                    FingerprintKind::Geo,
                    if lng_present { "not a number" } else { "missing" },
                )),
            }
        }

        out.status = match text("status", &self.status, None, &mut issues) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                issues.push(InputIssue::field("status", format!("unknown status: {}", raw)));
                ListingStatus::Unknown
            }),
            None => ListingStatus::Unknown,
        };

        if let Some(raw) = text("listed_at", &self.listed_at, None, &mut issues) {
            match parse_timestamp(&raw) {
                Some(ts) => out.listed_at = Some(format_timestamp(&ts)),
                None => issues.push(InputIssue::field("listed_at", format!("not a date: {}", raw))),
            }
        }

        out.image_hashes = self.image_tokens(&mut issues);
        out.media_attempted = match &self.image_hashes {
            Some(Value::Array(items)) => !items.is_empty(),
            other => is_present(other),
        };

        (out, issues)
    }

    /// Address as an object of parts, or a bare string taken as the street
    fn address_parts(&self, issues: &mut Vec<InputIssue>) -> AddressParts {
        let kind = Some(FingerprintKind::Address);
        match &self.address {
            None | Some(Value::Null) => AddressParts::default(),
            Some(Value::Object(map)) => {
                let mut part = |name: &str| {
                    text(&format!("address.{}", name), &map.get(name).cloned(), kind, issues)
                };
                AddressParts {
                    street: part("street"),
                    city: part("city"),
                    state: part("state"),
                    zip: part("zip"),
                }
            }
            Some(Value::String(street)) => AddressParts {
                street: Some(street.trim().to_string()).filter(|s| !s.is_empty()),
                ..Default::default()
            },
            Some(raw) => {
                issues.push(InputIssue::fingerprint(
                    "address",
                    FingerprintKind::Address,
                    format!("not an address: {}", raw),
                ));
                AddressParts::default()
            }
        }
    }

    /// Image hash tokens; a lone string counts as a one-image list
    fn image_tokens(&self, issues: &mut Vec<InputIssue>) -> Vec<String> {
        let items: Vec<&Value> = match &self.image_hashes {
            None | Some(Value::Null) => return Vec::new(),
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single @ Value::String(_)) => vec![single],
            Some(raw) => {
                issues.push(InputIssue::fingerprint(
                    "image_hashes",
                    FingerprintKind::Media,
                    format!("not a list of hashes: {}", raw),
                ));
                return Vec::new();
            }
        };

        let mut tokens = Vec::new();
        for item in items {
            let hash = match item {
                Value::String(s) => normalize_image_hash(s),
                Value::Number(n) => normalize_image_hash(&n.to_string()),
                _ => None,
            };
            match hash {
                Some(hash) => tokens.push(hash),
                None => issues.push(InputIssue::fingerprint(
                    "image_hashes",
                    FingerprintKind::Media,
                    format!("unusable image hash: {}", item),
                )),
            }
        }
        tokens
    }
}
