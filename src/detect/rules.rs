//! Detection rule table
//!
//! Each rule is a plain record: the signal it raises, its default severity,
//! and a predicate returning rule-specific payload fields when it fires.
//! Rules run in table order.

use super::DetectionContext;
use crate::config::DetectionConfig;
use crate::meta::{parse_timestamp, Severity, SignalType};
use serde_json::{json, Value};

pub type RuleCheck = fn(&DetectionContext<'_>, &DetectionConfig) -> Option<Value>;

/// One row of the rule table
#[derive(Clone, Copy)]
pub struct Rule {
    pub signal_type: SignalType,
    pub severity: Severity,
    pub check: RuleCheck,
}

pub static RULES: &[Rule] = &[
    Rule {
        signal_type: SignalType::StolenMedia,
        severity: Severity::Error,
        check: stolen_media,
    },
    Rule {
        signal_type: SignalType::DuplicateListing,
        severity: Severity::Warning,
        check: duplicate_listing,
    },
    Rule {
        signal_type: SignalType::PriceAnomaly,
        severity: Severity::Warning,
        check: price_anomaly,
    },
    Rule {
        signal_type: SignalType::GeoAddressMismatch,
        severity: Severity::Error,
        check: geo_address_mismatch,
    },
    Rule {
        signal_type: SignalType::LowConfidenceSource,
        severity: Severity::Info,
        check: low_confidence_source,
    },
];

fn same(a: &Option<String>, b: &Option<String>) -> Option<bool> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a == b),
        _ => None,
    }
}

/// Identical media on another source for a different (or unknown) address
fn stolen_media(ctx: &DetectionContext<'_>, _: &DetectionConfig) -> Option<Value> {
    let matched = ctx.matched?;
    if !ctx.cross_source() {
        return None;
    }
    let media = ctx.listing.media_hash.as_ref()?;
    if matched.media_hash.as_ref() != Some(media) {
        return None;
    }
    if same(&ctx.listing.address_hash, &matched.address_hash) == Some(true) {
        return None;
    }
    Some(json!({
        "media_hash": media,
        "matched_source_id": matched.source_id,
    }))
}

fn duplicate_listing(ctx: &DetectionContext<'_>, config: &DetectionConfig) -> Option<Value> {
    let matched = ctx.matched?;
    if !ctx.cross_source() || ctx.listing.confidence_score < config.duplicate_min_confidence {
        return None;
    }
    Some(json!({
        "confidence": ctx.listing.confidence_score,
        "matched_source_id": matched.source_id,
    }))
}

fn price_anomaly(ctx: &DetectionContext<'_>, config: &DetectionConfig) -> Option<Value> {
    let matched = ctx.matched?;
    let (new_price, old_price) = (ctx.listing.price?, matched.price?);
    let (new_currency, old_currency) = (
        ctx.listing.currency.as_deref()?,
        matched.currency.as_deref()?,
    );
    if new_currency != old_currency || old_price <= 0.0 {
        return None;
    }

    let observed_at = parse_timestamp(&ctx.listing.observed_at)?;
    let matched_at = parse_timestamp(&matched.observed_at)?;
    let age_days = (observed_at - matched_at).num_days().abs();
    if age_days > config.price_lookback_days {
        return None;
    }

    let change = (new_price - old_price) / old_price;
    if change.abs() <= config.price_change_threshold {
        return None;
    }
    Some(json!({
        "currency": new_currency,
        "change_ratio": change,
        "days_between": age_days,
    }))
}

fn geo_address_mismatch(ctx: &DetectionContext<'_>, _: &DetectionConfig) -> Option<Value> {
    let matched = ctx.matched?;
    let address_agrees = same(&ctx.listing.address_hash, &matched.address_hash)?;
    let geo_agrees = same(&ctx.listing.geo_hash, &matched.geo_hash)?;
    if address_agrees == geo_agrees {
        return None;
    }
    Some(json!({
        "address_agrees": address_agrees,
        "geo_agrees": geo_agrees,
    }))
}

fn low_confidence_source(ctx: &DetectionContext<'_>, config: &DetectionConfig) -> Option<Value> {
    if ctx.source.trust_score >= config.low_trust_floor
        || ctx.listing.confidence_score >= config.low_trust_max_confidence
    {
        return None;
    }
    Some(json!({
        "trust_floor": config.low_trust_floor,
        "confidence": ctx.listing.confidence_score,
    }))
}
