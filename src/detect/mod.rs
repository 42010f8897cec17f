//! Signal detection
//!
//! Detection is a pure function of a listing, the listing it matched (if any)
//! and the source it came from. Persisting the drafts is a separate step.

mod rules;

pub use rules::{Rule, RuleCheck, RULES};

use crate::config::DetectionConfig;
use crate::error::{Error, Result};
use crate::meta::{
    now_rfc3339, MetaDb, ObservedListing, Severity, Signal, SignalStatus, SignalType, Source,
};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

/// Everything a rule may look at
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    pub listing: &'a ObservedListing,
    pub matched: Option<&'a ObservedListing>,
    pub source: &'a Source,
}

impl DetectionContext<'_> {
    /// True when the matched listing came from another source
    pub fn cross_source(&self) -> bool {
        self.matched.is_some_and(|m| m.source_id != self.listing.source_id)
    }
}

/// A signal not yet written
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDraft {
    pub signal_type: SignalType,
    pub severity: Severity,
    pub observed_listing_id: String,
    pub matched_listing_id: Option<String>,
    pub payload: Value,
}

impl SignalDraft {
    /// Turn the draft into an OPEN signal row
    pub fn into_signal(self) -> Signal {
        let now = now_rfc3339();
        Signal {
            id: Uuid::new_v4().to_string(),
            signal_type: self.signal_type.to_string(),
            severity: self.severity.to_string(),
            observed_listing_id: self.observed_listing_id,
            matched_listing_id: self.matched_listing_id,
            payload_json: self.payload.to_string(),
            status: SignalStatus::Open.to_string(),
            created_at: now.clone(),
            updated_at: now,
            updated_by: None,
        }
    }
}

/// Rule-table signal detector
#[derive(Debug, Clone, Default)]
pub struct SignalDetector {
    config: DetectionConfig,
}

impl SignalDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// Evaluate every rule against one context
    pub fn detect(&self, ctx: &DetectionContext<'_>) -> Vec<SignalDraft> {
        let escalated = ctx.source.trust_score < self.config.escalation_trust_floor;

        RULES
            .iter()
            .filter_map(|rule| {
                let details = (rule.check)(ctx, &self.config)?;
                let severity = if escalated {
                    rule.severity.escalate()
                } else {
                    rule.severity
                };
                Some(SignalDraft {
                    signal_type: rule.signal_type,
                    severity,
                    observed_listing_id: ctx.listing.id.clone(),
                    matched_listing_id: ctx.matched.map(|m| m.id.clone()),
                    payload: payload(ctx, details, rule.severity, escalated),
                })
            })
            .collect()
    }

    /// Load a stored listing's context, detect, and record the resulting signals
    pub async fn detect_for_listing(
        &self,
        db: &MetaDb,
        listing_id: &str,
        dedupe: bool,
    ) -> Result<Vec<Signal>> {
        let listing = db
            .get_listing(listing_id)
            .await?
            .ok_or_else(|| Error::not_found("ObservedListing", listing_id))?;
        let source = db
            .get_source(&listing.source_id)
            .await?
            .ok_or_else(|| Error::not_found("Source", &listing.source_id))?;

        let matched = match listing.matched_listing_id {
            Some(ref matched_id) => {
                let found = db.get_listing(matched_id).await?;
                if found.is_none() {
                    warn!(
                        listing = %listing.id,
                        matched = %matched_id,
                        "Matched listing no longer exists, detecting without it"
                    );
                }
                found
            }
            None => None,
        };

        let ctx = DetectionContext {
            listing: &listing,
            matched: matched.as_ref(),
            source: &source,
        };
        let drafts = self.detect(&ctx);
        debug!(listing = %listing.id, drafts = drafts.len(), "Detection complete");

        let signals = drafts.into_iter().map(SignalDraft::into_signal).collect();
        db.record_signals(signals, dedupe).await
    }
}

fn payload(ctx: &DetectionContext<'_>, details: Value, base: Severity, escalated: bool) -> Value {
    let mut payload = json!({
        "observed": {
            "listing_id": ctx.listing.id,
            "geo_hash": ctx.listing.geo_hash,
            "address_hash": ctx.listing.address_hash,
            "media_hash": ctx.listing.media_hash,
            "price": ctx.listing.price,
            "currency": ctx.listing.currency,
        },
        "source": {
            "id": ctx.source.id,
            "name": ctx.source.name,
            "trust_score": ctx.source.trust_score,
        },
        "escalated": escalated,
        "base_severity": base.to_string(),
        "details": details,
    });
    if let Some(m) = ctx.matched {
        payload["matched"] = json!({
            "listing_id": m.id,
            "source_id": m.source_id,
            "geo_hash": m.geo_hash,
            "address_hash": m.address_hash,
            "media_hash": m.media_hash,
            "price": m.price,
            "currency": m.currency,
        });
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ListingStatus, SourceType};

    fn source(trust: i64) -> Source {
        Source::new("portal".into(), SourceType::Portal, "https://portal.example/", trust).unwrap()
    }

    fn listing(id: &str, source_id: &str) -> ObservedListing {
        ObservedListing {
            id: id.to_string(),
            snapshot_id: format!("snap-{}", id),
            source_id: source_id.to_string(),
            title: None,
            description: None,
            price: Some(100_000.0),
            currency: Some("USD".into()),
            street: Some("123 Main St".into()),
            city: None,
            state: None,
            zip: None,
            lat: None,
            lng: None,
            status: ListingStatus::Active.to_string(),
            listed_at: None,
            geo_hash: Some("9zvxveyr".into()),
            address_hash: Some("addr-1".into()),
            media_hash: Some("media-1".into()),
            matched_listing_id: None,
            confidence_score: 1.0,
            input_issues_json: None,
            observed_at: "2024-03-01T00:00:00.000000Z".into(),
            created_at: "2024-03-01T00:00:00.000000Z".into(),
        }
    }

    fn types(drafts: &[SignalDraft]) -> Vec<SignalType> {
        drafts.iter().map(|d| d.signal_type).collect()
    }

    #[test]
    fn test_unmatched_trusted_listing_raises_nothing() {
        let src = source(80);
        let l = listing("a", &src.id);
        let ctx = DetectionContext {
            listing: &l,
            matched: None,
            source: &src,
        };
        assert!(SignalDetector::default().detect(&ctx).is_empty());
    }

    #[test]
    fn test_cross_source_duplicate() {
        let src = source(80);
        let prior = listing("prior", "other-source");
        let mut l = listing("new", &src.id);
        l.matched_listing_id = Some(prior.id.clone());
        let ctx = DetectionContext {
            listing: &l,
            matched: Some(&prior),
            source: &src,
        };
        let drafts = SignalDetector::default().detect(&ctx);
        assert_eq!(types(&drafts), vec![SignalType::DuplicateListing]);
        assert_eq!(drafts[0].severity, Severity::Warning);
        assert_eq!(drafts[0].matched_listing_id.as_deref(), Some("prior"));
    }

    #[test]
    fn test_same_source_is_not_duplicate() {
        let src = source(80);
        let prior = listing("prior", &src.id);
        let l = listing("new", &src.id);
        let ctx = DetectionContext {
            listing: &l,
            matched: Some(&prior),
            source: &src,
        };
        assert!(SignalDetector::default().detect(&ctx).is_empty());
    }

    #[test]
    fn test_stolen_media_with_different_address() {
        let src = source(80);
        let prior = listing("prior", "other-source");
        let mut l = listing("new", &src.id);
        l.address_hash = Some("addr-2".into());
        l.geo_hash = None;
        l.confidence_score = 1.0;
        let ctx = DetectionContext {
            listing: &l,
            matched: Some(&prior),
            source: &src,
        };
        let drafts = SignalDetector::default().detect(&ctx);
        assert!(types(&drafts).contains(&SignalType::StolenMedia));
        assert_eq!(drafts[0].severity, Severity::Error);
    }

    #[test]
    fn test_price_anomaly_thresholds() {
        let src = source(80);
        let prior = listing("prior", &src.id);
        let mut l = listing("new", &src.id);

        l.price = Some(140_000.0);
        let ctx = DetectionContext {
            listing: &l,
            matched: Some(&prior),
            source: &src,
        };
        assert_eq!(
            types(&SignalDetector::default().detect(&ctx)),
            vec![SignalType::PriceAnomaly]
        );

        l.price = Some(110_000.0);
        let ctx = DetectionContext {
            listing: &l,
            matched: Some(&prior),
            source: &src,
        };
        assert!(SignalDetector::default().detect(&ctx).is_empty());

        l.price = Some(140_000.0);
        l.currency = Some("CAD".into());
        let ctx = DetectionContext {
            listing: &l,
            matched: Some(&prior),
            source: &src,
        };
        assert!(SignalDetector::default().detect(&ctx).is_empty());
    }

    #[test]
    fn test_price_anomaly_outside_lookback() {
        let src = source(80);
        let mut prior = listing("prior", &src.id);
        prior.observed_at = "2023-01-01T00:00:00.000000Z".into();
        let mut l = listing("new", &src.id);
        l.price = Some(200_000.0);
        let ctx = DetectionContext {
            listing: &l,
            matched: Some(&prior),
            source: &src,
        };
        assert!(SignalDetector::default().detect(&ctx).is_empty());
    }

    #[test]
    fn test_price_lookback_uses_capture_time() {
        // a backfilled feed: both resolved today, captured a year apart
        let src = source(80);
        let mut prior = listing("prior", &src.id);
        prior.observed_at = "2023-01-01T00:00:00.000000Z".into();
        prior.created_at = "2024-03-01T00:00:00.000000Z".into();
        let mut l = listing("new", &src.id);
        l.price = Some(200_000.0);
        let ctx = DetectionContext {
            listing: &l,
            matched: Some(&prior),
            source: &src,
        };
        assert!(SignalDetector::default().detect(&ctx).is_empty());

        prior.observed_at = "2024-02-01T00:00:00.000000Z".into();
        let ctx = DetectionContext {
            listing: &l,
            matched: Some(&prior),
            source: &src,
        };
        let drafts = SignalDetector::default().detect(&ctx);
        assert_eq!(types(&drafts), vec![SignalType::PriceAnomaly]);
        assert_eq!(drafts[0].payload["details"]["days_between"], 29);
    }

    #[test]
    fn test_geo_address_mismatch_needs_all_four() {
        let src = source(80);
        let prior = listing("prior", &src.id);
        let mut l = listing("new", &src.id);
        l.geo_hash = Some("9zvxvsdz".into());
        let ctx = DetectionContext {
            listing: &l,
            matched: Some(&prior),
            source: &src,
        };
        assert_eq!(
            types(&SignalDetector::default().detect(&ctx)),
            vec![SignalType::GeoAddressMismatch]
        );

        l.address_hash = None;
        let ctx = DetectionContext {
            listing: &l,
            matched: Some(&prior),
            source: &src,
        };
        assert!(SignalDetector::default().detect(&ctx).is_empty());
    }

    #[test]
    fn test_low_trust_source_and_escalation() {
        let weak = source(30);
        let mut l = listing("new", &weak.id);
        l.confidence_score = 0.4;
        let ctx = DetectionContext {
            listing: &l,
            matched: None,
            source: &weak,
        };
        let drafts = SignalDetector::default().detect(&ctx);
        assert_eq!(types(&drafts), vec![SignalType::LowConfidenceSource]);
        assert_eq!(drafts[0].severity, Severity::Info);
        assert_eq!(drafts[0].payload["escalated"], false);

        let shady = source(10);
        let ctx = DetectionContext {
            listing: &l,
            matched: None,
            source: &shady,
        };
        let drafts = SignalDetector::default().detect(&ctx);
        assert_eq!(drafts[0].severity, Severity::Warning);
        assert_eq!(drafts[0].payload["escalated"], true);
        assert_eq!(drafts[0].payload["source"]["trust_score"], 10);
    }

    #[test]
    fn test_draft_becomes_open_signal() {
        let draft = SignalDraft {
            signal_type: SignalType::PriceAnomaly,
            severity: Severity::Warning,
            observed_listing_id: "l1".into(),
            matched_listing_id: Some("l0".into()),
            payload: json!({"k": 1}),
        };
        let signal = draft.into_signal();
        assert_eq!(signal.get_status().unwrap(), SignalStatus::Open);
        assert_eq!(signal.get_type().unwrap(), SignalType::PriceAnomaly);
        assert_eq!(signal.payload()["k"], 1);
    }
}
