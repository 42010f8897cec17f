//! Fingerprinting and entity resolution
//!
//! Each snapshot is turned into an observed listing, fingerprinted, and
//! matched against every prior listing that shares at least one fingerprint
//! value. Resolution is stateless apart from the persisted fingerprint index.

mod fields;
mod locks;
mod score;

pub use fields::*;
pub use locks::*;
pub use score::*;

use crate::config::MatchingConfig;
use crate::error::{Error, Result};
use crate::fingerprint::{
    address_fingerprint, canonical_image_set, geo_fingerprint, media_fingerprint, Fingerprints,
};
use crate::meta::{now_rfc3339, parse_timestamp, MetaDb, ObservedListing, Snapshot};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Confidence deducted per malformed non-fingerprint field
const MALFORMED_FIELD_PENALTY: f64 = 0.1;

/// Outcome of resolving one snapshot
#[derive(Debug, Clone)]
pub struct Resolution {
    pub listing: ObservedListing,
    pub matched: Option<ObservedListing>,
    /// Score breakdown against the matched listing
    pub evidence: Option<MatchScore>,
    pub fingerprints: Fingerprints,
    pub issues: Vec<InputIssue>,
}

/// Entity-resolution engine
#[derive(Clone)]
pub struct Resolver {
    db: MetaDb,
    config: MatchingConfig,
    locks: FingerprintLocks,
}

impl Resolver {
    pub fn new(db: MetaDb, config: MatchingConfig) -> Self {
        Self::with_locks(db, config, FingerprintLocks::new())
    }

    /// Share a lock registry between resolvers over the same database
    pub fn with_locks(db: MetaDb, config: MatchingConfig, locks: FingerprintLocks) -> Self {
        Self { db, config, locks }
    }

    /// Compute fingerprints for normalized fields
    pub fn fingerprint(&self, fields: &NormalizedFields) -> Fingerprints {
        let image_hashes = canonical_image_set(&fields.image_hashes);
        Fingerprints {
            geo_hash: fields
                .coordinates
                .and_then(|(lat, lng)| geo_fingerprint(lat, lng, self.config.geohash_precision)),
            address_hash: address_fingerprint(&fields.address),
            media_hash: media_fingerprint(&image_hashes),
            image_hashes,
        }
    }

    /// Resolve a snapshot into an observed listing, replacing any earlier
    /// resolution of the same snapshot in place.
    pub async fn resolve(&self, snapshot_id: &str, parsed: &ParsedFields) -> Result<Resolution> {
        let snapshot = self
            .db
            .get_snapshot(snapshot_id)
            .await?
            .ok_or_else(|| Error::not_found("Snapshot", snapshot_id))?;

        let (fields, issues) = parsed.normalize();
        let fingerprints = self.fingerprint(&fields);
        let index_values = fingerprints.index_values();

        let _guard = self
            .locks
            .acquire(index_values.iter().map(|fp| fp.lock_key()))
            .await;

        let previous = self.db.get_listing_by_snapshot(&snapshot.id).await?;
        let candidate_ids = self
            .db
            .find_candidate_ids(&index_values, previous.as_ref().map(|l| l.id.as_str()))
            .await?;
        let candidates = self.db.get_listings(&candidate_ids).await?;
        let candidate_images = self.db.image_hashes_for(&candidate_ids).await?;

        debug!(
            snapshot = %snapshot.id,
            candidates = candidates.len(),
            issues = issues.len(),
            "Scoring candidates"
        );

        let best = self.best_match(&fingerprints, &candidates, &candidate_images);

        let (matched, evidence) = match best {
            Some(scored) => {
                let listing = candidates
                    .into_iter()
                    .find(|c| c.id == scored.listing_id);
                (listing, Some(scored.score))
            }
            None => (None, None),
        };

        let confidence = match evidence {
            Some(ref score) => score.score,
            None => self.self_consistency(&fields, &fingerprints, &issues),
        };

        let listing = build_listing(
            &snapshot,
            previous,
            &fields,
            &fingerprints,
            matched.as_ref().map(|m| m.id.clone()),
            confidence,
            &issues,
        )?;

        self.db.save_listing(&listing, &index_values).await?;

        match matched {
            Some(ref m) => info!(
                listing = %listing.id,
                matched = %m.id,
                confidence = listing.confidence_score,
                "Resolved listing to prior observation"
            ),
            None => info!(
                listing = %listing.id,
                confidence = listing.confidence_score,
                "Resolved listing without a match"
            ),
        }

        Ok(Resolution {
            listing,
            matched,
            evidence,
            fingerprints,
            issues,
        })
    }

    fn best_match(
        &self,
        fingerprints: &Fingerprints,
        candidates: &[ObservedListing],
        candidate_images: &HashMap<String, Vec<String>>,
    ) -> Option<ScoredCandidate> {
        let weights = MatchWeights::from(&self.config);
        let observed = FingerprintView {
            geo_hash: fingerprints.geo_hash.as_deref(),
            address_hash: fingerprints.address_hash.as_deref(),
            image_hashes: &fingerprints.image_hashes,
        };

        let no_images = Vec::new();
        let scored: Vec<ScoredCandidate> = candidates
            .iter()
            .filter_map(|candidate| {
                let view = FingerprintView {
                    geo_hash: candidate.geo_hash.as_deref(),
                    address_hash: candidate.address_hash.as_deref(),
                    image_hashes: candidate_images.get(&candidate.id).unwrap_or(&no_images),
                };
                score_pair(&observed, &view, &weights).map(|score| ScoredCandidate {
                    listing_id: candidate.id.clone(),
                    created_at: parse_timestamp(&candidate.created_at),
                    score,
                })
            })
            .collect();

        select_best(scored, self.config.min_match_score)
    }

    /// Confidence of an unmatched listing: how much of the fingerprint input
    /// it was given actually produced a fingerprint, less a penalty per
    /// malformed scalar field.
    fn self_consistency(
        &self,
        fields: &NormalizedFields,
        fingerprints: &Fingerprints,
        issues: &[InputIssue],
    ) -> f64 {
        let c = &self.config;
        let mut attempted = 0.0;
        let mut computed = 0.0;
        for (was_attempted, is_computed, weight) in [
            (fields.geo_attempted, fingerprints.geo_hash.is_some(), c.geo_weight),
            (
                fields.address_attempted,
                fingerprints.address_hash.is_some(),
                c.address_weight,
            ),
            (fields.media_attempted, fingerprints.media_hash.is_some(), c.media_weight),
        ] {
            if was_attempted {
                attempted += weight;
                if is_computed {
                    computed += weight;
                }
            }
        }

        if attempted <= 0.0 {
            return 0.0;
        }

        let malformed = issues.iter().filter(|i| i.fingerprint.is_none()).count();
        (computed / attempted - MALFORMED_FIELD_PENALTY * malformed as f64).clamp(0.0, 1.0)
    }
}

fn build_listing(
    snapshot: &Snapshot,
    previous: Option<ObservedListing>,
    fields: &NormalizedFields,
    fingerprints: &Fingerprints,
    matched_listing_id: Option<String>,
    confidence_score: f64,
    issues: &[InputIssue],
) -> Result<ObservedListing> {
    let (id, created_at) = match previous {
        Some(prev) => (prev.id, prev.created_at),
        None => (Uuid::new_v4().to_string(), now_rfc3339()),
    };

    let input_issues_json = if issues.is_empty() {
        None
    } else {
        Some(serde_json::to_string(issues)?)
    };

    Ok(ObservedListing {
        id,
        snapshot_id: snapshot.id.clone(),
        source_id: snapshot.source_id.clone(),
        title: fields.title.clone(),
        description: fields.description.clone(),
        price: fields.price,
        currency: fields.currency.clone(),
        street: fields.address.street.clone(),
        city: fields.address.city.clone(),
        state: fields.address.state.clone(),
        zip: fields.address.zip.clone(),
        lat: fields.coordinates.map(|(lat, _)| lat),
        lng: fields.coordinates.map(|(_, lng)| lng),
        status: fields.status.to_string(),
        listed_at: fields.listed_at.clone(),
        geo_hash: fingerprints.geo_hash.clone(),
        address_hash: fingerprints.address_hash.clone(),
        media_hash: fingerprints.media_hash.clone(),
        matched_listing_id,
        confidence_score,
        input_issues_json,
        observed_at: snapshot.fetched_at.clone(),
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::{add_source, setup_test_db};
    use crate::meta::FingerprintKind;
    use crate::snapshot::{PutRequest, SnapshotPayload, SnapshotStore};
    use chrono::Utc;
    use serde_json::{json, Value};

    async fn snapshot(db: &MetaDb, source_id: &str, external_id: &str) -> Snapshot {
        let store = SnapshotStore::new(db.clone());
        store
            .put(PutRequest {
                source_id: source_id.to_string(),
                external_id: external_id.to_string(),
                source_url: format!("https://example.com/{}", external_id),
                fetched_at: Utc::now(),
                payload: SnapshotPayload {
                    html: Some(format!("<h1>{}</h1>", external_id)),
                    json: None,
                },
                crawl_run_id: None,
            })
            .await
            .unwrap()
            .snapshot
    }

    fn fields(value: Value) -> ParsedFields {
        serde_json::from_value(value).unwrap()
    }

    fn main_street() -> ParsedFields {
        fields(json!({
            "price": 100000,
            "currency": "USD",
            "address": {"street": "123 Main St", "city": "Minneapolis", "state": "MN", "zip": "55401"},
            "lat": 44.97794,
            "lng": -93.26517,
            "image_hashes": ["a1", "b2", "c3"]
        }))
    }

    #[tokio::test]
    async fn test_first_listing_has_no_match() {
        let (db, _tmp) = setup_test_db().await;
        let source = add_source(&db, "first", 80).await;
        let resolver = Resolver::new(db.clone(), MatchingConfig::default());

        let snap = snapshot(&db, &source.id, "A").await;
        let res = resolver.resolve(&snap.id, &main_street()).await.unwrap();

        assert!(res.matched.is_none());
        assert!(res.listing.matched_listing_id.is_none());
        assert_eq!(res.listing.confidence_score, 1.0);
        assert_eq!(res.listing.geo_hash.as_deref(), Some("9zvxveyr"));
        assert!(res.issues.is_empty());
    }

    #[tokio::test]
    async fn test_trivially_different_address_matches() {
        let (db, _tmp) = setup_test_db().await;
        let a = add_source(&db, "alpha", 80).await;
        let b = add_source(&db, "beta", 80).await;
        let resolver = Resolver::new(db.clone(), MatchingConfig::default());

        let first = resolver
            .resolve(&snapshot(&db, &a.id, "A").await.id, &main_street())
            .await
            .unwrap();

        let variant = fields(json!({
            "address": {"street": "123 main street", "city": "MINNEAPOLIS", "state": "mn", "zip": "55401-1234"},
            "lat": "44.97798",
            "lng": "-93.26525"
        }));
        let second = resolver
            .resolve(&snapshot(&db, &b.id, "B").await.id, &variant)
            .await
            .unwrap();

        assert_eq!(
            second.listing.matched_listing_id.as_deref(),
            Some(first.listing.id.as_str())
        );
        let evidence = second.evidence.unwrap();
        assert_eq!(evidence.agreed, vec![FingerprintKind::Geo, FingerprintKind::Address]);
        assert_eq!(second.listing.confidence_score, 1.0);
    }

    #[tokio::test]
    async fn test_re_resolution_keeps_listing_id() {
        let (db, _tmp) = setup_test_db().await;
        let source = add_source(&db, "again", 80).await;
        let resolver = Resolver::new(db.clone(), MatchingConfig::default());
        let snap = snapshot(&db, &source.id, "A").await;

        let first = resolver.resolve(&snap.id, &main_street()).await.unwrap();
        let second = resolver.resolve(&snap.id, &main_street()).await.unwrap();

        assert_eq!(first.listing.id, second.listing.id);
        assert_eq!(first.listing.created_at, second.listing.created_at);
        // never matches itself
        assert!(second.matched.is_none());
        assert_eq!(db.list_listings(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic() {
        let (db, _tmp) = setup_test_db().await;
        let a = add_source(&db, "one", 80).await;
        let b = add_source(&db, "two", 80).await;
        let c = add_source(&db, "three", 80).await;
        let resolver = Resolver::new(db.clone(), MatchingConfig::default());

        resolver
            .resolve(&snapshot(&db, &a.id, "A").await.id, &main_street())
            .await
            .unwrap();
        resolver
            .resolve(&snapshot(&db, &b.id, "B").await.id, &main_street())
            .await
            .unwrap();

        let snap = snapshot(&db, &c.id, "C").await;
        let first = resolver.resolve(&snap.id, &main_street()).await.unwrap();
        let again = resolver.resolve(&snap.id, &main_street()).await.unwrap();
        assert_eq!(first.listing.matched_listing_id, again.listing.matched_listing_id);
        assert_eq!(first.listing.confidence_score, again.listing.confidence_score);
    }

    #[tokio::test]
    async fn test_self_consistency_with_malformed_input() {
        let (db, _tmp) = setup_test_db().await;
        let source = add_source(&db, "messy", 80).await;
        let resolver = Resolver::new(db.clone(), MatchingConfig::default());

        // address computed (0.4), geo attempted but bad (0.4), one bad price
        let messy = fields(json!({
            "price": "ask agent",
            "address": {"street": "9 Elm St"},
            "lat": "north-ish",
            "lng": -93.0
        }));
        let res = resolver
            .resolve(&snapshot(&db, &source.id, "M").await.id, &messy)
            .await
            .unwrap();

        assert!(res.matched.is_none());
        assert!((res.listing.confidence_score - 0.4).abs() < 1e-9);
        assert!(res.listing.geo_hash.is_none());
        assert!(res.listing.input_issues_json.is_some());

        let empty = resolver
            .resolve(&snapshot(&db, &source.id, "E").await.id, &ParsedFields::default())
            .await
            .unwrap();
        assert_eq!(empty.listing.confidence_score, 0.0);
        assert!(empty.fingerprints.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_snapshot_is_fatal() {
        let (db, _tmp) = setup_test_db().await;
        let resolver = Resolver::new(db, MatchingConfig::default());
        assert!(matches!(
            resolver.resolve("missing", &ParsedFields::default()).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_resolutions_see_each_other() {
        let (db, _tmp) = setup_test_db().await;
        let a = add_source(&db, "left", 80).await;
        let b = add_source(&db, "right", 80).await;
        let resolver = Resolver::new(db.clone(), MatchingConfig::default());

        let sa = snapshot(&db, &a.id, "A").await;
        let sb = snapshot(&db, &b.id, "B").await;
        let fa = main_street();
        let fb = main_street();

        let (ra, rb) = tokio::join!(resolver.resolve(&sa.id, &fa), resolver.resolve(&sb.id, &fb));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        // exactly one of the two observed the other
        let matched = [ra.matched.is_some(), rb.matched.is_some()];
        assert_eq!(matched.iter().filter(|m| **m).count(), 1);
    }
}
