//! Weighted fingerprint agreement between two listings

use crate::config::MatchingConfig;
use crate::meta::FingerprintKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Per-fingerprint weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchWeights {
    pub geo: f64,
    pub address: f64,
    pub media: f64,
}

impl From<&MatchingConfig> for MatchWeights {
    fn from(config: &MatchingConfig) -> Self {
        Self {
            geo: config.geo_weight,
            address: config.address_weight,
            media: config.media_weight,
        }
    }
}

impl Default for MatchWeights {
    fn default() -> Self {
        (&MatchingConfig::default()).into()
    }
}

/// The fingerprint view of one listing used for scoring
#[derive(Debug, Clone, Copy)]
pub struct FingerprintView<'a> {
    pub geo_hash: Option<&'a str>,
    pub address_hash: Option<&'a str>,
    pub image_hashes: &'a [String],
}

/// Outcome of scoring one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    pub score: f64,
    pub agreed: Vec<FingerprintKind>,
    pub disagreed: Vec<FingerprintKind>,
    /// Image hashes both listings carry
    pub shared_images: Vec<String>,
}

/// Score two listings: agreeing weight divided by comparable weight.
///
/// A fingerprint is comparable only when both sides have it, so missing data
/// never counts as disagreement. Returns None when nothing is comparable.
pub fn score_pair(
    observed: &FingerprintView<'_>,
    candidate: &FingerprintView<'_>,
    weights: &MatchWeights,
) -> Option<MatchScore> {
    let mut agreed_weight = 0.0;
    let mut comparable_weight = 0.0;
    let mut agreed = Vec::new();
    let mut disagreed = Vec::new();

    let mut compare = |kind: FingerprintKind, weight: f64, agrees: Option<bool>| {
        if let Some(agrees) = agrees {
            comparable_weight += weight;
            if agrees {
                agreed_weight += weight;
                agreed.push(kind);
            } else {
                disagreed.push(kind);
            }
        }
    };

    compare(
        FingerprintKind::Geo,
        weights.geo,
        observed
            .geo_hash
            .zip(candidate.geo_hash)
            .map(|(a, b)| a == b),
    );
    compare(
        FingerprintKind::Address,
        weights.address,
        observed
            .address_hash
            .zip(candidate.address_hash)
            .map(|(a, b)| a == b),
    );

    let shared_images: Vec<String> = observed
        .image_hashes
        .iter()
        .filter(|h| candidate.image_hashes.contains(h))
        .cloned()
        .collect();
    let media_comparable = !observed.image_hashes.is_empty() && !candidate.image_hashes.is_empty();
    compare(
        FingerprintKind::Media,
        weights.media,
        media_comparable.then(|| !shared_images.is_empty()),
    );

    if comparable_weight <= 0.0 {
        return None;
    }

    Some(MatchScore {
        score: (agreed_weight / comparable_weight).clamp(0.0, 1.0),
        agreed,
        disagreed,
        shared_images,
    })
}

/// A scored candidate awaiting selection
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub listing_id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub score: MatchScore,
}

/// Pick the highest-scoring candidate at or above `min_score`.
///
/// Ties go to the most recently created candidate, then to the greater id, so
/// the same pool always yields the same winner.
pub fn select_best(candidates: Vec<ScoredCandidate>, min_score: f64) -> Option<ScoredCandidate> {
    candidates
        .into_iter()
        .filter(|c| c.score.score >= min_score)
        .max_by(|a, b| {
            a.score
                .score
                .partial_cmp(&b.score.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.listing_id.cmp(&b.listing_id))
        })
}
