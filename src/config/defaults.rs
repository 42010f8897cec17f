//! Default values for configuration

/// Minimum weighted agreement for a candidate to become the match
pub fn default_min_match_score() -> f64 {
    0.5
}

/// Geohash length; 8 characters is roughly a 38m x 19m cell
pub fn default_geohash_precision() -> usize {
    8
}

pub fn default_geo_weight() -> f64 {
    0.4
}

pub fn default_address_weight() -> f64 {
    0.4
}

pub fn default_media_weight() -> f64 {
    0.2
}

/// Confidence at or above which a cross-source match is a duplicate
pub fn default_duplicate_min_confidence() -> f64 {
    0.85
}

/// Relative price change (fraction of the prior price) that is anomalous
pub fn default_price_change_threshold() -> f64 {
    0.25
}

/// How far back a matched listing may have been observed for price comparison
pub fn default_price_lookback_days() -> i64 {
    90
}

/// Trust score below which low-confidence listings are flagged
pub fn default_low_trust_floor() -> i64 {
    50
}

/// Confidence below which a low-trust listing is flagged
pub fn default_low_trust_max_confidence() -> f64 {
    0.6
}

/// Trust score below which signal severity is escalated one level
pub fn default_escalation_trust_floor() -> i64 {
    20
}

/// Concurrent (source, external id) keys processed during ingest
pub fn default_pipeline_workers() -> usize {
    4
}

/// Skip signals whose (listing, type) pair is already recorded
pub fn default_dedupe_signals() -> bool {
    true
}

/// Default SQLite max connections
pub fn default_max_connections() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let total = default_geo_weight() + default_address_weight() + default_media_weight();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_escalation_floor_below_trust_floor() {
        assert!(default_escalation_trust_floor() < default_low_trust_floor());
    }
}
