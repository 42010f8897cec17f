//! Listing fingerprints
//!
//! Three independent, individually optional fingerprints are derived from a
//! listing's parsed fields:
//! - `geo`: a fixed-precision geohash of the coordinates
//! - `address`: a BLAKE3 hash of the normalized address text
//! - `media`: a BLAKE3 hash of the set of upstream perceptual image hashes
//!
//! A missing input always yields `None`, never a placeholder value, so two
//! listings can only agree on a fingerprint they both actually have.

mod address;

pub use address::*;

use crate::meta::{FingerprintKind, FingerprintValue};
use blake3::Hasher;
use serde::{Deserialize, Serialize};

/// Fingerprints computed for one listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprints {
    pub geo_hash: Option<String>,
    pub address_hash: Option<String>,
    pub media_hash: Option<String>,
    /// Sorted, de-duplicated perceptual hashes behind `media_hash`
    pub image_hashes: Vec<String>,
}

impl Fingerprints {
    pub fn is_empty(&self) -> bool {
        self.geo_hash.is_none() && self.address_hash.is_none() && self.media_hash.is_none()
    }

    /// Index entries for every non-null fingerprint value
    pub fn index_values(&self) -> Vec<FingerprintValue> {
        let mut values = Vec::new();
        if let Some(ref geo) = self.geo_hash {
            values.push(FingerprintValue::new(FingerprintKind::Geo, geo.clone()));
        }
        if let Some(ref address) = self.address_hash {
            values.push(FingerprintValue::new(FingerprintKind::Address, address.clone()));
        }
        if let Some(ref media) = self.media_hash {
            values.push(FingerprintValue::new(FingerprintKind::Media, media.clone()));
        }
        values.extend(
            self.image_hashes
                .iter()
                .map(|h| FingerprintValue::new(FingerprintKind::Image, h.clone())),
        );
        values
    }
}

/// Geohash of a coordinate pair, or None when out of range
pub fn geo_fingerprint(lat: f64, lng: f64, precision: usize) -> Option<String> {
    if !lat.is_finite() || !lng.is_finite() {
        return None;
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return None;
    }
    geohash::encode(geohash::Coord { x: lng, y: lat }, precision).ok()
}

/// Hash of the normalized address, or None when there is no street
pub fn address_fingerprint(parts: &AddressParts) -> Option<String> {
    canonical_address(parts).map(|canonical| {
        let mut hasher = Hasher::new();
        hasher.update(b"address:");
        hasher.update(canonical.as_bytes());
        hasher.finalize().to_hex().to_string()
    })
}

/// Normalize one upstream image hash.
///
/// Hex digests (optionally `0x`-prefixed) are lower-cased; any other token is
/// kept verbatim. Only blank input is rejected.
pub fn normalize_image_hash(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(hex.to_ascii_lowercase());
    }
    // opaque tokens (base64 perceptual hashes, CDN ids) are case-sensitive
    Some(trimmed.to_string())
}

/// Sorted, de-duplicated image hash set
pub fn canonical_image_set(hashes: &[String]) -> Vec<String> {
    let mut set: Vec<String> = hashes.to_vec();
    set.sort();
    set.dedup();
    set
}

/// Hash over a canonical image hash set, or None when the set is empty
pub fn media_fingerprint(image_set: &[String]) -> Option<String> {
    if image_set.is_empty() {
        return None;
    }
    let mut hasher = Hasher::new();
    hasher.update(b"media:");
    for hash in image_set {
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    Some(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_fingerprint_nearby_points_collide() {
        // Both points sit inside the same ~38m x 19m precision-8 cell, about 7m apart.
        let a = geo_fingerprint(44.97794, -93.26517, 8).unwrap();
        let b = geo_fingerprint(44.97798, -93.26525, 8).unwrap();
        assert_eq!(a, "9zvxveyr");
        assert_eq!(a, b);

        let far = geo_fingerprint(44.98200, -93.27000, 8).unwrap();
        assert_ne!(a, far);
    }

    #[test]
    fn test_geo_fingerprint_rejects_out_of_range() {
        assert!(geo_fingerprint(91.0, 0.0, 8).is_none());
        assert!(geo_fingerprint(0.0, -181.0, 8).is_none());
        assert!(geo_fingerprint(f64::NAN, 0.0, 8).is_none());
    }

    #[test]
    fn test_address_fingerprint_absent_without_street() {
        let parts = AddressParts {
            city: Some("Minneapolis".to_string()),
            ..Default::default()
        };
        assert!(address_fingerprint(&parts).is_none());
    }

    #[test]
    fn test_media_fingerprint_is_order_independent() {
        let a = canonical_image_set(&["ff00".into(), "00ff".into(), "ff00".into()]);
        let b = canonical_image_set(&["00ff".into(), "ff00".into()]);
        assert_eq!(media_fingerprint(&a), media_fingerprint(&b));
        assert!(media_fingerprint(&[]).is_none());
    }

    #[test]
    fn test_normalize_image_hash() {
        assert_eq!(normalize_image_hash(" 0xABCD ").as_deref(), Some("abcd"));
        assert_eq!(
            normalize_image_hash(" pHash:Zm9vYmFy ").as_deref(),
            Some("pHash:Zm9vYmFy")
        );
        assert_ne!(normalize_image_hash("Zm9v"), normalize_image_hash("zm9v"));
        assert!(normalize_image_hash("  ").is_none());
    }

    #[test]
    fn test_index_values_skip_missing() {
        let fps = Fingerprints {
            geo_hash: None,
            address_hash: Some("addr".into()),
            media_hash: Some("media".into()),
            image_hashes: vec!["aa".into(), "bb".into()],
        };
        let kinds: Vec<FingerprintKind> = fps.index_values().iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FingerprintKind::Address,
                FingerprintKind::Media,
                FingerprintKind::Image,
                FingerprintKind::Image
            ]
        );
    }
}
