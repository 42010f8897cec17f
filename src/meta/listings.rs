//! Observed listings and the fingerprint index

use super::MetaDb;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::collections::HashMap;
use std::str::FromStr;

/// Listing lifecycle status as advertised by the source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingStatus {
    Active,
    Pending,
    Sold,
    OffMarket,
    #[default]
    Unknown,
}

impl std::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListingStatus::Active => write!(f, "ACTIVE"),
            ListingStatus::Pending => write!(f, "PENDING"),
            ListingStatus::Sold => write!(f, "SOLD"),
            ListingStatus::OffMarket => write!(f, "OFF_MARKET"),
            ListingStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl FromStr for ListingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();
        match key.as_str() {
            "active" | "for_sale" | "new" => Ok(ListingStatus::Active),
            "pending" | "under_contract" | "contingent" => Ok(ListingStatus::Pending),
            "sold" | "closed" => Ok(ListingStatus::Sold),
            "off_market" | "withdrawn" | "expired" => Ok(ListingStatus::OffMarket),
            "unknown" => Ok(ListingStatus::Unknown),
            _ => Err(Error::Validation(format!("Unknown listing status: {}", s))),
        }
    }
}

/// Kind of a fingerprint index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintKind {
    Geo,
    Address,
    Media,
    /// One perceptual hash behind a media fingerprint
    Image,
}

impl FingerprintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintKind::Geo => "geo",
            FingerprintKind::Address => "address",
            FingerprintKind::Media => "media",
            FingerprintKind::Image => "image",
        }
    }
}

impl std::fmt::Display for FingerprintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (kind, value) entry of the fingerprint index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FingerprintValue {
    pub kind: FingerprintKind,
    pub value: String,
}

impl FingerprintValue {
    pub fn new(kind: FingerprintKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// Key used for advisory locking
    pub fn lock_key(&self) -> String {
        format!("{}:{}", self.kind, self.value)
    }
}

/// Parsed, fingerprinted interpretation of one snapshot
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ObservedListing {
    pub id: String,
    pub snapshot_id: String,
    pub source_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub status: String,
    pub listed_at: Option<String>,
    pub geo_hash: Option<String>,
    pub address_hash: Option<String>,
    pub media_hash: Option<String>,
    pub matched_listing_id: Option<String>,
    pub confidence_score: f64,
    pub input_issues_json: Option<String>,
    /// Capture time of the owning snapshot
    pub observed_at: String,
    pub created_at: String,
}

impl ObservedListing {
    pub fn get_status(&self) -> ListingStatus {
        self.status.parse().unwrap_or(ListingStatus::Unknown)
    }
}

#[derive(FromRow)]
struct ImageHashRow {
    listing_id: String,
    value: String,
}

impl MetaDb {
    /// Get observed listing by ID
    pub async fn get_listing(&self, id: &str) -> Result<Option<ObservedListing>> {
        let listing =
            sqlx::query_as::<_, ObservedListing>("SELECT * FROM observed_listings WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(listing)
    }

    /// Get the observed listing owned by a snapshot
    pub async fn get_listing_by_snapshot(&self, snapshot_id: &str) -> Result<Option<ObservedListing>> {
        let listing = sqlx::query_as::<_, ObservedListing>(
            "SELECT * FROM observed_listings WHERE snapshot_id = ?",
        )
        .bind(snapshot_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(listing)
    }

    /// List observed listings, newest first
    pub async fn list_listings(
        &self,
        source_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ObservedListing>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM observed_listings");
        if let Some(source_id) = source_id {
            qb.push(" WHERE source_id = ").push_bind(source_id);
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ").push_bind(limit);

        let listings = qb
            .build_query_as::<ObservedListing>()
            .fetch_all(self.pool())
            .await?;
        Ok(listings)
    }

    /// IDs of listings sharing at least one of the given fingerprint values
    pub async fn find_candidate_ids(
        &self,
        values: &[FingerprintValue],
        exclude_listing_id: Option<&str>,
    ) -> Result<Vec<String>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT DISTINCT listing_id FROM listing_fingerprints WHERE (");
        for (i, fp) in values.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push("(kind = ")
                .push_bind(fp.kind.as_str())
                .push(" AND value = ")
                .push_bind(fp.value.as_str())
                .push(")");
        }
        qb.push(")");
        if let Some(exclude) = exclude_listing_id {
            qb.push(" AND listing_id != ").push_bind(exclude);
        }
        qb.push(" ORDER BY listing_id");

        let ids: Vec<String> = qb
            .build_query_scalar::<String>()
            .fetch_all(self.pool())
            .await?;
        Ok(ids)
    }

    /// Load several listings by ID (missing IDs are skipped)
    pub async fn get_listings(&self, ids: &[String]) -> Result<Vec<ObservedListing>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM observed_listings WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(") ORDER BY created_at DESC, id DESC");

        let listings = qb
            .build_query_as::<ObservedListing>()
            .fetch_all(self.pool())
            .await?;
        Ok(listings)
    }

    /// Perceptual image hashes indexed for each of the given listings
    pub async fn image_hashes_for(&self, ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        if ids.is_empty() {
            return Ok(out);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT listing_id, value FROM listing_fingerprints WHERE kind = 'image' AND listing_id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(") ORDER BY listing_id, value");

        let rows = qb
            .build_query_as::<ImageHashRow>()
            .fetch_all(self.pool())
            .await?;
        for row in rows {
            out.entry(row.listing_id).or_default().push(row.value);
        }
        Ok(out)
    }

    /// Insert or replace the listing for its snapshot, and rewrite its index entries
    pub async fn save_listing(
        &self,
        listing: &ObservedListing,
        fingerprints: &[FingerprintValue],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO observed_listings (id, snapshot_id, source_id, title, description, price, currency,
                street, city, state, zip, lat, lng, status, listed_at, geo_hash, address_hash, media_hash,
                matched_listing_id, confidence_score, input_issues_json, observed_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(snapshot_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                price = excluded.price,
                currency = excluded.currency,
                street = excluded.street,
                city = excluded.city,
                state = excluded.state,
                zip = excluded.zip,
                lat = excluded.lat,
                lng = excluded.lng,
                status = excluded.status,
                listed_at = excluded.listed_at,
                geo_hash = excluded.geo_hash,
                address_hash = excluded.address_hash,
                media_hash = excluded.media_hash,
                matched_listing_id = excluded.matched_listing_id,
                confidence_score = excluded.confidence_score,
                input_issues_json = excluded.input_issues_json,
                observed_at = excluded.observed_at
            "#,
        )
        .bind(&listing.id)
        .bind(&listing.snapshot_id)
        .bind(&listing.source_id)
        .bind(&listing.title)
        .bind(&listing.description)
        .bind(listing.price)
        .bind(&listing.currency)
        .bind(&listing.street)
        .bind(&listing.city)
        .bind(&listing.state)
        .bind(&listing.zip)
        .bind(listing.lat)
        .bind(listing.lng)
        .bind(&listing.status)
        .bind(&listing.listed_at)
        .bind(&listing.geo_hash)
        .bind(&listing.address_hash)
        .bind(&listing.media_hash)
        .bind(&listing.matched_listing_id)
        .bind(listing.confidence_score)
        .bind(&listing.input_issues_json)
        .bind(&listing.observed_at)
        .bind(&listing.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM listing_fingerprints WHERE listing_id = ?")
            .bind(&listing.id)
            .execute(&mut *tx)
            .await?;

        for fp in fingerprints {
            sqlx::query(
                "INSERT OR IGNORE INTO listing_fingerprints (listing_id, kind, value) VALUES (?, ?, ?)",
            )
            .bind(&listing.id)
            .bind(fp.kind.as_str())
            .bind(&fp.value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Count `matched_listing_id` references that point at no listing
    pub async fn dangling_match_counts(&self) -> Result<DanglingMatches> {
        let listings: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM observed_listings l
            WHERE l.matched_listing_id IS NOT NULL
              AND NOT EXISTS (SELECT 1 FROM observed_listings m WHERE m.id = l.matched_listing_id)
            "#,
        )
        .fetch_one(self.pool())
        .await?;

        let signals: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM signals s
            WHERE s.matched_listing_id IS NOT NULL
              AND NOT EXISTS (SELECT 1 FROM observed_listings m WHERE m.id = s.matched_listing_id)
            "#,
        )
        .fetch_one(self.pool())
        .await?;

        Ok(DanglingMatches { listings, signals })
    }
}

/// Dangling match references found by the integrity check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingMatches {
    pub listings: i64,
    pub signals: i64,
}
