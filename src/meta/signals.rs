//! Signal rows and the review audit trail

use super::MetaDb;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

/// Anomaly class of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    StolenMedia,
    DuplicateListing,
    PriceAnomaly,
    GeoAddressMismatch,
    LowConfidenceSource,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::StolenMedia => "STOLEN_MEDIA",
            SignalType::DuplicateListing => "DUPLICATE_LISTING",
            SignalType::PriceAnomaly => "PRICE_ANOMALY",
            SignalType::GeoAddressMismatch => "GEO_ADDRESS_MISMATCH",
            SignalType::LowConfidenceSource => "LOW_CONFIDENCE_SOURCE",
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "STOLEN_MEDIA" => Ok(SignalType::StolenMedia),
            "DUPLICATE_LISTING" => Ok(SignalType::DuplicateListing),
            "PRICE_ANOMALY" => Ok(SignalType::PriceAnomaly),
            "GEO_ADDRESS_MISMATCH" => Ok(SignalType::GeoAddressMismatch),
            "LOW_CONFIDENCE_SOURCE" => Ok(SignalType::LowConfidenceSource),
            _ => Err(Error::Validation(format!("Unknown signal type: {}", s))),
        }
    }
}

/// Signal severity, ordered from least to most serious
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// One level more serious, saturating at CRITICAL
    pub fn escalate(self) -> Self {
        match self {
            Severity::Info => Severity::Warning,
            Severity::Warning => Severity::Error,
            Severity::Error | Severity::Critical => Severity::Critical,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARNING" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(Error::Validation(format!("Unknown severity: {}", s))),
        }
    }
}

/// Review workflow status of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Open,
    UnderReview,
    Confirmed,
    Dismissed,
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalStatus::Open => write!(f, "OPEN"),
            SignalStatus::UnderReview => write!(f, "UNDER_REVIEW"),
            SignalStatus::Confirmed => write!(f, "CONFIRMED"),
            SignalStatus::Dismissed => write!(f, "DISMISSED"),
        }
    }
}

impl FromStr for SignalStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "OPEN" => Ok(SignalStatus::Open),
            "UNDER_REVIEW" => Ok(SignalStatus::UnderReview),
            "CONFIRMED" => Ok(SignalStatus::Confirmed),
            "DISMISSED" => Ok(SignalStatus::Dismissed),
            _ => Err(Error::Validation(format!("Unknown signal status: {}", s))),
        }
    }
}

/// An anomaly raised against an observed listing
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub signal_type: String,
    pub severity: String,
    pub observed_listing_id: String,
    pub matched_listing_id: Option<String>,
    pub payload_json: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub updated_by: Option<String>,
}

impl Signal {
    pub fn get_type(&self) -> Result<SignalType> {
        self.signal_type.parse()
    }

    pub fn get_severity(&self) -> Result<Severity> {
        self.severity.parse()
    }

    pub fn get_status(&self) -> Result<SignalStatus> {
        self.status.parse()
    }

    pub fn payload(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload_json).unwrap_or(serde_json::Value::Null)
    }
}

/// One review transition of a signal
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SignalTransition {
    pub id: String,
    pub signal_id: String,
    pub from_status: String,
    pub to_status: String,
    pub actor_id: String,
    pub created_at: String,
}

/// Filters for listing signals
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub status: Option<SignalStatus>,
    pub signal_type: Option<SignalType>,
    pub observed_listing_id: Option<String>,
    pub limit: Option<i64>,
}

impl MetaDb {
    /// Insert signals in one transaction and return the rows actually written.
    ///
    /// With `dedupe`, a signal whose (observed listing, type) pair already
    /// exists is skipped.
    pub async fn record_signals(&self, signals: Vec<Signal>, dedupe: bool) -> Result<Vec<Signal>> {
        // Dedupe check is part of the INSERT: the transaction must open with a write
        let sql = if dedupe {
            r#"
            INSERT INTO signals (id, signal_type, severity, observed_listing_id, matched_listing_id,
                                 payload_json, status, created_at, updated_at, updated_by)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM signals WHERE observed_listing_id = ? AND signal_type = ?
            )
            "#
        } else {
            r#"
            INSERT INTO signals (id, signal_type, severity, observed_listing_id, matched_listing_id,
                                 payload_json, status, created_at, updated_at, updated_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        };

        let mut tx = self.pool().begin().await?;
        let mut written = Vec::with_capacity(signals.len());

        for signal in signals {
            let mut query = sqlx::query(sql)
                .bind(&signal.id)
                .bind(&signal.signal_type)
                .bind(&signal.severity)
                .bind(&signal.observed_listing_id)
                .bind(&signal.matched_listing_id)
                .bind(&signal.payload_json)
                .bind(&signal.status)
                .bind(&signal.created_at)
                .bind(&signal.updated_at)
                .bind(&signal.updated_by);
            if dedupe {
                query = query
                    .bind(&signal.observed_listing_id)
                    .bind(&signal.signal_type);
            }

            let result = query.execute(&mut *tx).await?;
            if result.rows_affected() == 0 {
                debug!(
                    signal_type = %signal.signal_type,
                    listing = %signal.observed_listing_id,
                    "Skipping duplicate signal"
                );
                continue;
            }
            written.push(signal);
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Get signal by ID
    pub async fn get_signal(&self, id: &str) -> Result<Option<Signal>> {
        let signal = sqlx::query_as::<_, Signal>("SELECT * FROM signals WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(signal)
    }

    /// List signals matching a filter, newest first
    pub async fn list_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM signals WHERE 1 = 1");
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.to_string());
        }
        if let Some(signal_type) = filter.signal_type {
            qb.push(" AND signal_type = ").push_bind(signal_type.as_str());
        }
        if let Some(ref listing_id) = filter.observed_listing_id {
            qb.push(" AND observed_listing_id = ").push_bind(listing_id.as_str());
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit.unwrap_or(100));

        let signals = qb
            .build_query_as::<Signal>()
            .fetch_all(self.pool())
            .await?;
        Ok(signals)
    }

    /// Move a signal from `expected` to `to` only if it is still in `expected`.
    ///
    /// Returns false when the compare-and-swap lost (status changed or row
    /// missing); the audit row is written in the same transaction.
    pub async fn compare_and_set_signal_status(
        &self,
        id: &str,
        expected: SignalStatus,
        to: SignalStatus,
        actor_id: &str,
        at: &str,
    ) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE signals SET status = ?, updated_at = ?, updated_by = ? WHERE id = ? AND status = ?",
        )
        .bind(to.to_string())
        .bind(at)
        .bind(actor_id)
        .bind(id)
        .bind(expected.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO signal_transitions (id, signal_id, from_status, to_status, actor_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(id)
        .bind(expected.to_string())
        .bind(to.to_string())
        .bind(actor_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Review history of a signal, oldest first
    pub async fn list_transitions(&self, signal_id: &str) -> Result<Vec<SignalTransition>> {
        let transitions = sqlx::query_as::<_, SignalTransition>(
            "SELECT * FROM signal_transitions WHERE signal_id = ? ORDER BY created_at, rowid",
        )
        .bind(signal_id)
        .fetch_all(self.pool())
        .await?;
        Ok(transitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::{setup_test_db, stored_listing};

    #[test]
    fn test_severity_order_and_escalation() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
        assert_eq!(Severity::Info.escalate(), Severity::Warning);
        assert_eq!(Severity::Error.escalate(), Severity::Critical);
        assert_eq!(Severity::Critical.escalate(), Severity::Critical);
    }

    #[test]
    fn test_enum_round_trip_strings() {
        assert_eq!(
            "geo_address_mismatch".parse::<SignalType>().unwrap(),
            SignalType::GeoAddressMismatch
        );
        assert_eq!(
            "under-review".parse::<SignalStatus>().unwrap(),
            SignalStatus::UnderReview
        );
        assert!("ESCALATED".parse::<SignalStatus>().is_err());
    }

    fn draft(listing_id: &str, signal_type: SignalType) -> Signal {
        crate::detect::SignalDraft {
            signal_type,
            severity: Severity::Info,
            observed_listing_id: listing_id.to_string(),
            matched_listing_id: None,
            payload: serde_json::json!({}),
        }
        .into_signal()
    }

    #[tokio::test]
    async fn test_record_signals_dedupe() {
        let (db, _tmp) = setup_test_db().await;
        let listing = stored_listing(&db, "deduped").await;

        let first = db
            .record_signals(
                vec![
                    draft(&listing.id, SignalType::LowConfidenceSource),
                    draft(&listing.id, SignalType::LowConfidenceSource),
                    draft(&listing.id, SignalType::PriceAnomaly),
                ],
                true,
            )
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let again = db
            .record_signals(vec![draft(&listing.id, SignalType::PriceAnomaly)], true)
            .await
            .unwrap();
        assert!(again.is_empty());

        let kept = db
            .record_signals(vec![draft(&listing.id, SignalType::PriceAnomaly)], false)
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);

        let filter = SignalFilter {
            observed_listing_id: Some(listing.id.clone()),
            ..Default::default()
        };
        assert_eq!(db.list_signals(&filter).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_record_signals() {
        let (db, _tmp) = setup_test_db().await;
        let listing = stored_listing(&db, "busy").await;

        let writers = (0..16).map(|_| {
            let db = db.clone();
            let id = listing.id.clone();
            tokio::spawn(async move {
                db.record_signals(vec![draft(&id, SignalType::StolenMedia)], true)
                    .await
            })
        });
        let mut written = 0;
        for writer in writers.collect::<Vec<_>>() {
            written += writer.await.unwrap().unwrap().len();
        }
        assert_eq!(written, 1);
    }
}
