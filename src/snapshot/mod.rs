//! Content-addressed snapshot store
//!
//! A snapshot is immutable once written. Storing the same payload twice for
//! one external listing is a no-op that returns the existing row.

use crate::error::{Error, Result};
use crate::meta::{format_timestamp, now_rfc3339, MetaDb, Snapshot};
use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

/// Raw captured payload; at least one side must be present
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub json: Option<Value>,
}

impl SnapshotPayload {
    pub fn is_empty(&self) -> bool {
        self.html.is_none() && self.json.as_ref().map_or(true, Value::is_null)
    }

    /// Compact JSON text with object keys in sorted order
    pub fn canonical_json(&self) -> Result<Option<String>> {
        match self.json {
            None | Some(Value::Null) => Ok(None),
            // serde_json's default map is ordered by key
            Some(ref value) => Ok(Some(serde_json::to_string(value)?)),
        }
    }

    /// BLAKE3 over length-prefixed html and json sections
    pub fn content_hash(&self) -> Result<String> {
        let json = self.canonical_json()?;
        let mut hasher = Hasher::new();
        for (tag, section) in [(b"html", self.html.as_deref()), (b"json", json.as_deref())] {
            hasher.update(tag);
            match section {
                Some(text) => {
                    hasher.update(&(text.len() as u64).to_le_bytes());
                    hasher.update(text.as_bytes());
                }
                // distinguishes "absent" from "empty string"
                None => {
                    hasher.update(&u64::MAX.to_le_bytes());
                }
            }
        }
        Ok(hasher.finalize().to_hex().to_string())
    }
}

/// A request to store one capture
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub source_id: String,
    pub external_id: String,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
    pub payload: SnapshotPayload,
    /// Owning crawl run; None for ad-hoc puts
    pub crawl_run_id: Option<String>,
}

/// Result of a put
#[derive(Debug, Clone, Serialize)]
pub struct PutOutcome {
    pub snapshot: Snapshot,
    pub is_new: bool,
}

/// Snapshot store over the metadata database
#[derive(Clone)]
pub struct SnapshotStore {
    db: MetaDb,
}

impl SnapshotStore {
    pub fn new(db: MetaDb) -> Self {
        Self { db }
    }

    /// Store a capture, or return the identical one already stored
    pub async fn put(&self, request: PutRequest) -> Result<PutOutcome> {
        if request.external_id.trim().is_empty() {
            return Err(Error::Validation("external_id must not be empty".to_string()));
        }
        if request.payload.is_empty() {
            return Err(Error::Validation(
                "snapshot payload needs html or json".to_string(),
            ));
        }

        let source = self
            .db
            .get_source(&request.source_id)
            .await?
            .ok_or_else(|| Error::not_found("Source", &request.source_id))?;
        if !source.enabled {
            return Err(Error::SourceDisabled(source.name));
        }

        let run_id = request.crawl_run_id.as_deref();
        if let Some(run_id) = run_id {
            let run = self.db.get_open_run(run_id).await?;
            if run.source_id != source.id {
                return Err(Error::Validation(format!(
                    "crawl run {} belongs to another source",
                    run_id
                )));
            }
        }

        let content_hash = request.payload.content_hash()?;

        if let Some(existing) = self
            .db
            .find_snapshot(&source.id, &request.external_id, &content_hash)
            .await?
        {
            debug!(snapshot = %existing.id, external_id = %request.external_id, "Snapshot unchanged");
            return self.existing(existing, run_id).await;
        }

        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            source_id: source.id.clone(),
            external_id: request.external_id.clone(),
            source_url: request.source_url.clone(),
            fetched_at: format_timestamp(&request.fetched_at),
            raw_html: request.payload.html.clone(),
            raw_json: request.payload.canonical_json()?,
            content_hash,
            images_enriched: false,
            enriched_at: None,
            enrichment_error: None,
            created_at: now_rfc3339(),
        };

        match self.db.insert_snapshot(&snapshot, run_id).await {
            Ok(()) => {
                info!(
                    snapshot = %snapshot.id,
                    source = %source.name,
                    external_id = %snapshot.external_id,
                    "Stored new snapshot"
                );
                Ok(PutOutcome {
                    snapshot,
                    is_new: true,
                })
            }
            Err(Error::ConstraintViolation(detail)) => {
                debug!(%detail, "Lost snapshot insert race, returning winner");
                let winner = self
                    .db
                    .find_snapshot(&snapshot.source_id, &snapshot.external_id, &snapshot.content_hash)
                    .await?
                    .ok_or_else(|| Error::ConstraintViolation(detail))?;
                self.existing(winner, run_id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn existing(&self, snapshot: Snapshot, run_id: Option<&str>) -> Result<PutOutcome> {
        if let Some(run_id) = run_id {
            self.db.bump_run_counts(run_id, false).await?;
        }
        Ok(PutOutcome {
            snapshot,
            is_new: false,
        })
    }

    /// Record image enrichment for a snapshot
    pub async fn mark_enriched(
        &self,
        snapshot_id: &str,
        ok: bool,
        error: Option<&str>,
    ) -> Result<Snapshot> {
        let snapshot = self.db.mark_snapshot_enriched(snapshot_id, ok, error).await?;
        if !ok && !snapshot.images_enriched {
            debug!(snapshot = %snapshot_id, error = ?error, "Image enrichment failed");
        }
        Ok(snapshot)
    }

    pub async fn get(&self, snapshot_id: &str) -> Result<Snapshot> {
        self.db
            .get_snapshot(snapshot_id)
            .await?
            .ok_or_else(|| Error::not_found("Snapshot", snapshot_id))
    }

    /// Most recent capture of an external listing
    pub async fn latest(&self, source_id: &str, external_id: &str) -> Result<Option<Snapshot>> {
        self.db.latest_snapshot(source_id, external_id).await
    }

    /// Every capture of an external listing, newest first
    pub async fn history(&self, source_id: &str, external_id: &str) -> Result<Vec<Snapshot>> {
        self.db.list_snapshots(source_id, external_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::{add_source, setup_test_db};
    use crate::meta::{CrawlRun, RunStatus};
    use serde_json::json;

    fn request(source_id: &str, external_id: &str, payload: SnapshotPayload) -> PutRequest {
        PutRequest {
            source_id: source_id.to_string(),
            external_id: external_id.to_string(),
            source_url: format!("https://example.com/listing/{}", external_id),
            fetched_at: Utc::now(),
            payload,
            crawl_run_id: None,
        }
    }

    fn html(text: &str) -> SnapshotPayload {
        SnapshotPayload {
            html: Some(text.to_string()),
            json: None,
        }
    }

    #[test]
    fn test_content_hash_ignores_key_order() {
        let a: SnapshotPayload =
            serde_json::from_str(r#"{"json": {"price": 1, "beds": 2}}"#).unwrap();
        let b: SnapshotPayload =
            serde_json::from_str(r#"{"json": {"beds": 2, "price": 1}}"#).unwrap();
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }

    #[test]
    fn test_content_hash_sections_are_separated() {
        let html_only = html("{}");
        let json_only = SnapshotPayload {
            html: None,
            json: Some(json!({})),
        };
        let empty_html = html("");
        assert_ne!(html_only.content_hash().unwrap(), json_only.content_hash().unwrap());
        assert_ne!(empty_html.content_hash().unwrap(), json_only.content_hash().unwrap());
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let (db, _tmp) = setup_test_db().await;
        let source = add_source(&db, "idem", 70).await;
        let store = SnapshotStore::new(db.clone());

        let first = store
            .put(request(&source.id, "L1", html("<p>hi</p>")))
            .await
            .unwrap();
        assert!(first.is_new);

        let second = store
            .put(request(&source.id, "L1", html("<p>hi</p>")))
            .await
            .unwrap();
        assert!(!second.is_new);
        assert_eq!(second.snapshot.id, first.snapshot.id);

        let changed = store
            .put(request(&source.id, "L1", html("<p>price cut</p>")))
            .await
            .unwrap();
        assert!(changed.is_new);

        let history = store.history(&source.id, "L1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            store.latest(&source.id, "L1").await.unwrap().unwrap().id,
            changed.snapshot.id
        );
    }

    #[tokio::test]
    async fn test_concurrent_identical_puts_store_once() {
        let (db, _tmp) = setup_test_db().await;
        let source = add_source(&db, "race", 70).await;
        let store = SnapshotStore::new(db.clone());

        let run = CrawlRun::new(source.id.clone());
        db.insert_crawl_run(&run).await.unwrap();

        let mut a = request(&source.id, "L9", html("<p>same</p>"));
        a.crawl_run_id = Some(run.id.clone());
        let b = a.clone();

        let (ra, rb) = tokio::join!(store.put(a), store.put(b));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert_eq!(ra.snapshot.id, rb.snapshot.id);
        assert_eq!(u8::from(ra.is_new) + u8::from(rb.is_new), 1);

        let run = db.get_crawl_run(&run.id).await.unwrap().unwrap();
        assert_eq!(run.items_found, 2);
        assert_eq!(run.items_new, 1);
    }

    #[tokio::test]
    async fn test_put_rejections() {
        let (db, _tmp) = setup_test_db().await;
        let source = add_source(&db, "rules", 70).await;
        let store = SnapshotStore::new(db.clone());

        let empty = store
            .put(request(&source.id, "L1", SnapshotPayload::default()))
            .await;
        assert!(matches!(empty, Err(Error::Validation(_))));

        let unknown = store.put(request("nope", "L1", html("x"))).await;
        assert!(matches!(unknown, Err(Error::NotFound { .. })));

        let run = CrawlRun::new(source.id.clone());
        db.insert_crawl_run(&run).await.unwrap();
        db.close_crawl_run(&run.id, RunStatus::Succeeded, None)
            .await
            .unwrap();
        let mut late = request(&source.id, "L1", html("x"));
        late.crawl_run_id = Some(run.id.clone());
        assert!(matches!(store.put(late).await, Err(Error::RunClosed(_))));

        db.set_source_enabled(&source.id, false).await.unwrap();
        let disabled = store.put(request(&source.id, "L1", html("x"))).await;
        assert!(matches!(disabled, Err(Error::SourceDisabled(_))));
    }

    #[tokio::test]
    async fn test_mark_enriched_is_sticky() {
        let (db, _tmp) = setup_test_db().await;
        let source = add_source(&db, "enrich", 70).await;
        let store = SnapshotStore::new(db.clone());
        let put = store
            .put(request(&source.id, "L1", html("<img>")))
            .await
            .unwrap();

        let failed = store
            .mark_enriched(&put.snapshot.id, false, Some("timeout"))
            .await
            .unwrap();
        assert!(!failed.images_enriched);
        assert_eq!(failed.enrichment_error.as_deref(), Some("timeout"));

        let ok = store.mark_enriched(&put.snapshot.id, true, None).await.unwrap();
        assert!(ok.images_enriched);
        assert!(ok.enrichment_error.is_none());

        let again = store.mark_enriched(&put.snapshot.id, true, None).await.unwrap();
        assert_eq!(again.enriched_at, ok.enriched_at);

        let downgrade = store
            .mark_enriched(&put.snapshot.id, false, Some("late failure"))
            .await
            .unwrap();
        assert!(downgrade.images_enriched);
        assert!(downgrade.enrichment_error.is_none());

        assert!(matches!(
            store.mark_enriched("missing", true, None).await,
            Err(Error::NotFound { .. })
        ));
    }
}
