//! Snapshot rows

use super::{now_rfc3339, MetaDb};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One content-addressed capture of an external listing
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub source_id: String,
    pub external_id: String,
    pub source_url: String,
    pub fetched_at: String,
    pub raw_html: Option<String>,
    pub raw_json: Option<String>,
    pub content_hash: String,
    pub images_enriched: bool,
    pub enriched_at: Option<String>,
    pub enrichment_error: Option<String>,
    pub created_at: String,
}

impl MetaDb {
    /// Find the snapshot for an exact (source, external id, content hash) key
    pub async fn find_snapshot(
        &self,
        source_id: &str,
        external_id: &str,
        content_hash: &str,
    ) -> Result<Option<Snapshot>> {
        let snapshot = sqlx::query_as::<_, Snapshot>(
            "SELECT * FROM snapshots WHERE source_id = ? AND external_id = ? AND content_hash = ?",
        )
        .bind(source_id)
        .bind(external_id)
        .bind(content_hash)
        .fetch_optional(self.pool())
        .await?;
        Ok(snapshot)
    }

    /// Insert a snapshot, counting it against an open crawl run in the same transaction.
    ///
    /// A unique-index collision surfaces as [`Error::ConstraintViolation`].
    pub async fn insert_snapshot(&self, snapshot: &Snapshot, run_id: Option<&str>) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO snapshots (id, source_id, external_id, source_url, fetched_at, raw_html, raw_json,
                                   content_hash, images_enriched, enriched_at, enrichment_error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.source_id)
        .bind(&snapshot.external_id)
        .bind(&snapshot.source_url)
        .bind(&snapshot.fetched_at)
        .bind(&snapshot.raw_html)
        .bind(&snapshot.raw_json)
        .bind(&snapshot.content_hash)
        .bind(snapshot.images_enriched)
        .bind(&snapshot.enriched_at)
        .bind(&snapshot.enrichment_error)
        .bind(&snapshot.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if Error::is_unique_violation(&e) {
                return Err(Error::ConstraintViolation(format!(
                    "snapshot {}/{} with hash {}",
                    snapshot.source_id, snapshot.external_id, snapshot.content_hash
                )));
            }
            return Err(e.into());
        }

        if let Some(run_id) = run_id {
            let result = sqlx::query(
                r#"
                UPDATE crawl_runs SET items_found = items_found + 1, items_new = items_new + 1
                WHERE id = ? AND ended_at IS NULL
                "#,
            )
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(Error::RunClosed(run_id.to_string()));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Get snapshot by ID
    pub async fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>> {
        let snapshot = sqlx::query_as::<_, Snapshot>("SELECT * FROM snapshots WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(snapshot)
    }

    /// All snapshots of one external listing, newest first
    pub async fn list_snapshots(&self, source_id: &str, external_id: &str) -> Result<Vec<Snapshot>> {
        let snapshots = sqlx::query_as::<_, Snapshot>(
            r#"
            SELECT * FROM snapshots WHERE source_id = ? AND external_id = ?
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(source_id)
        .bind(external_id)
        .fetch_all(self.pool())
        .await?;
        Ok(snapshots)
    }

    /// Most recent snapshot of one external listing
    pub async fn latest_snapshot(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<Option<Snapshot>> {
        Ok(self
            .list_snapshots(source_id, external_id)
            .await?
            .into_iter()
            .next())
    }

    /// Record the outcome of image enrichment.
    ///
    /// Success is sticky: a repeated success keeps the first `enriched_at`,
    /// and a later failure never clears `images_enriched`.
    pub async fn mark_snapshot_enriched(
        &self,
        id: &str,
        ok: bool,
        error: Option<&str>,
    ) -> Result<Snapshot> {
        let now = now_rfc3339();
        if ok {
            sqlx::query(
                r#"
                UPDATE snapshots SET images_enriched = 1, enriched_at = ?, enrichment_error = NULL
                WHERE id = ? AND images_enriched = 0
                "#,
            )
            .bind(&now)
            .bind(id)
            .execute(self.pool())
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE snapshots SET enriched_at = ?, enrichment_error = ?
                WHERE id = ? AND images_enriched = 0
                "#,
            )
            .bind(&now)
            .bind(error.unwrap_or("enrichment failed"))
            .bind(id)
            .execute(self.pool())
            .await?;
        }

        self.get_snapshot(id)
            .await?
            .ok_or_else(|| Error::not_found("Snapshot", id))
    }
}
