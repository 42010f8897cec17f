//! Metadata storage using SQLite
//!
//! This module handles all persistent pipeline state:
//! - Sources (the registry of external listing origins)
//! - Crawl runs (one event per crawl attempt)
//! - Snapshots (content-addressed captures)
//! - Observed listings and their fingerprint index
//! - Signals and their review audit trail

mod listings;
mod schema;
mod signals;
mod snapshots;

pub use listings::*;
pub use schema::*;
pub use signals::*;
pub use snapshots::*;

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Current time in the canonical stored form
pub fn now_rfc3339() -> String {
    format_timestamp(&Utc::now())
}

/// Format a timestamp the way every table stores it (UTC, microseconds)
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored or user-supplied timestamp (RFC 3339 or a bare date)
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Source types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Portal,
    Mls,
    Brokerage,
    Classifieds,
    Aggregator,
    Other,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Portal => write!(f, "portal"),
            SourceType::Mls => write!(f, "mls"),
            SourceType::Brokerage => write!(f, "brokerage"),
            SourceType::Classifieds => write!(f, "classifieds"),
            SourceType::Aggregator => write!(f, "aggregator"),
            SourceType::Other => write!(f, "other"),
        }
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "portal" => Ok(SourceType::Portal),
            "mls" => Ok(SourceType::Mls),
            "brokerage" => Ok(SourceType::Brokerage),
            "classifieds" => Ok(SourceType::Classifieds),
            "aggregator" => Ok(SourceType::Aggregator),
            "other" => Ok(SourceType::Other),
            _ => Err(Error::Validation(format!("Unknown source type: {}", s))),
        }
    }
}

/// Crawl run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Partial,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Succeeded => write!(f, "SUCCEEDED"),
            RunStatus::Failed => write!(f, "FAILED"),
            RunStatus::Partial => write!(f, "PARTIAL"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCEEDED" => Ok(RunStatus::Succeeded),
            "FAILED" => Ok(RunStatus::Failed),
            "PARTIAL" => Ok(RunStatus::Partial),
            _ => Err(Error::Validation(format!("Unknown run status: {}", s))),
        }
    }
}

/// A registered listing source
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub source_type: String,
    pub base_url: String,
    pub trust_score: i64,
    pub enabled: bool,
    pub config_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Reject trust scores outside 0..=100
pub fn validate_trust_score(score: i64) -> Result<()> {
    if !(0..=100).contains(&score) {
        return Err(Error::Validation(format!(
            "trust score must be between 0 and 100, got {}",
            score
        )));
    }
    Ok(())
}

impl Source {
    pub fn new(
        name: String,
        source_type: SourceType,
        base_url: &str,
        trust_score: i64,
    ) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(Error::Validation("source name must not be empty".to_string()));
        }
        validate_trust_score(trust_score)?;
        let base_url = Url::parse(base_url)?;

        let now = now_rfc3339();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name,
            source_type: source_type.to_string(),
            base_url: base_url.to_string(),
            trust_score,
            enabled: true,
            config_json: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_type(&self) -> Result<SourceType> {
        self.source_type.parse()
    }
}

/// A crawl run record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CrawlRun {
    pub id: String,
    pub source_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: String,
    pub items_found: i64,
    pub items_new: i64,
    pub errors_json: Option<String>,
}

impl CrawlRun {
    pub fn new(source_id: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id,
            started_at: now_rfc3339(),
            ended_at: None,
            status: RunStatus::Running.to_string(),
            items_found: 0,
            items_new: 0,
            errors_json: None,
        }
    }

    pub fn get_status(&self) -> Result<RunStatus> {
        self.status.parse()
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the metadata database
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file, config.pipeline.max_connections).await
    }

    async fn open(db_path: &std::path::Path, max_connections: u32) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='sources'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    // ===== Source Operations =====

    /// Insert a new source
    pub async fn insert_source(&self, source: &Source) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO sources (id, name, source_type, base_url, trust_score, enabled, config_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.id)
        .bind(&source.name)
        .bind(&source.source_type)
        .bind(&source.base_url)
        .bind(source.trust_score)
        .bind(source.enabled)
        .bind(&source.config_json)
        .bind(&source.created_at)
        .bind(&source.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if Error::is_unique_violation(&e) => Err(Error::Validation(format!(
                "source name already registered: {}",
                source.name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Get source by ID
    pub async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(source)
    }

    /// Get source by its unique display name
    pub async fn get_source_by_name(&self, name: &str) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(source)
    }

    /// Look a source up by ID, then by name
    pub async fn resolve_source(&self, key: &str) -> Result<Source> {
        if let Some(source) = self.get_source(key).await? {
            return Ok(source);
        }
        self.get_source_by_name(key)
            .await?
            .ok_or_else(|| Error::not_found("Source", key))
    }

    /// List all sources
    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>("SELECT * FROM sources ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(sources)
    }

    async fn touch_source(&self, id: &str, rows_affected: u64) -> Result<Source> {
        if rows_affected == 0 {
            return Err(Error::not_found("Source", id));
        }
        self.get_source(id)
            .await?
            .ok_or_else(|| Error::not_found("Source", id))
    }

    /// Enable or disable a source
    pub async fn set_source_enabled(&self, id: &str, enabled: bool) -> Result<Source> {
        let result = sqlx::query("UPDATE sources SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(now_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.touch_source(id, result.rows_affected()).await
    }

    /// Update a source's trust score
    pub async fn update_source_trust(&self, id: &str, trust_score: i64) -> Result<Source> {
        validate_trust_score(trust_score)?;
        let result = sqlx::query("UPDATE sources SET trust_score = ?, updated_at = ? WHERE id = ?")
            .bind(trust_score)
            .bind(now_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.touch_source(id, result.rows_affected()).await
    }

    /// Replace a source's opaque config blob
    pub async fn update_source_config(
        &self,
        id: &str,
        config_json: Option<String>,
    ) -> Result<Source> {
        if let Some(ref raw) = config_json {
            serde_json::from_str::<serde_json::Value>(raw)?;
        }
        let result = sqlx::query("UPDATE sources SET config_json = ?, updated_at = ? WHERE id = ?")
            .bind(config_json)
            .bind(now_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.touch_source(id, result.rows_affected()).await
    }

    /// Delete a source that no snapshot references, along with its crawl runs
    pub async fn delete_source(&self, id: &str) -> Result<()> {
        let snapshots: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshots WHERE source_id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if snapshots > 0 {
            return Err(Error::SourceInUse {
                id: id.to_string(),
                snapshots,
            });
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM crawl_runs WHERE source_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Source", id));
        }
        tx.commit().await?;
        Ok(())
    }

    // ===== Crawl Run Operations =====

    /// Insert a freshly started crawl run
    pub async fn insert_crawl_run(&self, run: &CrawlRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crawl_runs (id, source_id, started_at, ended_at, status, items_found, items_new, errors_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.source_id)
        .bind(&run.started_at)
        .bind(&run.ended_at)
        .bind(&run.status)
        .bind(run.items_found)
        .bind(run.items_new)
        .bind(&run.errors_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get crawl run by ID
    pub async fn get_crawl_run(&self, id: &str) -> Result<Option<CrawlRun>> {
        let run = sqlx::query_as::<_, CrawlRun>("SELECT * FROM crawl_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    /// Get an existing, still-open crawl run
    pub async fn get_open_run(&self, id: &str) -> Result<CrawlRun> {
        let run = self
            .get_crawl_run(id)
            .await?
            .ok_or_else(|| Error::not_found("CrawlRun", id))?;
        if !run.is_open() {
            return Err(Error::RunClosed(id.to_string()));
        }
        Ok(run)
    }

    /// Count one more item found (and optionally new) against an open run
    pub async fn bump_run_counts(&self, run_id: &str, is_new: bool) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_runs SET items_found = items_found + 1, items_new = items_new + ?
            WHERE id = ? AND ended_at IS NULL
            "#,
        )
        .bind(i64::from(is_new))
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.get_open_run(run_id).await?;
        }
        Ok(())
    }

    /// Append a free-text error to an open run
    pub async fn append_run_error(&self, run_id: &str, message: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_runs SET errors_json = json_insert(COALESCE(errors_json, '[]'), '$[#]', ?)
            WHERE id = ? AND ended_at IS NULL
            "#,
        )
        .bind(message)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.get_open_run(run_id).await?;
        }
        Ok(())
    }

    /// Close a crawl run; fails if it was already closed
    pub async fn close_crawl_run(
        &self,
        id: &str,
        status: RunStatus,
        errors: Option<Vec<String>>,
    ) -> Result<CrawlRun> {
        let mut tx = self.pool.begin().await?;

        // Claim the run first so the transaction starts with a write
        let result = sqlx::query(
            "UPDATE crawl_runs SET ended_at = ?, status = ? WHERE id = ? AND ended_at IS NULL",
        )
        .bind(now_rfc3339())
        .bind(status.to_string())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return match self.get_crawl_run(id).await? {
                Some(_) => Err(Error::RunClosed(id.to_string())),
                None => Err(Error::not_found("CrawlRun", id)),
            };
        }

        let late_errors = errors.unwrap_or_default();
        if !late_errors.is_empty() {
            let run = sqlx::query_as::<_, CrawlRun>("SELECT * FROM crawl_runs WHERE id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            let mut all_errors = run.errors();
            all_errors.extend(late_errors);
            sqlx::query("UPDATE crawl_runs SET errors_json = ? WHERE id = ?")
                .bind(serde_json::to_string(&all_errors)?)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.get_crawl_run(id)
            .await?
            .ok_or_else(|| Error::not_found("CrawlRun", id))
    }

    /// List recent crawl runs for a source, newest first
    pub async fn list_runs(&self, source_id: &str, limit: i64) -> Result<Vec<CrawlRun>> {
        let runs = sqlx::query_as::<_, CrawlRun>(
            "SELECT * FROM crawl_runs WHERE source_id = ? ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(source_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    /// Get latest crawl run for a source
    pub async fn get_latest_run(&self, source_id: &str) -> Result<Option<CrawlRun>> {
        Ok(self.list_runs(source_id, 1).await?.into_iter().next())
    }

    // ===== Statistics =====

    /// Get source statistics
    pub async fn get_source_stats(&self, source_id: &str) -> Result<SourceStats> {
        let snapshot_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM snapshots WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await?;

        let listing_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM observed_listings WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await?;

        let signal_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM signals s
            JOIN observed_listings l ON s.observed_listing_id = l.id
            WHERE l.source_id = ?
            "#,
        )
        .bind(source_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(SourceStats {
            snapshot_count,
            listing_count,
            signal_count,
        })
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let n: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(n)
    }

    /// Get global statistics
    pub async fn get_global_stats(&self) -> Result<GlobalStats> {
        let signals_by_status: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM signals GROUP BY status ORDER BY status")
                .fetch_all(&self.pool)
                .await?;

        Ok(GlobalStats {
            source_count: self.count_rows("sources").await?,
            run_count: self.count_rows("crawl_runs").await?,
            snapshot_count: self.count_rows("snapshots").await?,
            listing_count: self.count_rows("observed_listings").await?,
            signal_count: self.count_rows("signals").await?,
            signals_by_status,
        })
    }
}

/// Statistics for a single source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStats {
    pub snapshot_count: i64,
    pub listing_count: i64,
    pub signal_count: i64,
}

/// Global statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub source_count: i64,
    pub run_count: i64,
    pub snapshot_count: i64,
    pub listing_count: i64,
    pub signal_count: i64,
    pub signals_by_status: Vec<(String, i64)>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) async fn setup_test_db() -> (MetaDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.db_file = tmp.path().join("test.db");

        let db = MetaDb::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();
        (db, tmp)
    }

    pub(crate) async fn add_source(db: &MetaDb, name: &str, trust: i64) -> Source {
        let source = Source::new(
            name.to_string(),
            SourceType::Portal,
            &format!("https://{}.example.com/", name),
            trust,
        )
        .unwrap();
        db.insert_source(&source).await.unwrap();
        source
    }

    /// A resolved listing backed by real source and snapshot rows
    pub(crate) async fn stored_listing(db: &MetaDb, source_name: &str) -> ObservedListing {
        use crate::config::MatchingConfig;
        use crate::resolve::{ParsedFields, Resolver};
        use crate::snapshot::{PutRequest, SnapshotPayload, SnapshotStore};

        let source = add_source(db, source_name, 80).await;
        let snapshot = SnapshotStore::new(db.clone())
            .put(PutRequest {
                source_id: source.id.clone(),
                external_id: format!("{}-1", source_name),
                source_url: format!("https://{}.example.com/1", source_name),
                fetched_at: Utc::now(),
                payload: SnapshotPayload {
                    html: Some("<p>listing</p>".to_string()),
                    json: None,
                },
                crawl_run_id: None,
            })
            .await
            .unwrap()
            .snapshot;
        Resolver::new(db.clone(), MatchingConfig::default())
            .resolve(&snapshot.id, &ParsedFields::default())
            .await
            .unwrap()
            .listing
    }

    #[tokio::test]
    async fn test_source_crud() {
        let (db, _tmp) = setup_test_db().await;

        let source = add_source(&db, "zillowish", 80).await;

        let loaded = db.get_source(&source.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "zillowish");
        assert_eq!(loaded.trust_score, 80);
        assert!(loaded.enabled);
        assert_eq!(loaded.get_type().unwrap(), SourceType::Portal);

        let by_name = db.resolve_source("zillowish").await.unwrap();
        assert_eq!(by_name.id, source.id);

        let disabled = db.set_source_enabled(&source.id, false).await.unwrap();
        assert!(!disabled.enabled);

        let retrusted = db.update_source_trust(&source.id, 15).await.unwrap();
        assert_eq!(retrusted.trust_score, 15);
        assert!(db.update_source_trust(&source.id, 101).await.is_err());

        db.delete_source(&source.id).await.unwrap();
        assert!(db.list_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_source_name_rejected() {
        let (db, _tmp) = setup_test_db().await;
        add_source(&db, "dupe", 50).await;

        let again = Source::new("dupe".to_string(), SourceType::Mls, "https://other.example/", 50)
            .unwrap();
        assert!(matches!(
            db.insert_source(&again).await,
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_source_validation() {
        assert!(Source::new("x".into(), SourceType::Other, "not a url", 50).is_err());
        assert!(Source::new("x".into(), SourceType::Other, "https://x.example/", -1).is_err());
        assert!(Source::new(" ".into(), SourceType::Other, "https://x.example/", 50).is_err());
    }

    #[tokio::test]
    async fn test_crawl_run_lifecycle() {
        let (db, _tmp) = setup_test_db().await;
        let source = add_source(&db, "runs", 60).await;

        let run = CrawlRun::new(source.id.clone());
        db.insert_crawl_run(&run).await.unwrap();

        db.bump_run_counts(&run.id, true).await.unwrap();
        db.bump_run_counts(&run.id, false).await.unwrap();
        db.append_run_error(&run.id, "listing 42: timeout").await.unwrap();

        let closed = db
            .close_crawl_run(&run.id, RunStatus::Partial, Some(vec!["late error".into()]))
            .await
            .unwrap();
        assert_eq!(closed.items_found, 2);
        assert_eq!(closed.items_new, 1);
        assert_eq!(closed.get_status().unwrap(), RunStatus::Partial);
        assert!(closed.ended_at.is_some());
        assert_eq!(
            closed.errors(),
            vec!["listing 42: timeout".to_string(), "late error".to_string()]
        );

        assert!(matches!(
            db.close_crawl_run(&run.id, RunStatus::Succeeded, None).await,
            Err(Error::RunClosed(_))
        ));
        assert!(matches!(
            db.bump_run_counts(&run.id, true).await,
            Err(Error::RunClosed(_))
        ));
        assert!(matches!(
            db.bump_run_counts("missing", true).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert!(parse_timestamp("2024-03-01T12:00:00Z").is_some());
        assert!(parse_timestamp("2024-03-01T12:00:00+02:00").is_some());
        assert!(parse_timestamp("2024-03-01").is_some());
        assert!(parse_timestamp("March 1st").is_none());
    }
}
