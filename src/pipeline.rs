//! Engine bundle and crawl ingest orchestration
//!
//! An ingest opens a crawl run, groups items by external id, and works the
//! groups concurrently (bounded by `pipeline.workers`). Items sharing an
//! external id are handled in order so successive captures of one listing
//! resolve against each other deterministically.

use crate::config::Config;
use crate::crawl::{run_outcome, CrawlLog};
use crate::detect::SignalDetector;
use crate::error::Result;
use crate::meta::{CrawlRun, MetaDb, RunStatus, Source};
use crate::resolve::{ParsedFields, Resolver};
use crate::review::ReviewWorkflow;
use crate::snapshot::{PutRequest, SnapshotPayload, SnapshotStore};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// One line of a crawl feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlItem {
    pub external_id: String,
    pub source_url: String,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
    pub payload: SnapshotPayload,
    #[serde(default)]
    pub fields: ParsedFields,
}

/// Parse a JSON Lines feed; blank lines are skipped, bad lines reported by number
pub fn parse_feed(text: &str) -> (Vec<CrawlItem>, Vec<String>) {
    let mut items = Vec::new();
    let mut errors = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<CrawlItem>(line) {
            Ok(item) => items.push(item),
            Err(e) => errors.push(format!("line {}: {}", i + 1, e)),
        }
    }
    (items, errors)
}

/// Statistics from one ingest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestStats {
    pub run_id: String,
    pub status: RunStatus,
    pub items: usize,
    pub snapshots_new: usize,
    pub snapshots_unchanged: usize,
    pub listings_resolved: usize,
    pub listings_matched: usize,
    pub signals_raised: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
struct ItemOutcome {
    is_new: bool,
    matched: bool,
    signals: usize,
}

/// Every engine over one database
#[derive(Clone)]
pub struct Pipeline {
    pub db: MetaDb,
    pub config: Config,
    pub snapshots: SnapshotStore,
    pub resolver: Resolver,
    pub detector: SignalDetector,
    pub review: ReviewWorkflow,
    pub crawl_log: CrawlLog,
}

impl Pipeline {
    pub fn new(db: MetaDb, config: Config) -> Self {
        Self {
            snapshots: SnapshotStore::new(db.clone()),
            resolver: Resolver::new(db.clone(), config.matching.clone()),
            detector: SignalDetector::new(config.detection.clone()),
            review: ReviewWorkflow::new(db.clone()),
            crawl_log: CrawlLog::new(db.clone()),
            db,
            config,
        }
    }

    /// Connect to the configured database
    pub async fn open(config: Config) -> Result<Self> {
        let db = MetaDb::connect(&config).await?;
        Ok(Self::new(db, config))
    }

    /// Ingest a JSON Lines feed; unparsable lines become run errors
    pub async fn ingest_feed(
        &self,
        source_key: &str,
        text: &str,
        progress: Option<ProgressBar>,
    ) -> Result<IngestStats> {
        let (items, parse_errors) = parse_feed(text);
        self.run_ingest(source_key, items, parse_errors, progress).await
    }

    /// Ingest already-parsed items under a new crawl run
    pub async fn ingest(
        &self,
        source_key: &str,
        items: Vec<CrawlItem>,
        progress: Option<ProgressBar>,
    ) -> Result<IngestStats> {
        self.run_ingest(source_key, items, Vec::new(), progress).await
    }

    async fn run_ingest(
        &self,
        source_key: &str,
        items: Vec<CrawlItem>,
        parse_errors: Vec<String>,
        progress: Option<ProgressBar>,
    ) -> Result<IngestStats> {
        let run = self.crawl_log.start(source_key).await?;
        let source = self.db.resolve_source(source_key).await?;

        for error in &parse_errors {
            self.crawl_log.record_error(&run.id, error).await?;
        }

        let item_count = items.len();
        let mut groups: BTreeMap<String, Vec<CrawlItem>> = BTreeMap::new();
        for item in items {
            groups.entry(item.external_id.clone()).or_default().push(item);
        }
        info!(
            run = %run.id,
            items = item_count,
            listings = groups.len(),
            workers = self.config.pipeline.workers,
            "Ingesting crawl feed"
        );

        let results: Vec<Vec<std::result::Result<ItemOutcome, String>>> = stream::iter(groups)
            .map(|(_, group)| self.ingest_group(&source, &run, group, progress.as_ref()))
            .buffer_unordered(self.config.pipeline.workers)
            .collect()
            .await;

        let mut stats = IngestStats {
            run_id: run.id.clone(),
            status: RunStatus::Running,
            items: item_count,
            snapshots_new: 0,
            snapshots_unchanged: 0,
            listings_resolved: 0,
            listings_matched: 0,
            signals_raised: 0,
            errors: parse_errors,
        };
        let mut succeeded = 0;
        for result in results.into_iter().flatten() {
            match result {
                Ok(outcome) => {
                    succeeded += 1;
                    if outcome.is_new {
                        stats.snapshots_new += 1;
                        stats.listings_resolved += 1;
                    } else {
                        stats.snapshots_unchanged += 1;
                    }
                    stats.listings_matched += usize::from(outcome.matched);
                    stats.signals_raised += outcome.signals;
                }
                Err(message) => stats.errors.push(message),
            }
        }

        let status = run_outcome(succeeded, stats.errors.len());
        let closed = self.crawl_log.close(&run.id, status, None).await?;
        stats.status = closed.get_status()?;

        if let Some(pb) = progress {
            pb.finish_with_message(format!("{} items ingested", item_count));
        }
        Ok(stats)
    }

    async fn ingest_group(
        &self,
        source: &Source,
        run: &CrawlRun,
        group: Vec<CrawlItem>,
        progress: Option<&ProgressBar>,
    ) -> Vec<std::result::Result<ItemOutcome, String>> {
        let mut outcomes = Vec::with_capacity(group.len());
        for item in group {
            let external_id = item.external_id.clone();
            let outcome = match self.ingest_item(source, run, item).await {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    let message = format!("{}: {}", external_id, e);
                    if let Err(log_err) = self.crawl_log.record_error(&run.id, &message).await {
                        debug!(run = %run.id, "Could not record item error: {}", log_err);
                    }
                    Err(message)
                }
            };
            outcomes.push(outcome);
            if let Some(pb) = progress {
                pb.inc(1);
            }
        }
        outcomes
    }

    /// put -> resolve -> detect -> record, for one item
    async fn ingest_item(
        &self,
        source: &Source,
        run: &CrawlRun,
        item: CrawlItem,
    ) -> Result<ItemOutcome> {
        let put = self
            .snapshots
            .put(PutRequest {
                source_id: source.id.clone(),
                external_id: item.external_id,
                source_url: item.source_url,
                fetched_at: item.fetched_at.unwrap_or_else(Utc::now),
                payload: item.payload,
                crawl_run_id: Some(run.id.clone()),
            })
            .await?;

        if !put.is_new {
            return Ok(ItemOutcome::default());
        }

        let resolution = self.resolver.resolve(&put.snapshot.id, &item.fields).await?;
        let signals = self
            .detector
            .detect_for_listing(
                &self.db,
                &resolution.listing.id,
                self.config.pipeline.dedupe_signals,
            )
            .await?;

        Ok(ItemOutcome {
            is_new: true,
            matched: resolution.matched.is_some(),
            signals: signals.len(),
        })
    }
}
