//! Crawl event log
//!
//! Every crawl attempt against a source is one run: opened by [`CrawlLog::start`],
//! annotated with free-text errors while it is in flight, and closed exactly
//! once with a terminal status. Item counters are maintained by the snapshot
//! store as snapshots are put against the run.

use crate::error::{Error, Result};
use crate::meta::{CrawlRun, MetaDb, RunStatus};
use tracing::{info, warn};

#[derive(Clone)]
pub struct CrawlLog {
    db: MetaDb,
}

impl CrawlLog {
    pub fn new(db: MetaDb) -> Self {
        Self { db }
    }

    /// Open a run for a source, by id or name
    pub async fn start(&self, source_key: &str) -> Result<CrawlRun> {
        let source = self.db.resolve_source(source_key).await?;
        if !source.enabled {
            return Err(Error::SourceDisabled(source.name));
        }

        let run = CrawlRun::new(source.id.clone());
        self.db.insert_crawl_run(&run).await?;
        info!(run = %run.id, source = %source.name, "Crawl run started");
        Ok(run)
    }

    /// Append an error to an open run; the run keeps going
    pub async fn record_error(&self, run_id: &str, message: &str) -> Result<()> {
        warn!(run = %run_id, "{}", message);
        self.db.append_run_error(run_id, message).await
    }

    /// Close a run with a terminal status and any late errors
    pub async fn close(
        &self,
        run_id: &str,
        status: RunStatus,
        errors: Option<Vec<String>>,
    ) -> Result<CrawlRun> {
        if status == RunStatus::Running {
            return Err(Error::Validation(
                "a crawl run cannot be closed as RUNNING".to_string(),
            ));
        }

        let run = self.db.close_crawl_run(run_id, status, errors).await?;
        info!(
            run = %run.id,
            status = %run.status,
            found = run.items_found,
            new = run.items_new,
            "Crawl run closed"
        );
        Ok(run)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<CrawlRun> {
        self.db
            .get_crawl_run(run_id)
            .await?
            .ok_or_else(|| Error::not_found("CrawlRun", run_id))
    }

    /// Recent runs of a source, newest first
    pub async fn list_runs(&self, source_key: &str, limit: i64) -> Result<Vec<CrawlRun>> {
        let source = self.db.resolve_source(source_key).await?;
        self.db.list_runs(&source.id, limit).await
    }

    pub async fn latest_run(&self, source_key: &str) -> Result<Option<CrawlRun>> {
        let source = self.db.resolve_source(source_key).await?;
        self.db.get_latest_run(&source.id).await
    }
}

/// Terminal status for a finished run given its item outcomes
pub fn run_outcome(succeeded: usize, failed: usize) -> RunStatus {
    match (succeeded, failed) {
        (_, 0) => RunStatus::Succeeded,
        (0, _) => RunStatus::Failed,
        _ => RunStatus::Partial,
    }
}
