//! Status and crawl-run commands

use crate::config::Config;
use crate::error::Result;
use crate::meta::{CrawlRun, DanglingMatches, GlobalStats, MetaDb};
use crate::pipeline::Pipeline;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub db_stats: GlobalStats,
    pub dangling: DanglingMatches,
}

/// Get system status
pub async fn cmd_status(config: &Config, db: &MetaDb) -> Result<StatusInfo> {
    info!("Getting status");

    let db_stats = db.get_global_stats().await?;
    let dangling = db.dangling_match_counts().await?;

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        db_stats,
        dangling,
    })
}

/// Recent crawl runs of a source
pub async fn cmd_runs(pipeline: &Pipeline, source_key: &str, limit: i64) -> Result<Vec<CrawlRun>> {
    pipeline.crawl_log.list_runs(source_key, limit).await
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 Source Intelligence Status\n");
    println!("Configuration:");
    println!("  Config file: {}", status.config_path);
    println!("  Database: {}", status.db_path);
    println!();

    let stats = &status.db_stats;
    println!("Database:");
    println!("  Sources: {}", stats.source_count);
    println!("  Crawl runs: {}", stats.run_count);
    println!("  Snapshots: {}", stats.snapshot_count);
    println!("  Listings: {}", stats.listing_count);
    println!("  Signals: {}", stats.signal_count);
    for (status, count) in &stats.signals_by_status {
        println!("    {}: {}", status, count);
    }
    println!();

    let dangling = &status.dangling;
    if dangling.listings > 0 || dangling.signals > 0 {
        println!("Integrity:");
        println!(
            "  ⚠ Dangling match references: {} listings, {} signals",
            dangling.listings, dangling.signals
        );
    } else {
        println!("Integrity: ✓ no dangling match references");
    }
}

pub fn print_runs(runs: &[CrawlRun]) {
    if runs.is_empty() {
        println!("No crawl runs recorded.");
        return;
    }

    for run in runs {
        println!("• {} [{}]", run.id, run.status);
        println!(
            "  Started: {}  Ended: {}",
            run.started_at,
            run.ended_at.as_deref().unwrap_or("-")
        );
        println!("  Found: {}, New: {}", run.items_found, run.items_new);
        let errors = run.errors();
        if !errors.is_empty() {
            println!("  Errors: {}", errors.len());
            for error in errors.iter().take(5) {
                println!("    - {}", error);
            }
        }
    }
}
