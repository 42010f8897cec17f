//! Crawl feed ingestion command

use crate::error::Result;
use crate::pipeline::{IngestStats, Pipeline};
use crate::progress::item_progress_bar;
use std::path::Path;
use tracing::info;

/// Ingest a JSON Lines crawl feed for one source under a new crawl run
pub async fn cmd_crawl(
    pipeline: &Pipeline,
    source_key: &str,
    feed_path: &Path,
    show_progress: bool,
) -> Result<IngestStats> {
    info!("Ingesting crawl feed: {}", feed_path.display());
    let text = tokio::fs::read_to_string(feed_path).await?;

    let progress = if show_progress {
        let lines = text.lines().filter(|l| !l.trim().is_empty()).count();
        item_progress_bar(lines, "Processing listings")
    } else {
        None
    };

    let stats = pipeline.ingest_feed(source_key, &text, progress).await?;
    info!(
        run = %stats.run_id,
        status = %stats.status,
        new = stats.snapshots_new,
        errors = stats.errors.len(),
        "Crawl ingest finished"
    );
    Ok(stats)
}

pub fn print_ingest_stats(stats: &IngestStats) {
    println!("\n✓ Crawl ingest complete ({})", stats.status);
    println!("  Run: {}", stats.run_id);
    println!("  Items: {}", stats.items);
    println!("  New snapshots: {}", stats.snapshots_new);
    println!("  Unchanged: {}", stats.snapshots_unchanged);
    println!("  Listings resolved: {}", stats.listings_resolved);
    println!("  Matched to prior listings: {}", stats.listings_matched);
    println!("  Signals raised: {}", stats.signals_raised);
    if !stats.errors.is_empty() {
        println!("  Errors: {}", stats.errors.len());
        for error in stats.errors.iter().take(10) {
            println!("    - {}", error);
        }
        if stats.errors.len() > 10 {
            println!("    ... and {} more", stats.errors.len() - 10);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::meta::tests::{add_source, setup_test_db};
    use crate::meta::RunStatus;

    #[tokio::test]
    async fn test_cmd_crawl_reads_feed_file() {
        let (db, tmp) = setup_test_db().await;
        add_source(&db, "filefeed", 70).await;
        let pipeline = Pipeline::new(db, Config::default());

        let feed = tmp.path().join("items.jsonl");
        std::fs::write(
            &feed,
            concat!(
                r#"{"external_id": "X1", "source_url": "https://f.example/1", "payload": {"html": "<b>1</b>"}}"#,
                "\n",
                r#"{"external_id": "X2", "source_url": "https://f.example/2", "payload": {"html": "<b>2</b>"}}"#,
                "\n"
            ),
        )
        .unwrap();

        let stats = cmd_crawl(&pipeline, "filefeed", &feed, false).await.unwrap();
        assert_eq!(stats.snapshots_new, 2);
        assert_eq!(stats.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cmd_crawl_missing_file() {
        let (db, tmp) = setup_test_db().await;
        add_source(&db, "nofile", 70).await;
        let pipeline = Pipeline::new(db.clone(), Config::default());

        let result = cmd_crawl(&pipeline, "nofile", &tmp.path().join("absent.jsonl"), false).await;
        assert!(matches!(result, Err(crate::error::Error::Io(_))));
        // no run was opened for an unreadable feed
        let source = db.resolve_source("nofile").await.unwrap();
        assert!(db.get_latest_run(&source.id).await.unwrap().is_none());
    }
}
