//! Source registry commands

use crate::error::Result;
use crate::meta::{MetaDb, Source, SourceStats, SourceType};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Source information with stats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(flatten)]
    pub source: Source,
    pub stats: SourceStats,
}

/// Register a new source
pub async fn cmd_add_source(
    db: &MetaDb,
    name: &str,
    source_type: SourceType,
    base_url: &str,
    trust_score: i64,
) -> Result<Source> {
    let source = Source::new(name.trim().to_string(), source_type, base_url, trust_score)?;
    db.insert_source(&source).await?;
    info!(source = %source.id, name = %source.name, "Registered source");
    Ok(source)
}

/// List all sources with their stats
pub async fn cmd_list_sources(db: &MetaDb) -> Result<Vec<SourceInfo>> {
    let sources = db.list_sources().await?;
    let mut result = Vec::with_capacity(sources.len());

    for source in sources {
        let stats = db.get_source_stats(&source.id).await?;
        result.push(SourceInfo { source, stats });
    }

    Ok(result)
}

pub async fn cmd_set_source_enabled(db: &MetaDb, key: &str, enabled: bool) -> Result<Source> {
    let source = db.resolve_source(key).await?;
    db.set_source_enabled(&source.id, enabled).await
}

pub async fn cmd_set_source_trust(db: &MetaDb, key: &str, trust_score: i64) -> Result<Source> {
    let source = db.resolve_source(key).await?;
    db.update_source_trust(&source.id, trust_score).await
}

/// Replace a source's opaque crawler config (`None` clears it)
pub async fn cmd_set_source_config(
    db: &MetaDb,
    key: &str,
    config_json: Option<String>,
) -> Result<Source> {
    let source = db.resolve_source(key).await?;
    db.update_source_config(&source.id, config_json).await
}

/// Remove a source; refused while snapshots still reference it
pub async fn cmd_remove_source(db: &MetaDb, key: &str) -> Result<Source> {
    let source = db.resolve_source(key).await?;
    db.delete_source(&source.id).await?;
    info!(source = %source.id, "Removed source");
    Ok(source)
}

/// Print sources list to console
pub fn print_sources(sources: &[SourceInfo]) {
    println!("\n📚 Registered Sources\n");

    if sources.is_empty() {
        println!("No sources registered. Use 'sourceintel source add' to register one.");
        return;
    }

    for info in sources {
        let s = &info.source;
        let state = if s.enabled { "enabled" } else { "disabled" };
        println!("• {} [{}] ({})", s.name, s.source_type, state);
        println!("  ID: {}", s.id);
        println!("  URL: {}", s.base_url);
        println!("  Trust: {}", s.trust_score);
        println!(
            "  Snapshots: {}, Listings: {}, Signals: {}",
            info.stats.snapshot_count, info.stats.listing_count, info.stats.signal_count
        );
        println!();
    }
}
