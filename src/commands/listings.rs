//! Snapshot and resolution commands

use crate::error::{Error, Result};
use crate::meta::{ObservedListing, Snapshot};
use crate::pipeline::Pipeline;
use crate::resolve::{InputIssue, MatchScore, ParsedFields};
use crate::snapshot::{PutOutcome, PutRequest, SnapshotPayload};
use chrono::Utc;
use serde::Serialize;
use std::path::Path;

/// Options for an ad-hoc put
#[derive(Debug, Clone)]
pub struct PutOptions<'a> {
    pub source_key: &'a str,
    pub external_id: &'a str,
    pub source_url: &'a str,
    pub html_file: Option<&'a Path>,
    pub json_file: Option<&'a Path>,
    pub crawl_run_id: Option<String>,
}

/// Read a payload from an html file, a json file, or both
pub async fn load_payload(
    html_file: Option<&Path>,
    json_file: Option<&Path>,
) -> Result<SnapshotPayload> {
    let html = match html_file {
        Some(path) => Some(tokio::fs::read_to_string(path).await?),
        None => None,
    };
    let json = match json_file {
        Some(path) => {
            let text = tokio::fs::read_to_string(path).await?;
            Some(serde_json::from_str(&text)?)
        }
        None => None,
    };
    Ok(SnapshotPayload { html, json })
}

/// Store one capture outside of a crawl feed
pub async fn cmd_put(pipeline: &Pipeline, options: PutOptions<'_>) -> Result<PutOutcome> {
    let source = pipeline.db.resolve_source(options.source_key).await?;
    let payload = load_payload(options.html_file, options.json_file).await?;
    pipeline
        .snapshots
        .put(PutRequest {
            source_id: source.id,
            external_id: options.external_id.to_string(),
            source_url: options.source_url.to_string(),
            fetched_at: Utc::now(),
            payload,
            crawl_run_id: options.crawl_run_id,
        })
        .await
}

/// Record image enrichment: success when `error` is None
pub async fn cmd_enrich(
    pipeline: &Pipeline,
    snapshot_id: &str,
    error: Option<&str>,
) -> Result<Snapshot> {
    pipeline
        .snapshots
        .mark_enriched(snapshot_id, error.is_none(), error)
        .await
}

/// Capture history of one external listing
pub async fn cmd_snapshot_history(
    pipeline: &Pipeline,
    source_key: &str,
    external_id: &str,
) -> Result<Vec<Snapshot>> {
    let source = pipeline.db.resolve_source(source_key).await?;
    pipeline.snapshots.history(&source.id, external_id).await
}

/// Serializable resolution outcome
#[derive(Debug, Clone, Serialize)]
pub struct ResolveReport {
    pub listing: ObservedListing,
    pub matched: Option<ObservedListing>,
    pub evidence: Option<MatchScore>,
    pub issues: Vec<InputIssue>,
}

/// Resolve a snapshot using extracted fields read from a JSON file
pub async fn cmd_resolve(
    pipeline: &Pipeline,
    snapshot_id: &str,
    fields_file: Option<&Path>,
) -> Result<ResolveReport> {
    let fields: ParsedFields = match fields_file {
        Some(path) => {
            let text = tokio::fs::read_to_string(path).await?;
            serde_json::from_str(&text)?
        }
        None => ParsedFields::default(),
    };

    let resolution = pipeline.resolver.resolve(snapshot_id, &fields).await?;
    Ok(ResolveReport {
        listing: resolution.listing,
        matched: resolution.matched,
        evidence: resolution.evidence,
        issues: resolution.issues,
    })
}

pub async fn cmd_show_listing(pipeline: &Pipeline, listing_id: &str) -> Result<ObservedListing> {
    pipeline
        .db
        .get_listing(listing_id)
        .await?
        .ok_or_else(|| Error::not_found("ObservedListing", listing_id))
}

pub fn print_put_outcome(outcome: &PutOutcome) {
    if outcome.is_new {
        println!("✓ Stored new snapshot {}", outcome.snapshot.id);
    } else {
        println!("= Snapshot unchanged: {}", outcome.snapshot.id);
    }
    println!("  Content hash: {}", outcome.snapshot.content_hash);
}

pub fn print_snapshots(snapshots: &[Snapshot]) {
    if snapshots.is_empty() {
        println!("No snapshots found.");
        return;
    }
    for s in snapshots {
        let enriched = if s.images_enriched { "enriched" } else { "not enriched" };
        println!("• {} fetched {} ({})", s.id, s.fetched_at, enriched);
        println!("  Hash: {}", s.content_hash);
        if let Some(ref err) = s.enrichment_error {
            println!("  Enrichment error: {}", err);
        }
    }
}

pub fn print_listing(listing: &ObservedListing) {
    println!("Listing {}", listing.id);
    println!("  Snapshot: {}", listing.snapshot_id);
    if let Some(ref title) = listing.title {
        println!("  Title: {}", title);
    }
    if let (Some(price), Some(currency)) = (listing.price, listing.currency.as_deref()) {
        println!("  Price: {:.2} {}", price, currency);
    }
    if let Some(ref street) = listing.street {
        println!("  Street: {}", street);
    }
    println!("  Status: {}", listing.status);
    println!(
        "  Fingerprints: geo={} address={} media={}",
        listing.geo_hash.as_deref().unwrap_or("-"),
        listing.address_hash.as_deref().map(short_hash).unwrap_or("-"),
        listing.media_hash.as_deref().map(short_hash).unwrap_or("-"),
    );
    println!("  Confidence: {:.2}", listing.confidence_score);
    match listing.matched_listing_id {
        Some(ref id) => println!("  Matched: {}", id),
        None => println!("  Matched: none"),
    }
}

pub fn print_resolve_report(report: &ResolveReport) {
    print_listing(&report.listing);
    if let Some(ref evidence) = report.evidence {
        let agreed: Vec<&str> = evidence.agreed.iter().map(|k| k.as_str()).collect();
        let disagreed: Vec<&str> = evidence.disagreed.iter().map(|k| k.as_str()).collect();
        println!("  Score: {:.2}", evidence.score);
        println!("  Agreed: {}", agreed.join(", "));
        if !disagreed.is_empty() {
            println!("  Disagreed: {}", disagreed.join(", "));
        }
    }
    for issue in &report.issues {
        println!("  ⚠ {}: {}", issue.field, issue.reason);
    }
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::meta::tests::{add_source, setup_test_db};

    #[tokio::test]
    async fn test_put_resolve_enrich_from_files() {
        let (db, tmp) = setup_test_db().await;
        add_source(&db, "manual", 70).await;
        let pipeline = Pipeline::new(db, Config::default());

        let html = tmp.path().join("page.html");
        std::fs::write(&html, "<h1>12 Birch Ln</h1>").unwrap();
        let fields = tmp.path().join("fields.json");
        std::fs::write(
            &fields,
            r#"{"title": "Cozy", "price": "$250,000", "address": {"street": "12 Birch Ln"}}"#,
        )
        .unwrap();

        let options = PutOptions {
            source_key: "manual",
            external_id: "B12",
            source_url: "https://manual.example/B12",
            html_file: Some(&html),
            json_file: None,
            crawl_run_id: None,
        };
        let put = cmd_put(&pipeline, options.clone()).await.unwrap();
        assert!(put.is_new);
        assert!(!cmd_put(&pipeline, options).await.unwrap().is_new);

        let report = cmd_resolve(&pipeline, &put.snapshot.id, Some(&fields))
            .await
            .unwrap();
        assert_eq!(report.listing.price, Some(250_000.0));
        assert_eq!(report.listing.currency.as_deref(), Some("USD"));
        assert!(report.listing.address_hash.is_some());

        let shown = cmd_show_listing(&pipeline, &report.listing.id).await.unwrap();
        assert_eq!(shown.snapshot_id, put.snapshot.id);

        let enriched = cmd_enrich(&pipeline, &put.snapshot.id, None).await.unwrap();
        assert!(enriched.images_enriched);

        let history = cmd_snapshot_history(&pipeline, "manual", "B12").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short_hash("abc"), "abc");
        assert_eq!(short_hash("0123456789abcdef"), "0123456789ab");
    }
}
