//! Signal detection and review commands

use crate::error::Result;
use crate::meta::{MetaDb, Signal, SignalFilter, SignalStatus, SignalTransition};
use crate::pipeline::Pipeline;
use crate::review::allowed_transitions;
use tracing::info;

/// Re-run detection for a stored listing
pub async fn cmd_detect(pipeline: &Pipeline, listing_id: &str) -> Result<Vec<Signal>> {
    let signals = pipeline
        .detector
        .detect_for_listing(
            &pipeline.db,
            listing_id,
            pipeline.config.pipeline.dedupe_signals,
        )
        .await?;
    info!(listing = %listing_id, raised = signals.len(), "Detection finished");
    Ok(signals)
}

pub async fn cmd_list_signals(db: &MetaDb, filter: &SignalFilter) -> Result<Vec<Signal>> {
    db.list_signals(filter).await
}

/// Move a signal through the review workflow
pub async fn cmd_review(
    pipeline: &Pipeline,
    signal_id: &str,
    to: SignalStatus,
    actor_id: &str,
) -> Result<Signal> {
    pipeline.review.transition(signal_id, to, actor_id).await
}

pub async fn cmd_history(pipeline: &Pipeline, signal_id: &str) -> Result<Vec<SignalTransition>> {
    pipeline.review.history(signal_id).await
}

pub fn print_signals(signals: &[Signal]) {
    if signals.is_empty() {
        println!("No signals found.");
        return;
    }

    for s in signals {
        println!("• [{}] {} ({})", s.severity, s.signal_type, s.status);
        println!("  ID: {}", s.id);
        println!("  Listing: {}", s.observed_listing_id);
        if let Some(ref matched) = s.matched_listing_id {
            println!("  Matched: {}", matched);
        }
        if let Some(details) = s.payload().get("details") {
            println!("  Details: {}", details);
        }
        if let Ok(status) = s.get_status() {
            let next: Vec<String> = allowed_transitions(status)
                .iter()
                .map(|t| t.to_string())
                .collect();
            if !next.is_empty() {
                println!("  Next: {}", next.join(" | "));
            }
        }
        println!();
    }
}

pub fn print_transitions(transitions: &[SignalTransition]) {
    if transitions.is_empty() {
        println!("No transitions recorded.");
        return;
    }
    for t in transitions {
        println!(
            "{}  {} -> {}  by {}",
            t.created_at, t.from_status, t.to_status, t.actor_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Error;
    use crate::meta::tests::{add_source, setup_test_db};
    use crate::meta::SignalType;

    const ITEM: &str = r#"{"external_id": "E1", "source_url": "https://x.example/E1", "payload": {"html": "<p>100 Main</p>"}, "fields": {"address": {"street": "100 Main St", "city": "Minneapolis", "state": "MN", "zip": "55401"}, "lat": 44.97794, "lng": -93.26517, "image_hashes": ["aa11"]}}"#;

    #[tokio::test]
    async fn test_detect_list_review_history() {
        let (db, _tmp) = setup_test_db().await;
        add_source(&db, "first", 80).await;
        add_source(&db, "second", 80).await;
        let pipeline = Pipeline::new(db.clone(), Config::default());

        pipeline.ingest_feed("first", ITEM, None).await.unwrap();
        let stats = pipeline.ingest_feed("second", ITEM, None).await.unwrap();
        assert_eq!(stats.listings_matched, 1);

        let filter = SignalFilter {
            signal_type: Some(SignalType::DuplicateListing),
            ..Default::default()
        };
        let signals = cmd_list_signals(&db, &filter).await.unwrap();
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];

        // dedupe keeps a second detection pass from adding rows
        let again = cmd_detect(&pipeline, &signal.observed_listing_id).await.unwrap();
        assert!(again.is_empty());

        let reviewed = cmd_review(&pipeline, &signal.id, SignalStatus::UnderReview, "analyst")
            .await
            .unwrap();
        assert_eq!(reviewed.status, "UNDER_REVIEW");
        cmd_review(&pipeline, &signal.id, SignalStatus::Confirmed, "analyst")
            .await
            .unwrap();

        assert!(matches!(
            cmd_review(&pipeline, &signal.id, SignalStatus::Dismissed, "analyst").await,
            Err(Error::InvalidTransition { .. })
        ));

        let history = cmd_history(&pipeline, &signal.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].to_status, "CONFIRMED");
    }

    #[tokio::test]
    async fn test_detect_unknown_listing() {
        let (db, _tmp) = setup_test_db().await;
        let pipeline = Pipeline::new(db, Config::default());
        assert!(matches!(
            cmd_detect(&pipeline, "missing").await,
            Err(Error::NotFound { .. })
        ));
    }
}
