//! Signal review workflow
//!
//! OPEN -> UNDER_REVIEW -> CONFIRMED | DISMISSED. Terminal states accept no
//! further transitions. Every accepted transition is a compare-and-swap on
//! the signal's current status plus an audit row, written together.

use crate::error::{Error, Result};
use crate::meta::{now_rfc3339, MetaDb, Signal, SignalStatus, SignalTransition};
use tracing::info;

/// Every legal (from, to) pair
pub const TRANSITIONS: &[(SignalStatus, SignalStatus)] = &[
    (SignalStatus::Open, SignalStatus::UnderReview),
    (SignalStatus::UnderReview, SignalStatus::Confirmed),
    (SignalStatus::UnderReview, SignalStatus::Dismissed),
];

pub fn can_transition(from: SignalStatus, to: SignalStatus) -> bool {
    TRANSITIONS.contains(&(from, to))
}

/// States reachable in one step from `from`
pub fn allowed_transitions(from: SignalStatus) -> Vec<SignalStatus> {
    TRANSITIONS
        .iter()
        .filter(|(f, _)| *f == from)
        .map(|(_, t)| *t)
        .collect()
}

pub fn is_terminal(status: SignalStatus) -> bool {
    allowed_transitions(status).is_empty()
}

#[derive(Clone)]
pub struct ReviewWorkflow {
    db: MetaDb,
}

impl ReviewWorkflow {
    pub fn new(db: MetaDb) -> Self {
        Self { db }
    }

    /// Move a signal to `to` on behalf of `actor_id`
    pub async fn transition(
        &self,
        signal_id: &str,
        to: SignalStatus,
        actor_id: &str,
    ) -> Result<Signal> {
        let actor_id = actor_id.trim();
        if actor_id.is_empty() {
            return Err(Error::Validation("actor id must not be empty".to_string()));
        }

        let signal = self.load(signal_id).await?;
        let from = signal.get_status()?;
        if !can_transition(from, to) {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let swapped = self
            .db
            .compare_and_set_signal_status(signal_id, from, to, actor_id, &now_rfc3339())
            .await?;
        if !swapped {
            // Someone else moved it first; report what they left behind
            let current = self.load(signal_id).await?;
            return Err(Error::InvalidTransition {
                from: current.status,
                to: to.to_string(),
            });
        }

        info!(signal = %signal_id, %from, %to, actor = %actor_id, "Signal transitioned");
        self.load(signal_id).await
    }

    /// Audit trail of a signal, oldest first
    pub async fn history(&self, signal_id: &str) -> Result<Vec<SignalTransition>> {
        self.load(signal_id).await?;
        self.db.list_transitions(signal_id).await
    }

    async fn load(&self, signal_id: &str) -> Result<Signal> {
        self.db
            .get_signal(signal_id)
            .await?
            .ok_or_else(|| Error::not_found("Signal", signal_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::SignalDraft;
    use crate::meta::tests::{setup_test_db, stored_listing};
    use crate::meta::{Severity, SignalType};
    use serde_json::json;

    const ALL: [SignalStatus; 4] = [
        SignalStatus::Open,
        SignalStatus::UnderReview,
        SignalStatus::Confirmed,
        SignalStatus::Dismissed,
    ];

    async fn open_signal(db: &MetaDb) -> Signal {
        let listing = stored_listing(db, "reviewed").await;
        let signal = SignalDraft {
            signal_type: SignalType::DuplicateListing,
            severity: Severity::Warning,
            observed_listing_id: listing.id,
            matched_listing_id: None,
            payload: json!({}),
        }
        .into_signal();
        db.record_signals(vec![signal], false)
            .await
            .unwrap()
            .remove(0)
    }

    #[test]
    fn test_transition_graph() {
        assert!(can_transition(SignalStatus::Open, SignalStatus::UnderReview));
        assert!(!can_transition(SignalStatus::Open, SignalStatus::Confirmed));
        assert!(is_terminal(SignalStatus::Confirmed));
        assert!(is_terminal(SignalStatus::Dismissed));
        assert!(!is_terminal(SignalStatus::UnderReview));

        // nothing re-enters OPEN, nothing leaves a terminal state
        for from in ALL {
            assert!(!can_transition(from, SignalStatus::Open));
            if is_terminal(from) {
                for to in ALL {
                    assert!(!can_transition(from, to));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_review_happy_path_and_audit() {
        let (db, _tmp) = setup_test_db().await;
        let signal = open_signal(&db).await;
        let workflow = ReviewWorkflow::new(db.clone());

        let reviewing = workflow
            .transition(&signal.id, SignalStatus::UnderReview, "analyst-1")
            .await
            .unwrap();
        assert_eq!(reviewing.get_status().unwrap(), SignalStatus::UnderReview);
        assert_eq!(reviewing.updated_by.as_deref(), Some("analyst-1"));

        let confirmed = workflow
            .transition(&signal.id, SignalStatus::Confirmed, "analyst-2")
            .await
            .unwrap();
        assert_eq!(confirmed.get_status().unwrap(), SignalStatus::Confirmed);

        let history = workflow.history(&signal.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from_status, "OPEN");
        assert_eq!(history[1].to_status, "CONFIRMED");
        assert_eq!(history[1].actor_id, "analyst-2");

        let err = workflow
            .transition(&signal.id, SignalStatus::Dismissed, "analyst-3")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { ref from, .. } if from == "CONFIRMED"));
    }

    #[tokio::test]
    async fn test_illegal_and_unknown() {
        let (db, _tmp) = setup_test_db().await;
        let signal = open_signal(&db).await;
        let workflow = ReviewWorkflow::new(db.clone());

        assert!(matches!(
            workflow
                .transition(&signal.id, SignalStatus::Confirmed, "a")
                .await,
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            workflow
                .transition("missing", SignalStatus::UnderReview, "a")
                .await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            workflow
                .transition(&signal.id, SignalStatus::UnderReview, "  ")
                .await,
            Err(Error::Validation(_))
        ));
        assert!(db.list_transitions(&signal.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lost_race_names_current_status() {
        let (db, _tmp) = setup_test_db().await;
        let signal = open_signal(&db).await;
        let workflow = ReviewWorkflow::new(db.clone());
        workflow
            .transition(&signal.id, SignalStatus::UnderReview, "a")
            .await
            .unwrap();

        let (x, y) = tokio::join!(
            workflow.transition(&signal.id, SignalStatus::Confirmed, "x"),
            workflow.transition(&signal.id, SignalStatus::Dismissed, "y"),
        );
        let (winner, loser) = match (x, y) {
            (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
            other => panic!("expected exactly one winner, got {:?}", other),
        };
        match loser {
            Error::InvalidTransition { from, .. } => assert_eq!(from, winner.status),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(db.list_transitions(&signal.id).await.unwrap().len(), 2);
    }
}
