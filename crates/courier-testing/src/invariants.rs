//! Invariant checks over stored attempts.
//!
//! Each check inspects a snapshot of attempts and fails with a description
//! of the first violation found.

use std::collections::HashMap;

use anyhow::{ensure, Result};
use courier_core::models::{AttemptStatus, EventId, WebhookAttempt, WebhookId};

/// Delivery invariants that must hold after any sequence of operations.
pub struct Invariants;

impl Invariants {
    /// At most one attempt per webhook is in flight.
    pub fn single_delivering_per_webhook(attempts: &[WebhookAttempt]) -> Result<()> {
        let mut in_flight: HashMap<WebhookId, usize> = HashMap::new();
        for attempt in attempts.iter().filter(|a| a.status == AttemptStatus::Delivering) {
            *in_flight.entry(attempt.webhook_id).or_default() += 1;
        }
        for (webhook_id, count) in in_flight {
            ensure!(count <= 1, "webhook {webhook_id} has {count} attempts in flight");
        }
        Ok(())
    }

    /// Every chain is numbered 0..n without gaps, has no attempt after a
    /// success or an exhausted attempt, and only its newest attempt may be
    /// unfinished.
    pub fn chains_well_formed(attempts: &[WebhookAttempt]) -> Result<()> {
        for ((webhook_id, event_id), chain) in chains(attempts) {
            for (expected, attempt) in chain.iter().enumerate() {
                ensure!(
                    attempt.attempt_number as usize == expected,
                    "chain {webhook_id}/{event_id} has attempt {} at position {expected}",
                    attempt.attempt_number
                );
            }

            let Some((last, earlier)) = chain.split_last() else {
                continue;
            };
            for attempt in earlier {
                ensure!(
                    attempt.status == AttemptStatus::Failed && !attempt.exhausted,
                    "chain {webhook_id}/{event_id} continues after attempt {} ({})",
                    attempt.attempt_number,
                    attempt.status
                );
            }
            if last.exhausted {
                ensure!(
                    last.status == AttemptStatus::Failed,
                    "exhausted attempt {} of {webhook_id}/{event_id} is {}",
                    last.attempt_number,
                    last.status
                );
            }
        }
        Ok(())
    }

    /// No chain holds more than `max_retries + 1` attempts.
    pub fn retries_bounded(attempts: &[WebhookAttempt], max_retries: u32) -> Result<()> {
        for ((webhook_id, event_id), chain) in chains(attempts) {
            ensure!(
                chain.len() <= max_retries as usize + 1,
                "chain {webhook_id}/{event_id} has {} attempts, budget is {}",
                chain.len(),
                max_retries + 1
            );
        }
        Ok(())
    }

    /// Successors are never scheduled before their predecessor completed.
    pub fn successors_follow_completion(attempts: &[WebhookAttempt]) -> Result<()> {
        for ((webhook_id, event_id), chain) in chains(attempts) {
            for pair in chain.windows(2) {
                let Some(completed_at) = pair[0].completed_at else {
                    anyhow::bail!(
                        "attempt {} of {webhook_id}/{event_id} has a successor but never completed",
                        pair[0].attempt_number
                    );
                };
                ensure!(
                    pair[1].scheduled_at >= completed_at,
                    "attempt {} of {webhook_id}/{event_id} scheduled before its predecessor completed",
                    pair[1].attempt_number
                );
            }
        }
        Ok(())
    }

    /// Runs every check.
    pub fn check_all(attempts: &[WebhookAttempt]) -> Result<()> {
        Self::single_delivering_per_webhook(attempts)?;
        Self::chains_well_formed(attempts)?;
        Self::successors_follow_completion(attempts)
    }
}

fn chains(attempts: &[WebhookAttempt]) -> HashMap<(WebhookId, EventId), Vec<&WebhookAttempt>> {
    let mut chains: HashMap<(WebhookId, EventId), Vec<&WebhookAttempt>> = HashMap::new();
    for attempt in attempts {
        chains.entry((attempt.webhook_id, attempt.event_id)).or_default().push(attempt);
    }
    for chain in chains.values_mut() {
        chain.sort_by_key(|a| a.attempt_number);
    }
    chains
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::fixtures::WebhookBuilder;

    fn chain(statuses: &[AttemptStatus]) -> Vec<WebhookAttempt> {
        let webhook = WebhookBuilder::new("https://example.com/hook").build();
        let event_id = EventId::new();
        let now = Utc::now();
        statuses
            .iter()
            .enumerate()
            .map(|(n, status)| {
                let mut attempt = WebhookAttempt::pending(
                    &webhook,
                    event_id,
                    "order.paid",
                    json!({}),
                    now,
                    n as u32,
                    now,
                    now,
                );
                attempt.status = *status;
                if status.is_terminal() {
                    attempt.completed_at = Some(now);
                }
                attempt
            })
            .collect()
    }

    #[test]
    fn accepts_failed_then_pending_chain() {
        let attempts = chain(&[AttemptStatus::Failed, AttemptStatus::Failed, AttemptStatus::Pending]);
        Invariants::check_all(&attempts).unwrap();
        Invariants::retries_bounded(&attempts, 2).unwrap();
    }

    #[test]
    fn rejects_attempt_after_success() {
        let attempts = chain(&[AttemptStatus::Success, AttemptStatus::Pending]);
        assert!(Invariants::chains_well_formed(&attempts).is_err());
    }

    #[test]
    fn rejects_gaps_in_numbering() {
        let mut attempts = chain(&[AttemptStatus::Failed, AttemptStatus::Pending]);
        attempts[1].attempt_number = 2;
        assert!(Invariants::chains_well_formed(&attempts).is_err());
    }

    #[test]
    fn rejects_two_in_flight_for_one_webhook() {
        let mut attempts = chain(&[AttemptStatus::Delivering]);
        let mut other_event = chain(&[AttemptStatus::Delivering]);
        other_event[0].webhook_id = attempts[0].webhook_id;
        attempts.append(&mut other_event);
        assert!(Invariants::single_delivering_per_webhook(&attempts).is_err());
    }

    #[test]
    fn rejects_chain_over_budget() {
        let attempts = chain(&[AttemptStatus::Failed, AttemptStatus::Failed, AttemptStatus::Failed]);
        assert!(Invariants::retries_bounded(&attempts, 1).is_err());
    }
}
