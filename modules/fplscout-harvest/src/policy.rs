//! Pure fetch decisions: which endpoint, which header profile, how long to
//! wait. No I/O: the runner feeds it the job's attempt history and a pool
//! snapshot and acts on the result.

use std::time::Duration;

use rand::Rng;

use fplscout_common::backoff::{delay_for_attempt, BackoffConfig};
use fplscout_common::types::AttemptRecord;

use crate::endpoints::{EndpointSnapshot, Health};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub endpoint_id: usize,
    pub profile_idx: usize,
    pub delay: Duration,
    /// Set when every endpoint was blocked and the least-recently-failed one
    /// was selected anyway. Callers should log and proceed.
    pub degraded: bool,
}

/// Decide the next attempt for a job. Blocked endpoints are never selected
/// while a usable one exists; when everything is blocked the least-recently-
/// failed endpoint is pressed into service with the degraded flag set. The
/// header profile always differs from the immediately preceding attempt's
/// (pool size permitting), and the delay is randomized exponential backoff
/// seeded by the attempt count.
pub fn decide(
    attempts: &[AttemptRecord],
    pool: &[EndpointSnapshot],
    profile_count: usize,
    backoff: &BackoffConfig,
) -> Decision {
    assert!(!pool.is_empty(), "endpoint pool must not be empty");
    assert!(profile_count > 0, "header profile pool must not be empty");

    let mut usable: Vec<&EndpointSnapshot> =
        pool.iter().filter(|s| s.health != Health::Blocked).collect();

    let (endpoint_id, degraded) = if usable.is_empty() {
        // Everything is blocked: pick the endpoint whose last failure is
        // oldest and signal degradation upward.
        let pick = pool
            .iter()
            .min_by_key(|s| s.last_failure)
            .expect("pool is non-empty");
        (pick.id, true)
    } else {
        usable.sort_by_key(|s| {
            (
                match s.health {
                    Health::Alive => 0u8,
                    Health::Degraded => 1,
                    Health::Blocked => 2,
                },
                s.consecutive_failures,
                s.last_used,
            )
        });
        (usable[0].id, false)
    };

    let previous_profile = attempts.last().map(|a| a.profile_idx);
    let mut profile_idx = rand::rng().random_range(0..profile_count);
    if profile_count > 1 && Some(profile_idx) == previous_profile {
        profile_idx = (profile_idx + 1) % profile_count;
    }

    Decision {
        endpoint_id,
        profile_idx,
        delay: delay_for_attempt(attempts.len() as u32, backoff),
        degraded,
    }
}
