//! Shared egress-path health state. One pool instance lives for the whole
//! run and is shared by every concurrent job; each report is one atomic
//! update under the mutex so readers never see a torn endpoint record.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use fplscout_common::types::AttemptOutcome;

/// Consecutive striking failures before an endpoint is taken out of rotation.
const BLOCK_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointKind {
    Direct,
    Proxy(String),
}

impl EndpointKind {
    /// `"direct"` is the unproxied path; anything else is a proxy URL.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("direct") {
            EndpointKind::Direct
        } else {
            EndpointKind::Proxy(raw.to_string())
        }
    }

    pub fn label(&self) -> &str {
        match self {
            EndpointKind::Direct => "direct",
            EndpointKind::Proxy(url) => url.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Alive,
    /// Recent failures, or cooled down from a block and awaiting a
    /// successful probe.
    Degraded,
    Blocked,
}

/// Read-only view of one endpoint, taken under the pool lock.
#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
    pub id: usize,
    pub health: Health,
    pub last_used: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Default)]
struct EndpointState {
    last_used: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    blocked_until: Option<DateTime<Utc>>,
}

impl EndpointState {
    fn health(&self, now: DateTime<Utc>) -> Health {
        match self.blocked_until {
            Some(until) if now < until => Health::Blocked,
            // Cooldown elapsed: eligible for a probe, but not alive until a
            // success is actually reported.
            Some(_) => Health::Degraded,
            None if self.consecutive_failures > 0 => Health::Degraded,
            None => Health::Alive,
        }
    }
}

pub struct EndpointPool {
    kinds: Vec<EndpointKind>,
    cooldown: chrono::Duration,
    states: Mutex<Vec<EndpointState>>,
}

impl EndpointPool {
    pub fn new(kinds: Vec<EndpointKind>, cooldown: Duration) -> Self {
        let states = kinds.iter().map(|_| EndpointState::default()).collect();
        Self {
            kinds,
            cooldown: chrono::Duration::from_std(cooldown)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            states: Mutex::new(states),
        }
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn kind(&self, id: usize) -> &EndpointKind {
        &self.kinds[id]
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<EndpointSnapshot> {
        let states = self.states.lock().expect("endpoint pool lock poisoned");
        states
            .iter()
            .enumerate()
            .map(|(id, s)| EndpointSnapshot {
                id,
                health: s.health(now),
                last_used: s.last_used,
                last_failure: s.last_failure,
                consecutive_failures: s.consecutive_failures,
            })
            .collect()
    }

    pub fn mark_used(&self, id: usize, now: DateTime<Utc>) {
        let mut states = self.states.lock().expect("endpoint pool lock poisoned");
        if let Some(s) = states.get_mut(id) {
            s.last_used = Some(now);
        }
    }

    /// Fold one attempt outcome into the endpoint's health. A success fully
    /// rehabilitates the endpoint; striking failures accumulate and the
    /// third in a row blocks it for the cooldown window.
    pub fn report(&self, id: usize, outcome: AttemptOutcome, now: DateTime<Utc>) {
        let mut states = self.states.lock().expect("endpoint pool lock poisoned");
        let Some(s) = states.get_mut(id) else {
            return;
        };

        if outcome == AttemptOutcome::Success {
            if s.blocked_until.is_some() || s.consecutive_failures > 0 {
                info!(endpoint = self.kinds[id].label(), "Endpoint recovered");
            }
            s.consecutive_failures = 0;
            s.blocked_until = None;
            return;
        }

        if !outcome.strikes_endpoint() {
            return;
        }

        s.consecutive_failures += 1;
        s.last_failure = Some(now);
        let already_blocked = s.blocked_until.is_some_and(|until| now < until);
        if s.consecutive_failures >= BLOCK_THRESHOLD && !already_blocked {
            // Covers both the third strike and a failed probe after cooldown.
            s.blocked_until = Some(now + self.cooldown);
            warn!(
                endpoint = self.kinds[id].label(),
                failures = s.consecutive_failures,
                cooldown_secs = self.cooldown.num_seconds(),
                "Endpoint blocked after consecutive failures"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn pool(n: usize) -> EndpointPool {
        let kinds = (0..n)
            .map(|i| {
                if i == 0 {
                    EndpointKind::Direct
                } else {
                    EndpointKind::Proxy(format!("http://proxy{i}.example:8080"))
                }
            })
            .collect();
        EndpointPool::new(kinds, Duration::from_secs(300))
    }

    #[test]
    fn three_consecutive_failures_block() {
        let p = pool(1);
        let now = Utc::now();
        p.report(0, AttemptOutcome::Timeout, now);
        p.report(0, AttemptOutcome::Connection, now);
        assert_eq!(p.snapshot(now)[0].health, Health::Degraded);
        p.report(0, AttemptOutcome::Blocked, now);
        assert_eq!(p.snapshot(now)[0].health, Health::Blocked);
    }

    #[test]
    fn one_success_resets_failure_count() {
        let p = pool(1);
        let now = Utc::now();
        p.report(0, AttemptOutcome::Timeout, now);
        p.report(0, AttemptOutcome::Timeout, now);
        p.report(0, AttemptOutcome::Success, now);
        let snap = p.snapshot(now);
        assert_eq!(snap[0].consecutive_failures, 0);
        assert_eq!(snap[0].health, Health::Alive);
    }

    #[test]
    fn non_striking_outcomes_do_not_accumulate() {
        let p = pool(1);
        let now = Utc::now();
        for _ in 0..5 {
            p.report(0, AttemptOutcome::ParseError, now);
            p.report(0, AttemptOutcome::RateLimited, now);
        }
        assert_eq!(p.snapshot(now)[0].health, Health::Alive);
    }

    #[test]
    fn cooldown_expiry_degrades_instead_of_reviving() {
        let p = pool(1);
        let now = Utc::now();
        for _ in 0..3 {
            p.report(0, AttemptOutcome::Timeout, now);
        }
        assert_eq!(p.snapshot(now)[0].health, Health::Blocked);

        // One cooldown later the endpoint is a probe candidate, not alive.
        let later = now + chrono::Duration::seconds(301);
        assert_eq!(p.snapshot(later)[0].health, Health::Degraded);

        // Only a reported success flips it back to alive.
        p.report(0, AttemptOutcome::Success, later);
        assert_eq!(p.snapshot(later)[0].health, Health::Alive);
    }

    #[test]
    fn random_outcome_sequences_preserve_counter_invariants() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let p = pool(1);
            let mut expected: u32 = 0;
            let now = Utc::now();
            for _ in 0..rng.random_range(1..40) {
                let outcome = match rng.random_range(0..4) {
                    0 => AttemptOutcome::Success,
                    1 => AttemptOutcome::Timeout,
                    2 => AttemptOutcome::Blocked,
                    _ => AttemptOutcome::Connection,
                };
                p.report(0, outcome, now);
                expected = if outcome == AttemptOutcome::Success {
                    0
                } else {
                    expected + 1
                };
                let snap = &p.snapshot(now)[0];
                assert_eq!(snap.consecutive_failures, expected);
                if expected >= 3 {
                    assert_eq!(snap.health, Health::Blocked);
                }
                if expected == 0 {
                    assert_eq!(snap.health, Health::Alive);
                }
            }
        }
    }
}
