//! Drives one job through fetch → parse → validate with retry and backoff.
//!
//! The retry loop is an explicit state machine over the job's attempt
//! history rather than nested sleeps, so tests can drive it with a
//! recording sleeper and a scripted transport, with no real time or network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use fplscout_common::backoff::BackoffConfig;
use fplscout_common::error::FetchError;
use fplscout_common::types::{AttemptOutcome, AttemptRecord, JobSpec, JobStatus, RawRecord};

use crate::endpoints::EndpointPool;
use crate::parser;
use crate::policy;
use crate::transport::Transport;

/// Delay abstraction so backoff can be observed instead of slept in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Run-level cancellation signal. Flipping it stops new fetches promptly;
/// in-flight fetches finish or time out on their own.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Succeeded(Vec<RawRecord>),
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
pub struct FinishedJob {
    pub spec: JobSpec,
    pub status: JobStatus,
    pub attempts: Vec<AttemptRecord>,
    pub outcome: JobOutcome,
}

pub struct JobRunner {
    pub transport: Arc<dyn Transport>,
    pub pool: Arc<EndpointPool>,
    pub profiles: Arc<Vec<String>>,
    pub backoff: BackoffConfig,
    pub max_attempts: u32,
    pub sleeper: Arc<dyn Sleeper>,
    pub cancel: CancelFlag,
}

impl JobRunner {
    /// Execute one job to a terminal state. The runner owns the job until
    /// it returns; the attempt history is complete in every outcome.
    pub async fn run(&self, spec: JobSpec, url: String) -> FinishedJob {
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        // Floor on the next delay when the upstream mandated a wait.
        let mut mandated: Option<Duration> = None;

        loop {
            if self.cancel.is_cancelled() {
                return FinishedJob {
                    spec,
                    status: JobStatus::Pending,
                    attempts,
                    outcome: JobOutcome::Cancelled,
                };
            }

            let decision = policy::decide(
                &attempts,
                &self.pool.snapshot(Utc::now()),
                self.profiles.len(),
                &self.backoff,
            );
            if decision.degraded {
                warn!(
                    target = %spec.target,
                    "All endpoints blocked; proceeding on least-recently-failed"
                );
            }

            let mut delay = decision.delay;
            if let Some(wait) = mandated.take() {
                delay = delay.max(wait);
            }
            if !delay.is_zero() {
                self.sleeper.sleep(delay).await;
            }
            if self.cancel.is_cancelled() {
                return FinishedJob {
                    spec,
                    status: JobStatus::Pending,
                    attempts,
                    outcome: JobOutcome::Cancelled,
                };
            }

            let now = Utc::now();
            self.pool.mark_used(decision.endpoint_id, now);
            let user_agent = &self.profiles[decision.profile_idx];
            let started = std::time::Instant::now();

            let fetched = self
                .transport
                .fetch(&url, self.pool.kind(decision.endpoint_id), user_agent)
                .await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match fetched {
                Ok(body) => match parser::parse(spec.source, &spec.target, &body) {
                    Ok(records) => {
                        attempts.push(AttemptRecord {
                            endpoint_id: decision.endpoint_id,
                            profile_idx: decision.profile_idx,
                            outcome: AttemptOutcome::Success,
                            latency_ms,
                            at: Utc::now(),
                        });
                        self.pool
                            .report(decision.endpoint_id, AttemptOutcome::Success, Utc::now());
                        info!(
                            target = %spec.target,
                            records = records.len(),
                            attempts = attempts.len(),
                            "Job succeeded"
                        );
                        return FinishedJob {
                            spec,
                            status: JobStatus::Succeeded,
                            attempts,
                            outcome: JobOutcome::Succeeded(records),
                        };
                    }
                    Err(e) => {
                        // The fetch itself was fine; the endpoint stays
                        // healthy while the anomaly burns an attempt.
                        attempts.push(AttemptRecord {
                            endpoint_id: decision.endpoint_id,
                            profile_idx: decision.profile_idx,
                            outcome: AttemptOutcome::ParseError,
                            latency_ms,
                            at: Utc::now(),
                        });
                        self.pool
                            .report(decision.endpoint_id, AttemptOutcome::Success, Utc::now());
                        warn!(target = %spec.target, error = %e, "Parse anomaly, will retry");
                        if attempts.len() as u32 >= self.max_attempts {
                            return self.fail(spec, attempts, e.to_string());
                        }
                    }
                },
                Err(e) => {
                    let outcome = AttemptOutcome::from_error(&e);
                    attempts.push(AttemptRecord {
                        endpoint_id: decision.endpoint_id,
                        profile_idx: decision.profile_idx,
                        outcome,
                        latency_ms,
                        at: Utc::now(),
                    });
                    self.pool.report(decision.endpoint_id, outcome, Utc::now());
                    mandated = e.mandated_wait();
                    warn!(
                        target = %spec.target,
                        attempt = attempts.len(),
                        error = %e,
                        "Fetch failed"
                    );
                    if !e.is_retryable() || attempts.len() as u32 >= self.max_attempts {
                        return self.fail(spec, attempts, e.to_string());
                    }
                }
            }
        }
    }

    fn fail(&self, spec: JobSpec, attempts: Vec<AttemptRecord>, error: String) -> FinishedJob {
        warn!(
            target = %spec.target,
            attempts = attempts.len(),
            error = error.as_str(),
            "Job failed terminally"
        );
        FinishedJob {
            spec,
            status: JobStatus::Failed,
            attempts,
            outcome: JobOutcome::Failed(error),
        }
    }
}
