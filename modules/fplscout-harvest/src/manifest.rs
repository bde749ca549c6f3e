//! Per-run manifest: persisted JSON record of what failed and why.
//!
//! Every run writes `{DATA_DIR}/harvest-runs/{run_id}.json` with the run
//! stats plus each failed job's full attempt history, so an operator can
//! tell a blocked endpoint from a broken parser without rerunning anything.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use fplscout_common::types::{AttemptRecord, JobSpec};

use crate::harvest::HarvestStats;

#[derive(Debug, Serialize)]
pub struct FailedJob {
    #[serde(flatten)]
    pub spec: JobSpec,
    pub error: String,
    pub attempts: Vec<AttemptRecord>,
}

pub struct RunManifest {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    failed: Vec<FailedJob>,
    cancelled: Vec<JobSpec>,
}

impl RunManifest {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            failed: Vec::new(),
            cancelled: Vec::new(),
        }
    }

    pub fn record_failure(&mut self, spec: JobSpec, error: String, attempts: Vec<AttemptRecord>) {
        self.failed.push(FailedJob {
            spec,
            error,
            attempts,
        });
    }

    pub fn record_cancelled(&mut self, spec: JobSpec) {
        self.cancelled.push(spec);
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.len()
    }

    /// Serialize the manifest to JSON and write it to disk. Returns the
    /// file path on success.
    pub fn save(&self, stats: &HarvestStats, data_dir: &Path) -> Result<PathBuf> {
        let dir = data_dir.join("harvest-runs");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", self.run_id));

        let output = SerializedManifest {
            run_id: &self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            stats,
            failed_jobs: &self.failed,
            cancelled_jobs: &self.cancelled,
        };
        std::fs::write(&path, serde_json::to_string_pretty(&output)?)?;
        info!(
            path = %path.display(),
            failed = self.failed.len(),
            cancelled = self.cancelled.len(),
            "Run manifest saved"
        );
        Ok(path)
    }
}

impl Default for RunManifest {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct SerializedManifest<'a> {
    run_id: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    stats: &'a HarvestStats,
    failed_jobs: &'a [FailedJob],
    cancelled_jobs: &'a [JobSpec],
}
