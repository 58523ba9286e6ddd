use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One unit of work: a Steam app id and the directory it installs into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub app_id: u32,
    pub dest: PathBuf,
}

impl Job {
    /// Destination is always `install_root/<app_id>` so re-runs update the
    /// same directory in place.
    pub fn new(app_id: u32, install_root: &Path) -> Self {
        Self {
            app_id,
            dest: install_root.join(app_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Success,
    Failed,
}

/// Per-job record produced by the executor. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job: Job,
    pub status: JobStatus,
    pub exit_code: i32,
    pub log: String,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

/// Expand the given app ids over an install root, preserving input order.
pub fn build_jobs(app_ids: &[u32], install_root: &Path) -> Vec<Job> {
    app_ids.iter().map(|&id| Job::new(id, install_root)).collect()
}
