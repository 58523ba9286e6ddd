use crate::job::{JobOutcome, JobStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Overall {
    AllSucceeded,
    SomeFailed,
    AllFailed,
}

/// Final result of one batch. Outcomes are in job-submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub outcomes: Vec<JobOutcome>,
    pub overall: Overall,
}

impl BatchResult {
    pub fn failed(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Reduce per-job outcomes into the batch verdict. Pure; an empty batch is
/// vacuously `AllSucceeded`.
pub fn aggregate(outcomes: Vec<JobOutcome>) -> BatchResult {
    let total = outcomes.len();
    let failed = outcomes.iter().filter(|o| !o.is_success()).count();

    let overall = if failed == 0 {
        Overall::AllSucceeded
    } else if failed == total {
        Overall::AllFailed
    } else {
        Overall::SomeFailed
    };

    BatchResult { outcomes, overall }
}

/// One line per job plus a totals line, for the log and stdout.
pub fn render_summary(result: &BatchResult) -> String {
    let mut out = String::new();
    for o in &result.outcomes {
        let line = match o.status {
            JobStatus::Success => format!("app {}: ok\n", o.job.app_id),
            JobStatus::Failed => format!("app {}: FAILED (exit {})\n", o.job.app_id, o.exit_code),
        };
        out.push_str(&line);
    }
    let failed = result.failed().count();
    out.push_str(&format!(
        "{} total, {} ok, {} failed ({:?})",
        result.outcomes.len(),
        result.outcomes.len() - failed,
        failed,
        result.overall
    ));
    out
}
