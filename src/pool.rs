use crate::installer::Installer;
use crate::job::{Job, JobOutcome, JobStatus};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use tracing::{debug, info, warn};

/// Run every job exactly once on a bounded pool of worker threads and return
/// the outcomes in job-submission order.
///
/// Workers pull from a shared cursor, so a worker that finishes one job
/// immediately claims the next unstarted one. `max_workers` is clamped to the
/// job count (floor 1); a pool of one degrades to sequential execution with
/// no separate code path. Completion order is unconstrained; outcomes carry
/// their submission index and are re-sorted before returning.
pub fn run_batch<I: Installer + ?Sized>(
    installer: &I,
    jobs: &[Job],
    max_workers: usize,
    interactive: bool,
) -> Vec<JobOutcome> {
    if jobs.is_empty() {
        return Vec::new();
    }

    let workers = max_workers.clamp(1, jobs.len());
    info!("dispatching {} jobs across {} workers", jobs.len(), workers);

    let cursor = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(usize, JobOutcome)>();

    std::thread::scope(|scope| {
        for worker in 0..workers {
            let tx = tx.clone();
            let cursor = &cursor;
            scope.spawn(move || {
                loop {
                    let idx = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(job) = jobs.get(idx) else {
                        break;
                    };
                    debug!("worker {worker} picked app {}", job.app_id);
                    let outcome = run_one(installer, job, interactive);
                    // The receiver outlives the scope; send cannot fail while
                    // workers run.
                    let _ = tx.send((idx, outcome));
                }
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<JobOutcome>> = (0..jobs.len()).map(|_| None).collect();
    for (idx, outcome) in rx {
        slots[idx] = Some(outcome);
    }

    // run_one catches panics, so every claimed index was sent exactly once.
    slots
        .into_iter()
        .map(|slot| slot.expect("worker reported an outcome for every job"))
        .collect()
}

/// Execute one job and fold every failure path into data. This boundary never
/// propagates an error or a panic: a spawn failure, provisioning failure,
/// timeout, or installer panic becomes a `Failed` outcome with a descriptive
/// log instead of unwinding the batch.
pub fn run_one<I: Installer + ?Sized>(installer: &I, job: &Job, interactive: bool) -> JobOutcome {
    let result = catch_unwind(AssertUnwindSafe(|| installer.install(job, interactive)));
    match result {
        Err(panic) => {
            let msg = panic_message(&panic);
            warn!("app {} installer panicked: {msg}", job.app_id);
            JobOutcome {
                job: job.clone(),
                status: JobStatus::Failed,
                exit_code: -1,
                log: format!("installer panicked: {msg}"),
            }
        }
        Ok(Ok(run)) => {
            let status = if run.succeeded() {
                info!("app {} updated", job.app_id);
                JobStatus::Success
            } else {
                warn!("app {} failed with exit {}", job.app_id, run.exit_code);
                JobStatus::Failed
            };
            JobOutcome {
                job: job.clone(),
                status,
                exit_code: run.exit_code,
                log: run.log,
            }
        }
        Ok(Err(err)) => {
            warn!("app {} could not be run: {err:#}", job.app_id);
            JobOutcome {
                job: job.clone(),
                status: JobStatus::Failed,
                exit_code: -1,
                log: format!("{err:#}"),
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
