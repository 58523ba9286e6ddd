use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use steamsync::installer::{InstallRun, Installer};
use steamsync::job::{build_jobs, Job, JobStatus};
use steamsync::pool::run_batch;
use steamsync::report::{aggregate, Overall};

/// Deterministic stand-in for the Docker/SteamCMD invocation. Exit codes are
/// fixed per app id; a small sleep shakes up completion order under
/// concurrency.
struct StubInstaller {
    exit_codes: HashMap<u32, i32>,
    delay: Duration,
    launch_error_for: Option<u32>,
    calls: AtomicUsize,
}

impl StubInstaller {
    fn new(exit_codes: &[(u32, i32)]) -> Self {
        Self {
            exit_codes: exit_codes.iter().copied().collect(),
            delay: Duration::from_millis(5),
            launch_error_for: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Installer for StubInstaller {
    fn install(&self, job: &Job, _interactive: bool) -> Result<InstallRun> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        if self.launch_error_for == Some(job.app_id) {
            return Err(anyhow!("container provisioning failed for {}", job.app_id));
        }
        let exit_code = self.exit_codes.get(&job.app_id).copied().unwrap_or(0);
        Ok(InstallRun {
            exit_code,
            log: format!("stub run for {}", job.app_id),
        })
    }
}

fn jobs_for(ids: &[u32]) -> Vec<Job> {
    build_jobs(ids, Path::new("/srv/steam"))
}

#[test]
fn every_job_reported_once_in_input_order() {
    let ids = [77u32, 11, 33, 55, 22, 44, 66];
    let stub = StubInstaller::new(&[]);
    for workers in 1..=ids.len() {
        let outcomes = run_batch(&stub, &jobs_for(&ids), workers, false);
        let got: Vec<u32> = outcomes.iter().map(|o| o.job.app_id).collect();
        assert_eq!(got, ids, "workers={workers}");
    }
}

#[test]
fn sequential_and_parallel_agree() {
    let ids = [1u32, 2, 3, 4, 5];
    let stub = StubInstaller::new(&[(2, 1), (4, 7)]);

    let seq = run_batch(&stub, &jobs_for(&ids), 1, false);
    let par = run_batch(&stub, &jobs_for(&ids), ids.len(), false);

    let seq_codes: Vec<(u32, JobStatus, i32)> =
        seq.iter().map(|o| (o.job.app_id, o.status, o.exit_code)).collect();
    let par_codes: Vec<(u32, JobStatus, i32)> =
        par.iter().map(|o| (o.job.app_id, o.status, o.exit_code)).collect();
    assert_eq!(seq_codes, par_codes);
}

#[test]
fn oversized_pool_is_clamped() {
    let ids = [10u32, 20];
    let stub = StubInstaller::new(&[]);
    let outcomes = run_batch(&stub, &jobs_for(&ids), 64, false);
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_success()));
}

#[test]
fn one_failure_does_not_cancel_siblings() {
    let ids = [10u32, 20, 30];
    let stub = StubInstaller::new(&[(20, 1)]);

    let outcomes = run_batch(&stub, &jobs_for(&ids), 2, false);
    assert_eq!(stub.calls.load(Ordering::SeqCst), 3);

    let result = aggregate(outcomes);
    assert_eq!(result.overall, Overall::SomeFailed);

    let rows: Vec<(u32, JobStatus, i32)> = result
        .outcomes
        .iter()
        .map(|o| (o.job.app_id, o.status, o.exit_code))
        .collect();
    assert_eq!(
        rows,
        vec![
            (10, JobStatus::Success, 0),
            (20, JobStatus::Failed, 1),
            (30, JobStatus::Success, 0),
        ]
    );
}

#[test]
fn launch_failure_becomes_failed_outcome() {
    let ids = [10u32, 20];
    let mut stub = StubInstaller::new(&[]);
    stub.launch_error_for = Some(10);

    let outcomes = run_batch(&stub, &jobs_for(&ids), 2, false);
    assert_eq!(outcomes[0].status, JobStatus::Failed);
    assert_eq!(outcomes[0].exit_code, -1);
    assert!(outcomes[0].log.contains("container provisioning failed"));
    assert!(outcomes[1].is_success());
}

/// A stub whose install panics for one app id.
struct PanickingInstaller {
    panic_for: u32,
}

impl Installer for PanickingInstaller {
    fn install(&self, job: &Job, _interactive: bool) -> Result<InstallRun> {
        if job.app_id == self.panic_for {
            panic!("mount table corrupted");
        }
        Ok(InstallRun {
            exit_code: 0,
            log: String::new(),
        })
    }
}

#[test]
fn installer_panic_becomes_failed_outcome() {
    let ids = [10u32, 20, 30];
    let stub = PanickingInstaller { panic_for: 20 };

    let outcomes = run_batch(&stub, &jobs_for(&ids), 2, false);
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_success());
    assert_eq!(outcomes[1].status, JobStatus::Failed);
    assert_eq!(outcomes[1].exit_code, -1);
    assert!(outcomes[1].log.contains("mount table corrupted"));
    assert!(outcomes[2].is_success());
}

#[test]
fn empty_batch_returns_no_outcomes() {
    let stub = StubInstaller::new(&[]);
    let outcomes = run_batch(&stub, &[], 4, false);
    assert!(outcomes.is_empty());
}

/// A stub that appends to the destination so re-runs are observable.
struct TouchingInstaller;

impl Installer for TouchingInstaller {
    fn install(&self, job: &Job, _interactive: bool) -> Result<InstallRun> {
        std::fs::create_dir_all(&job.dest)?;
        std::fs::write(job.dest.join("manifest.txt"), job.app_id.to_string())?;
        Ok(InstallRun {
            exit_code: 0,
            log: String::new(),
        })
    }
}

#[test]
fn rerun_updates_destination_in_place() {
    let root = temp_root("rerun");
    let jobs = build_jobs(&[4242], &root);

    for _ in 0..2 {
        let outcomes = run_batch(&TouchingInstaller, &jobs, 1, false);
        assert!(outcomes[0].is_success());
    }

    // One destination directory, still holding exactly the stub's manifest.
    let entries: Vec<_> = std::fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("4242")]);
    let manifest = std::fs::read_to_string(root.join("4242").join("manifest.txt")).unwrap();
    assert_eq!(manifest, "4242");

    std::fs::remove_dir_all(&root).ok();
}

fn temp_root(tag: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!(
        "steamsync-test-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&root).unwrap();
    root
}
