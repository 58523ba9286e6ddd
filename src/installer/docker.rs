use super::{InstallRun, Installer};
use crate::config::Config;
use crate::job::Job;
use crate::util::ensure_dir;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::io::Read;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Runs SteamCMD inside a disposable container, one container per job.
pub struct DockerInstaller {
    cfg: Config,
}

#[derive(Debug, Clone, Serialize)]
pub struct DockerDiag {
    pub docker_exe: String,
    pub docker_version: Option<String>,
    pub image: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DockerInstaller {
    pub fn new(cfg: &Config) -> Self {
        Self { cfg: cfg.clone() }
    }

    /// Check that the docker client is reachable, for `steamsync doctor`.
    pub fn doctor(&self) -> DockerDiag {
        let out = Command::new(&self.cfg.docker.docker_exe)
            .args(["version", "--format", "{{.Client.Version}}"])
            .output();
        match out {
            Ok(o) if o.status.success() => DockerDiag {
                docker_exe: self.cfg.docker.docker_exe.clone(),
                docker_version: Some(String::from_utf8_lossy(&o.stdout).trim().to_string()),
                image: self.cfg.docker.image.clone(),
                ok: true,
                error: None,
            },
            Ok(o) => DockerDiag {
                docker_exe: self.cfg.docker.docker_exe.clone(),
                docker_version: None,
                image: self.cfg.docker.image.clone(),
                ok: false,
                error: Some(String::from_utf8_lossy(&o.stderr).trim().to_string()),
            },
            Err(e) => DockerDiag {
                docker_exe: self.cfg.docker.docker_exe.clone(),
                docker_version: None,
                image: self.cfg.docker.image.clone(),
                ok: false,
                error: Some(e.to_string()),
            },
        }
    }

    /// Refresh the SteamCMD image before the batch. Pull failure aborts the
    /// batch; pruning leftovers is best-effort housekeeping.
    pub fn prepare(&self) -> Result<()> {
        if !self.cfg.docker.pull_before_run {
            debug!("image pull disabled by config");
            return Ok(());
        }

        info!("pulling image {}", self.cfg.docker.image);
        let mut cmd = Command::new(&self.cfg.docker.docker_exe);
        cmd.args(["pull", &self.cfg.docker.image]);
        let out = self
            .run_captured(cmd, timeout_of(self.cfg.limits.pull_timeout_seconds))
            .with_context(|| format!("pulling image {}", self.cfg.docker.image))?;
        if !out.status.success() {
            return Err(anyhow!(
                "docker pull {} failed (exit {:?}): {}",
                self.cfg.docker.image,
                out.status.code(),
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }

        if self.cfg.docker.prune_old_images {
            if let Err(e) = self.prune_old_images() {
                warn!("pruning old images failed: {e:#}");
            }
        }
        Ok(())
    }

    /// Remove all but the most recently pulled image of the repo.
    fn prune_old_images(&self) -> Result<()> {
        let repo = self
            .cfg
            .docker
            .image
            .split(':')
            .next()
            .unwrap_or(&self.cfg.docker.image);

        let out = Command::new(&self.cfg.docker.docker_exe)
            .args(["images", "-q", repo])
            .output()
            .with_context(|| "listing images")?;
        if !out.status.success() {
            return Err(anyhow!(
                "docker images -q {repo} failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }

        let ids: Vec<String> = String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();

        // The freshly pulled image lists first.
        let Some((latest, stale)) = ids.split_first() else {
            return Ok(());
        };
        for id in stale {
            if id == latest {
                continue;
            }
            let rm = Command::new(&self.cfg.docker.docker_exe)
                .args(["rmi", "-f", id])
                .output()
                .with_context(|| format!("removing image {id}"))?;
            if rm.status.success() {
                info!("removed old image {id}");
            } else {
                warn!(
                    "failed to remove image {id}: {}",
                    String::from_utf8_lossy(&rm.stderr).trim()
                );
            }
        }
        Ok(())
    }

    fn run_captured(&self, mut cmd: Command, timeout: Option<Duration>) -> Result<Output> {
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        for (k, v) in &self.cfg.docker.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().with_context(|| "spawning docker")?;
        match timeout {
            Some(t) => wait_with_timeout(&mut child, t),
            None => child.wait_with_output().with_context(|| "waiting for docker"),
        }
    }

    /// The full `docker run` invocation for one job.
    pub fn install_command(&self, job: &Job, interactive: bool) -> Command {
        let dest = job.dest.display().to_string();
        let mut cmd = Command::new(&self.cfg.docker.docker_exe);
        cmd.arg("run").arg("--rm");
        if interactive {
            cmd.args(["-i", "-t"]);
        }
        cmd.arg("-v").arg(format!("{dest}:{dest}"));
        cmd.arg(&self.cfg.docker.image);
        cmd.arg("+force_install_dir").arg(&dest);
        cmd.arg("+login").arg(&self.cfg.steamcmd.login);
        cmd.arg("+app_update").arg(job.app_id.to_string());
        if self.cfg.steamcmd.validate {
            cmd.arg("validate");
        }
        cmd.arg("+quit");
        cmd
    }
}

impl Installer for DockerInstaller {
    fn install(&self, job: &Job, interactive: bool) -> Result<InstallRun> {
        // The bind mount source must exist, and SteamCMD updates an existing
        // install in place.
        ensure_dir(&job.dest)?;

        debug!("app {} -> {}", job.app_id, job.dest.display());
        let cmd = self.install_command(job, interactive);
        let out = self
            .run_captured(cmd, timeout_of(self.cfg.limits.job_timeout_seconds))
            .with_context(|| format!("running installer for app {}", job.app_id))?;

        let mut log = String::from_utf8_lossy(&out.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&out.stderr);
        if !stderr.trim().is_empty() {
            log.push_str("\n--- stderr ---\n");
            log.push_str(stderr.trim());
        }

        // A killed container reports no exit code.
        let exit_code = out.status.code().unwrap_or(-1);
        Ok(InstallRun { exit_code, log })
    }
}

fn timeout_of(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Output> {
    // Drain pipes while waiting so a chatty installer can't deadlock the
    // child on a full stdout/stderr buffer.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf).with_context(|| "read stdout")?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf).with_context(|| "read stderr")?;
        }
        Ok(buf)
    });

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            let stdout = stdout_thread
                .join()
                .map_err(|_| anyhow!("stdout reader thread panicked"))??;
            let stderr = stderr_thread
                .join()
                .map_err(|_| anyhow!("stderr reader thread panicked"))??;
            return Ok(Output {
                status,
                stdout,
                stderr,
            });
        }

        if start.elapsed() > timeout {
            warn!("subprocess timed out after {:?}", timeout);
            let _ = child.kill();
            let status = child.wait().with_context(|| "wait after kill")?;
            let stdout = stdout_thread
                .join()
                .map_err(|_| anyhow!("stdout reader thread panicked"))??;
            let stderr = stderr_thread
                .join()
                .map_err(|_| anyhow!("stderr reader thread panicked"))??;
            let output = Output {
                status,
                stdout,
                stderr,
            };
            return Err(anyhow!(
                "subprocess exceeded timeout ({:?}); stderr: {}",
                timeout,
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}
