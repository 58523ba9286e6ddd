pub mod docker;

use crate::job::Job;
use anyhow::Result;

pub use docker::DockerInstaller;

/// Result of one external installer invocation.
#[derive(Debug, Clone)]
pub struct InstallRun {
    pub exit_code: i32,
    pub log: String,
}

impl InstallRun {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Opaque capability for installing/updating one title. The production
/// implementation shells out to SteamCMD inside a fresh Docker container;
/// tests substitute deterministic stubs.
pub trait Installer: Sync {
    fn install(&self, job: &Job, interactive: bool) -> Result<InstallRun>;
}
