use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub docker: Docker,
    #[serde(default)]
    pub steamcmd: Steamcmd,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: Default::default(),
            docker: Default::default(),
            steamcmd: Default::default(),
            limits: Default::default(),
            logging: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    /// Pool size used when --max-workers is not given. Clamped to the job
    /// count at dispatch time.
    pub default_max_workers: usize,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            default_max_workers: 2,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Docker {
    pub image: String,
    /// Refresh the image before the batch starts.
    pub pull_before_run: bool,
    /// Remove superseded image layers after a successful pull.
    pub prune_old_images: bool,
    pub docker_exe: String,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
}
impl Default for Docker {
    fn default() -> Self {
        Self {
            image: "steamcmd/steamcmd:latest".into(),
            pull_before_run: true,
            prune_old_images: true,
            docker_exe: "docker".into(),
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Steamcmd {
    pub login: String,
    /// Pass `validate` to +app_update so SteamCMD verifies existing files.
    pub validate: bool,
}
impl Default for Steamcmd {
    fn default() -> Self {
        Self {
            login: "anonymous".into(),
            validate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Per-job wall clock cap in seconds; 0 disables the cap.
    pub job_timeout_seconds: u64,
    pub pull_timeout_seconds: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            job_timeout_seconds: 0,
            pull_timeout_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}
