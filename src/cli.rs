use crate::{
    config::Config,
    installer::DockerInstaller,
    job::build_jobs,
    lock::RunLock,
    notify::{notify, NotifyConfig, SlackSink},
    pool,
    report::{aggregate, render_summary, Overall},
    util::{ensure_dir, open_log_append},
};
use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const EXIT_OK: u8 = 0;
pub const EXIT_JOBS_FAILED: u8 = 1;
pub const EXIT_LOCK_HELD: u8 = 2;

/// Exit code for a failed dispatch. Only lock contention gets the dedicated
/// code; lock I/O trouble is an ordinary failure, not "another batch running".
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<crate::lock::LockError>() {
        Some(crate::lock::LockError::Held { .. }) => EXIT_LOCK_HELD,
        _ => EXIT_JOBS_FAILED,
    }
}

#[derive(Parser, Debug)]
#[command(name = "steamsync")]
#[command(about = "Concurrent Steam depot cache updater (SteamCMD + Docker + Slack alerts)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./steamsync.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report docker availability and the effective notification config.
    Doctor {},
    /// Install or update the given apps, one container per app.
    Run {
        /// Comma-separated list of Steam app ids.
        #[arg(long, value_delimiter = ',', required = true)]
        app_ids: Vec<String>,
        /// Absolute root directory; each app installs into <root>/<app_id>.
        #[arg(long)]
        install_path: PathBuf,
        /// Concurrent installs; defaults from config, clamped to the app count.
        #[arg(long)]
        max_workers: Option<usize>,
        /// Run the SteamCMD container with an attached TTY (true/false).
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        interactive: bool,
    },
}

/// Process exit code for the invocation. Job failures and lock contention map
/// to distinct codes; nothing else influences the result.
pub fn dispatch(args: Args) -> Result<u8> {
    let cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!("could not load .env: {e}");
        }
    }

    match &args.cmd {
        Command::Doctor {} => {
            let _guard = init_logging(&args, &cfg, None)?;
            doctor(&cfg)
        }
        Command::Run {
            app_ids,
            install_path,
            max_workers,
            interactive,
        } => run(&args, &cfg, app_ids, install_path, *max_workers, *interactive),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("steamsync.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = open_log_append(path)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn doctor(cfg: &Config) -> Result<u8> {
    let installer = DockerInstaller::new(cfg);
    let diag = installer.doctor();
    let ok = diag.ok;
    let notify_cfg = NotifyConfig::from_env();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "docker": diag,
            "notify": notify_cfg,
        }))?
    );
    Ok(if ok { EXIT_OK } else { EXIT_JOBS_FAILED })
}

fn run(
    args: &Args,
    cfg: &Config,
    raw_app_ids: &[String],
    install_path: &Path,
    max_workers: Option<usize>,
    interactive: bool,
) -> Result<u8> {
    let app_ids = parse_app_ids(raw_app_ids)?;
    if !install_path.is_absolute() {
        return Err(anyhow!(
            "install_path must be absolute: {}",
            install_path.display()
        ));
    }

    // Lock first: nothing, including the image pull, may run concurrently
    // with another batch against this root, and a losing invocation must not
    // touch the winner's log file under the install root.
    let lock = RunLock::acquire(install_path)?;

    let log_path = resolve_log_path(cfg, install_path);
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    let workers = max_workers.unwrap_or(cfg.global.default_max_workers).max(1);
    info!(
        "starting batch: {} apps, {} workers, interactive={}",
        app_ids.len(),
        workers,
        interactive
    );

    let installer = DockerInstaller::new(cfg);
    if let Err(err) = installer.prepare() {
        warn!("image refresh failed; aborting batch: {err:#}");
        let notify_cfg = NotifyConfig::from_env();
        crate::notify::alert(
            notify_cfg.as_ref(),
            &format!("*Failed to update SteamCMD*\n• *Error:* `{err:#}`"),
            &SlackSink,
        );
        return Ok(EXIT_JOBS_FAILED);
    }

    let jobs = build_jobs(&app_ids, install_path);
    let outcomes = pool::run_batch(&installer, &jobs, workers, interactive);
    let result = aggregate(outcomes);

    info!("batch finished: {:?}", result.overall);
    if cfg.global.print_summary {
        println!("{}", render_summary(&result));
    }

    let notify_cfg = NotifyConfig::from_env();
    notify(&result, notify_cfg.as_ref(), &SlackSink);

    lock.release();

    Ok(match result.overall {
        Overall::AllSucceeded => EXIT_OK,
        Overall::SomeFailed | Overall::AllFailed => EXIT_JOBS_FAILED,
    })
}

/// Parse and validate the comma-separated app id list. Empty entries from a
/// trailing comma are rejected, as are duplicates.
pub fn parse_app_ids(raw: &[String]) -> Result<Vec<u32>> {
    if raw.is_empty() {
        return Err(anyhow!("app_ids must not be empty"));
    }
    let mut ids = Vec::with_capacity(raw.len());
    for part in raw {
        let part = part.trim();
        let id: u32 = part
            .parse()
            .map_err(|_| anyhow!("invalid app id: {part:?}"))?;
        if ids.contains(&id) {
            return Err(anyhow!("duplicate app id: {id}"));
        }
        ids.push(id);
    }
    Ok(ids)
}

fn resolve_log_path(cfg: &Config, install_path: &Path) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(install_path.join("steamsync.log"))
}
