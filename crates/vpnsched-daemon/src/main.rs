use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use vpnsched_control::PermissionPrompt;
use vpnsched_core::{LogBuffer, LogBufferLayer, VpnschedConfig};
use vpnsched_schedule::{ScheduleFile, ScheduleStore};

mod context;
mod prompt;
mod trigger;

use context::AppContext;
use trigger::TickOutcome;

#[derive(Parser)]
#[command(
    name = "vpnsched",
    about = "Apply a time-based VPN schedule through the VPN control service",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ~/.vpnsched/vpnsched.toml)
    #[arg(long, global = true, env = "VPNSCHED_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a schedule document and print its canonical form
    Check { file: PathBuf },

    /// Show the entry in effect and the next change
    Active {
        /// Schedule document (default: the installed schedule)
        #[arg(long)]
        file: Option<PathBuf>,
        /// RFC 3339 instant to evaluate at (default: now)
        #[arg(long)]
        at: Option<String>,
        /// Output as JSON
        #[arg(long, short = 'j')]
        json: bool,
    },

    /// Download a schedule, validate it and install it
    Fetch {
        /// Source URL (default: [schedule] url from the config)
        url: Option<String>,
    },

    /// Run one trigger pass; exits 75 when it should be retried
    Tick {
        /// Ask on the terminal when the service needs permission
        #[arg(long)]
        interactive: bool,
    },

    /// Run the periodic trigger until Ctrl-C
    Run {
        /// Ask on the terminal when the service needs permission
        #[arg(long)]
        interactive: bool,
    },

    /// Print the diagnostic log buffer, newest entry first
    Logs {
        /// Empty the buffer instead
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // load config: --config > VPNSCHED_CONFIG > ~/.vpnsched/vpnsched.toml
    let (config, config_err) = match VpnschedConfig::load(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) => (VpnschedConfig::default(), Some(e)),
    };

    let logbuf = Arc::new(LogBuffer::open(
        config.log.buffer_path.clone(),
        config.log.max_bytes,
    ));
    init_tracing(Arc::clone(&logbuf));
    if let Some(e) = config_err {
        warn!(code = e.code(), "Config load failed ({}), using defaults", e);
    }

    let result = match cli.command {
        Commands::Check { file } => check(&file),
        Commands::Active { file, at, json } => active(&config, file, at.as_deref(), json),
        Commands::Fetch { url } => fetch(&config, url).await,
        Commands::Tick { interactive } => tick(config, interactive).await,
        Commands::Run { interactive } => run(config, interactive).await,
        Commands::Logs { clear } => logs(&logbuf, clear),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(logbuf: Arc<LogBuffer>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "vpnsched=info,vpnsched_control=info,vpnsched_schedule=info".into()
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(LogBufferLayer::new(logbuf))
        .init();
}

fn prompt_for(interactive: bool) -> Option<Arc<dyn PermissionPrompt>> {
    interactive.then(|| Arc::new(prompt::TerminalPrompt::new()) as Arc<dyn PermissionPrompt>)
}

fn check(file: &Path) -> anyhow::Result<ExitCode> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let store =
        ScheduleStore::parse(&text).with_context(|| format!("{} is invalid", file.display()))?;
    print!("{}", store.serialize());
    println!("# {} entries", store.len());
    Ok(ExitCode::SUCCESS)
}

fn active(
    config: &VpnschedConfig,
    file: Option<PathBuf>,
    at: Option<&str>,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let storage = ScheduleFile::new(file.unwrap_or_else(|| config.schedule.path.clone()));
    let store = storage
        .load()
        .with_context(|| format!("cannot load {}", storage.path().display()))?;
    let now = match at {
        Some(at) => DateTime::parse_from_rfc3339(at)
            .with_context(|| format!("invalid --at instant {at:?}"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let current = store.active_action(now).map(|e| e.to_string());
    let next = store.next_change(now).map(|e| e.to_string());
    if json {
        let out = serde_json::json!({
            "at": now.to_rfc3339(),
            "active": current,
            "next": next,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("active: {}", current.as_deref().unwrap_or("none"));
        if let Some(next) = next {
            println!("next:   {next}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn fetch(config: &VpnschedConfig, url: Option<String>) -> anyhow::Result<ExitCode> {
    let url = url
        .or_else(|| config.schedule.url.clone())
        .context("no URL given and [schedule] url is not set")?;
    let storage = ScheduleFile::new(config.schedule.path.clone());
    let store = storage
        .fetch(&url)
        .await
        .with_context(|| format!("cannot install schedule from {url}"))?;
    println!(
        "installed {} entries to {}",
        store.len(),
        storage.path().display()
    );
    Ok(ExitCode::SUCCESS)
}

async fn tick(config: VpnschedConfig, interactive: bool) -> anyhow::Result<ExitCode> {
    let ctx = AppContext::init(config, prompt_for(interactive));
    let outcome = trigger::run_once(&ctx, Utc::now()).await;

    // Stay around until the operator has answered and the action ran.
    if interactive {
        while ctx.control.awaiting_permission().await {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
    ctx.shutdown().await;

    Ok(match outcome {
        TickOutcome::Success => ExitCode::SUCCESS,
        TickOutcome::Retry => ExitCode::from(trigger::EXIT_RETRY),
    })
}

async fn run(config: VpnschedConfig, interactive: bool) -> anyhow::Result<ExitCode> {
    let ctx = AppContext::init(config, prompt_for(interactive));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, stopping"),
            Err(e) => error!(error = %e, "cannot listen for Ctrl-C, stopping"),
        }
        let _ = shutdown_tx.send(true);
    });

    trigger::run(&ctx, shutdown_rx).await;
    ctx.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

fn logs(logbuf: &LogBuffer, clear: bool) -> anyhow::Result<ExitCode> {
    if clear {
        logbuf.clear();
        println!("log buffer cleared");
    } else {
        println!("{}", logbuf.newest_first());
    }
    Ok(ExitCode::SUCCESS)
}
