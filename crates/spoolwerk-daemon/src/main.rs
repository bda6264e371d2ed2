// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// spoolwerkd: the Spoolwerk scheduler daemon.
//
// Entry point. Initialises logging, loads the configuration, recovers the
// spool and runs the scheduler loop.

mod config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};

use spoolwerk_core::types::{DocumentFile, JobState};
use spoolwerk_sched::{JobEvent, JobSubmission, Scheduler, SqliteSpool, TokioLauncher};

use config::DaemonConfig;

#[derive(Debug, Parser)]
#[command(name = "spoolwerkd", version, about = "Spoolwerk print-job scheduler")]
struct Cli {
    /// Daemon configuration file (JSON).
    #[arg(short, long, env = "SPOOLWERK_CONFIG", default_value = "/etc/spoolwerk/spoolwerkd.json")]
    config: PathBuf,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler until interrupted.
    Run,
    /// Spool files as one job, print it and wait for the queue to drain.
    Print {
        /// Printer or class to queue on.
        #[arg(short, long)]
        dest: String,
        #[arg(short, long, default_value_t = 50)]
        priority: u32,
        #[arg(short, long, env = "USER")]
        user: Option<String>,
        /// MIME type of every file; guessed from the extension if omitted.
        #[arg(short = 't', long = "type")]
        mime_type: Option<String>,
        /// `job-hold-until` keyword.
        #[arg(long)]
        hold: Option<String>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = DaemonConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let (mut sched, mut events) = build_scheduler(&config)?;

    let restored = sched.recover().context("failed to recover the spool")?;
    info!(restored, "spoolwerkd starting");

    match cli.command {
        Command::Run => {
            sched.run(&mut events, shutdown_signal()).await;
            Ok(())
        }
        Command::Print { dest, priority, user, mime_type, hold, files } => {
            let mut submission = JobSubmission::new(priority, dest);
            if let Some(user) = user {
                submission = submission.user(user);
            }
            if let Some(hold) = hold {
                submission = submission.hold_until(hold);
            }
            for file in files {
                let document = document_for(&file, mime_type.as_deref());
                submission = submission.document_from(document, file);
            }
            print(&mut sched, &mut events, submission).await
        }
    }
}

fn build_scheduler(
    config: &DaemonConfig,
) -> Result<(Scheduler, tokio::sync::mpsc::UnboundedReceiver<JobEvent>)> {
    let spool_dir = &config.scheduler.spool_dir;
    let spool = SqliteSpool::open(spool_dir)
        .with_context(|| format!("failed to open spool at {}", spool_dir.display()))?;
    let (launcher, events) = TokioLauncher::new();

    let sched = Scheduler::new(
        config.scheduler.clone(),
        Box::new(config.registry()),
        Box::new(config.filter_table()),
        Box::new(spool),
        Box::new(launcher),
    );
    Ok((sched, events))
}

async fn print(
    sched: &mut Scheduler,
    events: &mut tokio::sync::mpsc::UnboundedReceiver<JobEvent>,
    submission: JobSubmission,
) -> Result<()> {
    let id = sched.submit(submission).context("submission rejected")?;
    println!("request id is {id}");

    sched.run_until_idle(events).await;

    let state = sched.job(id).map(|job| job.state);
    match state {
        Some(JobState::Completed) => {
            println!("job {id} completed");
            Ok(())
        }
        Some(JobState::Held | JobState::Pending) => {
            println!("job {id} is queued");
            Ok(())
        }
        Some(state) => bail!("job {id} ended {state}"),
        None => bail!("job {id} ended and was removed"),
    }
}

/// `DocumentFile` for `path`; a trailing `.gz` marks it compressed.
fn document_for(path: &Path, mime_type: Option<&str>) -> DocumentFile {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let (stem, compressed) = match name.strip_suffix(".gz") {
        Some(stem) => (stem, true),
        None => (name, false),
    };
    let mime = mime_type.unwrap_or_else(|| guess_mime(stem));
    let document = DocumentFile::new(mime);
    if compressed { document.compressed() } else { document }
}

fn guess_mime(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("ps") => "application/postscript",
        Some("txt" | "text") => "text/plain",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "unable to listen for SIGTERM");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "unable to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            return;
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "unable to listen for Ctrl-C");
                term.recv().await;
            }
        }
        _ = term.recv() => {}
    }
}
