//! Command-line entry point shared by worker binaries.
//!
//! Two modes:
//! - one-shot: `-i <input> [-o <output>] [-t <platform>]` builds a single file
//! - persistent: `-P` serves build requests from the cache over stdin/stdout
//!   until the cache closes the channel or the process is signalled

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::channel;
use crate::build_state::BuildRequest;
use crate::compiler::Compiler;
use crate::orchestrator::Orchestrator;
use crate::paths::{is_file, resolve, with_extension};

/// Flags every worker accepts. Flatten into the binary's own parser.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerArgs {
    /// Serve build requests from the cache over stdin/stdout
    #[clap(short = 'P', long)]
    pub persistent: bool,
    /// Source file to compile
    #[clap(short, long)]
    pub input: Option<PathBuf>,
    /// Target file, defaults to the input name with the worker's extension
    #[clap(short, long)]
    pub output: Option<PathBuf>,
    /// Target platform
    #[clap(short, long)]
    pub target: Option<String>,
}

impl WorkerArgs {
    /// One-shot build request, `None` without an input.
    ///
    /// A missing output becomes `<cwd>/<input file name>` with its extension
    /// replaced by `output_extension`.
    pub fn request(&self, cwd: &Path, output_extension: &str) -> Option<BuildRequest> {
        let input = self.input.as_deref()?;
        let output = match &self.output {
            Some(output) => output.clone(),
            None => {
                let name = input.file_name()?.to_string_lossy();
                cwd.join(with_extension(&name, output_extension))
            }
        };
        Some(BuildRequest::new(
            input,
            output,
            self.target.clone().unwrap_or_default(),
        ))
    }
}

/// Process exit status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Success = 0,
    Error = 1,
    FileNotFound = 2,
}

impl From<WorkerExit> for ExitCode {
    fn from(exit: WorkerExit) -> Self {
        ExitCode::from(exit as u8)
    }
}

/// Run the worker in the mode selected by `args`.
///
/// SIGINT and SIGTERM end either mode with exit code 0, abandoning any
/// build in progress.
pub fn worker_main(compiler: Arc<dyn Compiler>, args: &WorkerArgs) -> ExitCode {
    crate::logging::init_panic_hook();

    let exit = if args.persistent {
        run_persistent(compiler)
    } else {
        run_one_shot(compiler, args)
    };

    match exit {
        Ok(exit) => exit.into(),
        Err(e) => {
            tracing::error!("Worker failed to start: {e:#}");
            WorkerExit::Error.into()
        }
    }
}

/// Build `args.input` once, reporting failures on stderr.
pub fn run_once(compiler: Arc<dyn Compiler>, args: &WorkerArgs, cwd: &Path) -> WorkerExit {
    let request = args
        .request(cwd, compiler.output_extension())
        .filter(|request| is_file(&resolve(cwd, &request.source_path)));
    let Some(request) = request else {
        eprintln!("Error: No input file specified or input file not found.");
        return WorkerExit::FileNotFound;
    };

    let orchestrator = Orchestrator::new(compiler, cwd);
    let state = orchestrator.build(request);
    if state.success() {
        tracing::info!(
            target_path = %state.target_path().display(),
            outputs = state.outputs().len(),
            "Build succeeded"
        );
        return WorkerExit::Success;
    }

    eprintln!("An error has occurred:");
    for error in state.errors() {
        eprintln!("    {error}");
    }
    WorkerExit::Error
}

fn runtime() -> anyhow::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")
}

fn run_one_shot(compiler: Arc<dyn Compiler>, args: &WorkerArgs) -> anyhow::Result<WorkerExit> {
    let cwd = std::env::current_dir().context("failed to read the working directory")?;
    let runtime = runtime()?;
    let args = args.clone();

    let exit = runtime.block_on(async move {
        let cancel = CancellationToken::new();
        tokio::spawn(shutdown_signal(cancel.clone()));

        let build = tokio::task::spawn_blocking(move || run_once(compiler, &args, &cwd));
        unless_cancelled(build, &cancel).await
    });

    runtime.shutdown_background();
    Ok(exit)
}

/// Exit status of `build`, or success if `cancel` fires first.
async fn unless_cancelled(build: JoinHandle<WorkerExit>, cancel: &CancellationToken) -> WorkerExit {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            tracing::info!("Build abandoned");
            WorkerExit::Success
        }
        joined = build => joined.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Build task failed");
            WorkerExit::Error
        }),
    }
}

fn run_persistent(compiler: Arc<dyn Compiler>) -> anyhow::Result<WorkerExit> {
    let cwd = std::env::current_dir().context("failed to read the working directory")?;
    let runtime = runtime()?;
    let orchestrator = Orchestrator::new(compiler, cwd);

    let exit = runtime.block_on(async {
        let cancel = CancellationToken::new();
        tokio::spawn(shutdown_signal(cancel.clone()));

        let mut channel = channel::stdio();
        match orchestrator.serve(&mut channel, &cancel).await {
            Ok(()) => WorkerExit::Success,
            Err(e) => {
                tracing::error!(error = %e, "Lost the cache channel");
                WorkerExit::Error
            }
        }
    });

    // A pending stdin read or an abandoned build must not hold up exit.
    runtime.shutdown_background();
    Ok(exit)
}

/// Cancel `cancel` on SIGINT or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
    cancel.cancel();
}
