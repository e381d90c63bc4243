use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use datacompiler::cli::{WorkerArgs, worker_main};
use texture_compiler::{DEFAULTS_FILENAME, TextureCompiler, TextureDefaults};

#[derive(Parser, Debug)]
#[clap(name = "texture")]
#[clap(about = "Texture data compiler", version)]
struct Cli {
    #[clap(flatten)]
    worker: WorkerArgs,
    /// Texture defaults file
    #[clap(long, default_value = DEFAULTS_FILENAME)]
    defaults: PathBuf,
}

fn main() -> ExitCode {
    datacompiler::logging::init_tracing(env!("CARGO_PKG_NAME"));

    let cli = Cli::parse();
    let defaults = TextureDefaults::load(&cli.defaults);
    worker_main(Arc::new(TextureCompiler::new(defaults)), &cli.worker)
}
