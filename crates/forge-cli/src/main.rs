use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use forge_config::WorkspaceConfig;
use forge_runtime::tracing_init;

mod commands;

#[derive(Parser)]
#[command(name = "forge", about = "forge build engine")]
struct Cli {
    /// Workspace root. Defaults to the current directory.
    #[arg(short = 'C', long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by all build-like commands.
#[derive(Args, Debug, Clone)]
pub struct CommonBuildArgs {
    /// Number of tasks to run simultaneously. Omitted → all processors.
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Force a full rebuild, ignoring cached artifacts.
    #[arg(short, long)]
    pub force: bool,

    /// Stop issuing rules when an error is encountered.
    #[arg(long)]
    pub stop_on_error: bool,

    /// Target build rules (such as `:a` or `foo/bar:a`).
    #[arg(required = true, value_name = "target")]
    pub targets: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build target rules and print produced output paths.
    Build(CommonBuildArgs),
    /// Delete build outputs and caches under the root.
    Clean,
    /// Build target rules and report per-rule status.
    Test(CommonBuildArgs),
    /// Build target rules and keep their outputs fresh for serving.
    Serve(CommonBuildArgs),
    /// Build target rules and copy their outputs to a directory.
    Deploy {
        #[command(flatten)]
        build: CommonBuildArgs,
        /// Directory receiving the target outputs.
        #[arg(long, value_name = "dir")]
        target_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let root = root
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("workspace root '{}': {e}", root.display()))?;

    let config = WorkspaceConfig::load_or_default(&root)?;
    let _log_guard = tracing_init::init_tracing(&config.logging, &root)?;

    match cli.command {
        Commands::Build(args) => commands::build::run(&root, &config, &args).await,
        Commands::Clean => commands::clean::run(&root),
        Commands::Test(args) => commands::test::run(&root, &config, &args).await,
        Commands::Serve(args) => commands::serve::run(&root, &config, &args).await,
        Commands::Deploy { build, target_dir } => {
            commands::deploy::run(&root, &config, &build, &target_dir).await
        }
    }
}
