//! Shared plumbing for the build-like commands.

use std::path::Path;

use anyhow::Result;

use forge_config::WorkspaceConfig;
use forge_core::context::RuleStatus;
use forge_runtime::{BuildReport, BuildSession, SessionOptions};

use crate::CommonBuildArgs;

/// Bootstrap a session, run the targets, and shut the session down.
pub async fn run_build(
    root: &Path,
    config: &WorkspaceConfig,
    args: &CommonBuildArgs,
) -> Result<BuildReport> {
    let options = SessionOptions {
        jobs: args.jobs.or(config.build.jobs),
        force: args.force,
        stop_on_error: args.stop_on_error || config.build.stop_on_error,
        raise_on_error: false,
    };

    let registry = forge_rules::core_registry();
    let session = BuildSession::bootstrap(root, &config.workspace.name, registry, options)?;
    let result = session.run(&args.targets).await;
    session.shutdown().await?;
    Ok(result?)
}

/// Per-rule status lines for a failing build: every rule's state plus the
/// first non-cascade error of each failing rule.
pub fn print_failures(report: &BuildReport) {
    for rule in &report.rules {
        match rule.status {
            RuleStatus::Failed if !rule.cascaded => {
                eprintln!(
                    "FAILED  {}: {}",
                    rule.path,
                    rule.error.as_deref().unwrap_or("unknown error"),
                );
            }
            RuleStatus::Failed => eprintln!("skipped {} (dependency failed)", rule.path),
            status => eprintln!("{status:?}  {}", rule.path),
        }
    }
}

/// Output paths of a succeeded build, one per line.
pub fn print_outputs(report: &BuildReport) {
    for output in report.all_outputs() {
        println!("{}", output.display());
    }
}
