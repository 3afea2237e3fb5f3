use std::path::Path;

use anyhow::Result;

use forge_config::WorkspaceConfig;

use super::util;
use crate::CommonBuildArgs;

/// Build the targets so a file server (an external collaborator) can pick
/// the outputs up from `build-out/`.
pub async fn run(root: &Path, config: &WorkspaceConfig, args: &CommonBuildArgs) -> Result<()> {
    let report = util::run_build(root, config, args).await?;
    if !report.success {
        util::print_failures(&report);
        anyhow::bail!("build failed");
    }
    util::print_outputs(&report);
    Ok(())
}
