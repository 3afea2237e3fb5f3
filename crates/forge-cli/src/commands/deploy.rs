use std::path::Path;

use anyhow::Result;

use forge_config::WorkspaceConfig;

use super::util;
use crate::CommonBuildArgs;

/// Build the targets, then copy every target output into `target_dir`.
pub async fn run(
    root: &Path,
    config: &WorkspaceConfig,
    args: &CommonBuildArgs,
    target_dir: &Path,
) -> Result<()> {
    let report = util::run_build(root, config, args).await?;
    if !report.success {
        util::print_failures(&report);
        anyhow::bail!("build failed");
    }

    std::fs::create_dir_all(target_dir)
        .map_err(|e| anyhow::anyhow!("creating {}: {e}", target_dir.display()))?;
    for output in report.all_outputs() {
        let Some(file_name) = output.file_name() else {
            continue;
        };
        let dest = target_dir.join(file_name);
        std::fs::copy(&output, &dest).map_err(|e| {
            anyhow::anyhow!("copying {} to {}: {e}", output.display(), dest.display())
        })?;
        println!("{}", dest.display());
    }
    Ok(())
}
