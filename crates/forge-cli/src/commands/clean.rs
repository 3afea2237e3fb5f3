use std::path::Path;

use anyhow::Result;

use forge_core::env::BuildEnvironment;

/// Delete `build-out/`, `build-gen/`, and `.build-cache/` under the root.
pub fn run(root: &Path) -> Result<()> {
    let env = BuildEnvironment::new(root);
    for dir in [env.out_root(), env.gen_root(), env.cache_root()] {
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => tracing::info!("removed {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(anyhow::anyhow!("removing {}: {e}", dir.display())),
        }
    }
    Ok(())
}
