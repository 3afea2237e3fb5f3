use crate::workspace::WorkspaceConfig;

/// Cross-field validation applied after deserialization.
pub(crate) fn validate(config: &WorkspaceConfig) -> anyhow::Result<()> {
    if let Some(jobs) = config.build.jobs
        && jobs == 0
    {
        anyhow::bail!("build.jobs must be at least 1");
    }

    if config.logging.level.trim().is_empty() {
        anyhow::bail!("logging.level must not be empty");
    }
    for (module, level) in &config.logging.modules {
        if module.trim().is_empty() || level.trim().is_empty() {
            anyhow::bail!("logging.modules entries must not be empty");
        }
    }

    Ok(())
}
