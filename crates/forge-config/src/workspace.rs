use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::logging::LoggingConfig;
use crate::validate;

// ---------------------------------------------------------------------------
// Raw TOML structure (intermediate representation)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WorkspaceConfigRaw {
    workspace: WorkspaceInfo,
    build: BuildDefaults,
    logging: LoggingConfig,
}

/// `[workspace]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceInfo {
    /// Human-readable workspace name, used for logging.
    pub name: String,
}

impl Default for WorkspaceInfo {
    fn default() -> Self {
        Self {
            name: "workspace".to_string(),
        }
    }
}

/// `[build]` section — defaults applied when the CLI flags are omitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildDefaults {
    /// Worker count for the task executor. Omitted → host parallelism.
    pub jobs: Option<usize>,
    /// Stop issuing new rules after the first failure.
    pub stop_on_error: bool,
}

// ---------------------------------------------------------------------------
// WorkspaceConfig (resolved, validated)
// ---------------------------------------------------------------------------

/// Resolved `forge.toml`. Every section is optional; an absent file yields
/// the defaults.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceConfig {
    pub workspace: WorkspaceInfo,
    pub build: BuildDefaults,
    pub logging: LoggingConfig,
}

impl WorkspaceConfig {
    /// Read and parse a `forge.toml` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }

    /// Load `<root>/forge.toml` when present, defaults otherwise.
    pub fn load_or_default(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = root.as_ref().join("forge.toml");
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

impl FromStr for WorkspaceConfig {
    type Err = anyhow::Error;

    /// Parse a TOML string into a resolved, validated [`WorkspaceConfig`].
    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let raw: WorkspaceConfigRaw = toml::from_str(toml_str)?;
        let config = WorkspaceConfig {
            workspace: raw.workspace,
            build: raw.build,
            logging: raw.logging,
        };
        validate::validate(&config)?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
