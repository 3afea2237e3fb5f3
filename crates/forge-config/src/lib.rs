pub mod logging;
mod validate;
pub mod workspace;

pub use logging::{LogFormat, LoggingConfig};
pub use workspace::{BuildDefaults, WorkspaceConfig, WorkspaceInfo};
