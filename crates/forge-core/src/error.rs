use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum BuildReason {
    #[error("invalid rule name or path")]
    BadName,
    #[error("unknown rule")]
    UnknownRule,
    #[error("duplicate rule")]
    DuplicateRule,
    #[error("duplicate module")]
    DuplicateModule,
    #[error("duplicate rule type")]
    DuplicateType,
    #[error("dependency cycle")]
    CycleDetected,
    #[error("build file parse error")]
    Parse,
    #[error("unknown rule type")]
    UnknownSymbol,
    #[error("task failed")]
    TaskFailed,
    #[error("skipped after dependency failure")]
    Cascaded,
    #[error("executor closed")]
    ExecutorClosed,
    #[error("programming error")]
    Programming,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for BuildReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::BadName => 1001,
            Self::UnknownRule => 1002,
            Self::DuplicateRule => 1003,
            Self::DuplicateModule => 1004,
            Self::DuplicateType => 1005,
            Self::CycleDetected => 1006,
            Self::Parse => 1007,
            Self::UnknownSymbol => 1008,
            Self::TaskFailed => 1009,
            Self::Cascaded => 1010,
            Self::ExecutorClosed => 1011,
            Self::Programming => 1012,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type BuildError = StructError<BuildReason>;
pub type BuildResult<T> = Result<T, BuildError>;

/// Shorthand for `StructError::from(reason).with_detail(detail)`.
pub fn err(reason: BuildReason, detail: impl Into<String>) -> BuildError {
    StructError::from(reason).with_detail(detail.into())
}
