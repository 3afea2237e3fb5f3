#[macro_use]
mod log_macros;

pub mod error;
pub mod pool;
pub mod session;
pub mod tracing_init;

pub use error::{RuntimeError, RuntimeReason, RuntimeResult};
pub use pool::PooledTaskExecutor;
pub use session::{BuildReport, BuildSession, RuleSummary, SessionOptions};
