/// Domain-aware logging macros.
///
/// Each macro injects a `domain` field automatically so callers never need
/// to remember the string literal. Domains used in this crate: `sys`
/// (lifecycle), `conf` (configuration), `rule` (rule scheduling), `task`
/// (executor/worker activity).
///
/// # Usage
///
/// ```ignore
/// fg_info!(sys, rules = 3, "session bootstrap complete");
/// fg_warn!(task, error = %e, "worker task panicked");
/// ```
///
/// The macros accept any tracing-compatible field syntax after the domain
/// identifier. The domain identifier is **not** a string — it is a bare
/// identifier the macro converts to a `&str` literal.

/// Internal helper. Do not call directly; use `fg_error!` … `fg_trace!`.
#[doc(hidden)]
macro_rules! fg_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

/// Log at ERROR level with an automatic `domain` field.
#[allow(unused_macros)]
macro_rules! fg_error {
    ($domain:ident, $($rest:tt)*) => {
        fg_log!(error, $domain, $($rest)*)
    };
}

/// Log at WARN level with an automatic `domain` field.
macro_rules! fg_warn {
    ($domain:ident, $($rest:tt)*) => {
        fg_log!(warn, $domain, $($rest)*)
    };
}

/// Log at INFO level with an automatic `domain` field.
macro_rules! fg_info {
    ($domain:ident, $($rest:tt)*) => {
        fg_log!(info, $domain, $($rest)*)
    };
}

/// Log at DEBUG level with an automatic `domain` field.
macro_rules! fg_debug {
    ($domain:ident, $($rest:tt)*) => {
        fg_log!(debug, $domain, $($rest)*)
    };
}

/// Log at TRACE level with an automatic `domain` field.
#[allow(unused_macros)]
macro_rules! fg_trace {
    ($domain:ident, $($rest:tt)*) => {
        fg_log!(trace, $domain, $($rest)*)
    };
}
