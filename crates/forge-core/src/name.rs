//! Rule name and reference syntax.
//!
//! A source or dependency reference is a *rule path* iff it contains `:`.
//! Everything else is a file path or glob pattern relative to the module
//! directory. A full rule path is `<module-path>:<name>`; the module part
//! may be empty (`:name`), which binds to the referencing module.

use crate::error::{BuildReason, BuildResult, err};

/// True iff the reference is a rule path (contains a `:`).
pub fn is_rule_path(value: &str) -> bool {
    !value.is_empty() && value.contains(':')
}

/// Validate a bare rule name: non-empty, no whitespace, no leading `:`.
pub fn validate_rule_name(name: &str) -> BuildResult<()> {
    if name.is_empty() {
        return Err(err(BuildReason::BadName, "rule name must not be empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(err(
            BuildReason::BadName,
            format!("rule name must not contain whitespace: \"{name}\""),
        ));
    }
    if name.starts_with(':') {
        return Err(err(
            BuildReason::BadName,
            format!("rule name must not start with ':': \"{name}\""),
        ));
    }
    Ok(())
}

/// Validate a list of references. With `require_rule_path`, every entry must
/// contain a `:` (i.e. be a rule path, not a file pattern).
pub fn validate_refs<S: AsRef<str>>(values: &[S], require_rule_path: bool) -> BuildResult<()> {
    for value in values {
        let value = value.as_ref();
        if value.is_empty() {
            return Err(err(BuildReason::BadName, "reference must not be empty"));
        }
        if value.trim().len() != value.len() {
            return Err(err(
                BuildReason::BadName,
                format!("reference must not have leading/trailing whitespace: \"{value}\""),
            ));
        }
        if require_rule_path && !is_rule_path(value) {
            return Err(err(
                BuildReason::BadName,
                format!("reference must be a rule path (contain a ':'): \"{value}\""),
            ));
        }
    }
    Ok(())
}

/// Split a rule path into `(module_path, rule_name)`.
///
/// The module part may be empty (`":a"` → `("", "a")`). The split is on the
/// last `:` so module paths themselves never contain one.
pub fn split_rule_path(path: &str) -> BuildResult<(&str, &str)> {
    let Some(idx) = path.rfind(':') else {
        return Err(err(
            BuildReason::BadName,
            format!("rule path is missing a ':': \"{path}\""),
        ));
    };
    let (module_path, name) = (&path[..idx], &path[idx + 1..]);
    if name.is_empty() {
        return Err(err(
            BuildReason::BadName,
            format!("no rule name given in \"{path}\""),
        ));
    }
    Ok((module_path, name))
}

/// True iff the pattern contains glob metacharacters.
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.contains('[')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_path_detection() {
        assert!(is_rule_path(":a"));
        assert!(is_rule_path("sub/dir:a"));
        assert!(!is_rule_path("a.txt"));
        assert!(!is_rule_path("sub/dir/a.txt"));
        assert!(!is_rule_path(""));
    }

    #[test]
    fn rule_name_validation() {
        for bad in ["", " ", " a", "a ", " a ", "a\n", "a\t", "a b", ":a"] {
            assert!(validate_rule_name(bad).is_err(), "expected error for {bad:?}");
        }
        assert!(validate_rule_name("a").is_ok());
        assert!(validate_rule_name("a_b.c-d").is_ok());
    }

    #[test]
    fn ref_validation() {
        assert!(validate_refs(&["a", ":b", "m:c"], false).is_ok());
        assert!(validate_refs(&[" a"], false).is_err());
        assert!(validate_refs(&[""], false).is_err());
        assert!(validate_refs(&["a"], true).is_err());
        assert!(validate_refs(&[":a", "m:b"], true).is_ok());
    }

    #[test]
    fn split() {
        assert_eq!(split_rule_path(":a").unwrap(), ("", "a"));
        assert_eq!(split_rule_path("sub/dir:a").unwrap(), ("sub/dir", "a"));
        assert!(split_rule_path("a").is_err());
        assert!(split_rule_path("m:").is_err());
    }

    #[test]
    fn glob_detection() {
        assert!(is_glob("*.txt"));
        assert!(is_glob("a?.txt"));
        assert!(is_glob("a[0-9].txt"));
        assert!(!is_glob("a.txt"));
    }
}
