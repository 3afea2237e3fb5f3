//! Rule definitions.
//!
//! A [`Rule`] carries the declarative attributes every rule type shares:
//! name, sources, dependencies, and an optional source filter. Behavior
//! lives in [`BuildRule`] implementations, which wrap a `Rule` and drive
//! their own work when the build context issues them.
//!
//! Sources may refer to files, globs, or other rules. Rule references in
//! `srcs` substitute the referenced rule's outputs; entries in `deps` only
//! order execution.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use forge_lang::RuleDecl;
use sha2::{Digest, Sha256};

use crate::context::RuleContext;
use crate::error::{BuildReason, BuildResult, err};
use crate::name;

/// Version tag folded into every cache key, forcing rebuilds across
/// framework upgrades.
pub const FRAMEWORK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Attributes shared by every rule type.
pub const COMMON_ATTRS: &[&str] = &["srcs", "deps", "src_filter"];

// ---------------------------------------------------------------------------
// Rule — shared declarative attributes
// ---------------------------------------------------------------------------

/// The parent-module binding of a rule, set exactly once when the rule is
/// added to a module.
#[derive(Debug, Clone)]
pub struct ParentRef {
    pub module_path: String,
    pub module_dir: PathBuf,
}

#[derive(Debug)]
pub struct Rule {
    name: String,
    srcs: Vec<String>,
    deps: Vec<String>,
    src_filter: Option<String>,
    parent: OnceLock<ParentRef>,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        srcs: Vec<String>,
        deps: Vec<String>,
        src_filter: Option<String>,
    ) -> BuildResult<Self> {
        let name = name.into();
        name::validate_rule_name(&name)?;
        name::validate_refs(&srcs, false)?;
        name::validate_refs(&deps, true)?;
        let src_filter = src_filter.filter(|f| !f.is_empty());
        Ok(Self {
            name,
            srcs,
            deps,
            src_filter,
            parent: OnceLock::new(),
        })
    }

    /// Build from a parsed declaration, consuming the common attributes.
    /// `extra_attrs` lists the additional attribute names the rule type
    /// accepts; anything else is rejected.
    pub fn from_decl(decl: &RuleDecl, extra_attrs: &[&str]) -> BuildResult<Self> {
        for key in decl.attr_keys() {
            if !COMMON_ATTRS.contains(&key) && !extra_attrs.contains(&key) {
                return Err(err(
                    BuildReason::Parse,
                    format!(
                        "rule type \"{}\" does not accept attribute \"{key}\"",
                        decl.rule_type,
                    ),
                ));
            }
        }
        Self::new(
            decl.name.clone(),
            decl.list_attr("srcs").unwrap_or_default(),
            decl.list_attr("deps").unwrap_or_default(),
            decl.str_attr("src_filter").map(str::to_string),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn srcs(&self) -> &[String] {
        &self.srcs
    }

    pub fn deps(&self) -> &[String] {
        &self.deps
    }

    pub fn src_filter(&self) -> Option<&str> {
        self.src_filter.as_deref()
    }

    /// Bind the rule to its parent module. Write-once: a second binding is
    /// a programming error.
    pub fn bind_parent(&self, module_path: &str, module_dir: impl Into<PathBuf>) -> BuildResult<()> {
        let parent = ParentRef {
            module_path: module_path.to_string(),
            module_dir: module_dir.into(),
        };
        self.parent.set(parent).map_err(|_| {
            err(
                BuildReason::Programming,
                format!("rule \"{}\" already has a parent module", self.name),
            )
        })
    }

    pub fn parent(&self) -> Option<&ParentRef> {
        self.parent.get()
    }

    /// Directory of the parent module; anchors relative source patterns.
    pub fn module_dir(&self) -> Option<&Path> {
        self.parent.get().map(|p| p.module_dir.as_path())
    }

    /// Canonical path: `<module-path>:<name>` once bound, `:<name>` before.
    pub fn full_path(&self) -> String {
        match self.parent.get() {
            Some(parent) => format!("{}:{}", parent.module_path, self.name),
            None => format!(":{}", self.name),
        }
    }

    /// All rule-typed references among `srcs` and `deps`.
    pub fn rule_refs(&self) -> impl Iterator<Item = &str> {
        self.srcs
            .iter()
            .chain(self.deps.iter())
            .map(String::as_str)
            .filter(|r| name::is_rule_path(r))
    }
}

// ---------------------------------------------------------------------------
// BuildRule — behavior attached to a rule
// ---------------------------------------------------------------------------

/// A rule type: declarative attributes plus the work the rule performs.
///
/// `begin` runs on the driver once every predecessor is terminal. The
/// default leaves the rule running; implementations either complete the
/// context synchronously or chain task deferreds onto it.
pub trait BuildRule: Send + Sync {
    /// The shared declarative attributes.
    fn decl(&self) -> &Rule;

    /// The registry tag identifying this rule type.
    fn type_tag(&self) -> &'static str;

    /// Type-specific attribute values, canonically encoded, for the cache
    /// key. Rule types without extra attributes return the default.
    fn fingerprint(&self) -> String {
        String::new()
    }

    /// Start the rule's work. The context is `Running` on entry; the rule
    /// must eventually complete it (directly or through chained deferreds).
    fn begin(&self, ctx: RuleContext) -> BuildResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// Stable fingerprint of the rule for artifact reuse: equal inputs give
    /// byte-equal keys, and any attribute, type, or framework change gives
    /// a different key.
    fn cache_key(&self) -> String {
        let decl = self.decl();
        // Unit/record separators keep the encoding unambiguous without a
        // serialization framework.
        let mut canonical = String::new();
        let _ = write!(canonical, "v={FRAMEWORK_VERSION}\u{1e}");
        let _ = write!(canonical, "type={}\u{1e}", self.type_tag());
        let _ = write!(canonical, "name={}\u{1e}", decl.name());
        canonical.push_str("srcs=");
        for src in decl.srcs() {
            let _ = write!(canonical, "{src}\u{1f}");
        }
        canonical.push('\u{1e}');
        canonical.push_str("deps=");
        for dep in decl.deps() {
            let _ = write!(canonical, "{dep}\u{1f}");
        }
        canonical.push('\u{1e}');
        let _ = write!(canonical, "filter={}\u{1e}", decl.src_filter().unwrap_or(""));
        let _ = write!(canonical, "extra={}\u{1e}", self.fingerprint());

        let digest = Sha256::digest(canonical.as_bytes());
        let mut key = String::with_capacity(64);
        for byte in digest {
            let _ = write!(key, "{byte:02x}");
        }
        key
    }
}

/// Shared handle to a rule.
pub type RuleHandle = std::sync::Arc<dyn BuildRule>;

impl std::fmt::Debug for dyn BuildRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn BuildRule")
            .field("full_path", &self.decl().full_path())
            .field("type_tag", &self.type_tag())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct PlainRule(Rule);

    impl BuildRule for PlainRule {
        fn decl(&self) -> &Rule {
            &self.0
        }
        fn type_tag(&self) -> &'static str {
            "plain"
        }
    }

    fn plain(name: &str, srcs: &[&str], deps: &[&str]) -> PlainRule {
        PlainRule(
            Rule::new(
                name,
                srcs.iter().map(|s| s.to_string()).collect(),
                deps.iter().map(|s| s.to_string()).collect(),
                None,
            )
            .unwrap(),
        )
    }

    #[test]
    fn rule_names_are_validated() {
        for bad in ["", " ", " a", "a ", "a b", "a\n", "a\t", ":a"] {
            assert!(
                Rule::new(bad, vec![], vec![], None).is_err(),
                "expected error for {bad:?}",
            );
        }
        let rule = Rule::new("a", vec![], vec![], None).unwrap();
        assert_eq!(rule.name(), "a");
        assert_eq!(rule.full_path(), ":a");
    }

    #[test]
    fn srcs_and_deps_are_validated() {
        assert!(Rule::new("r", vec![" a".into()], vec![], None).is_err());
        assert!(Rule::new("r", vec!["".into()], vec![], None).is_err());
        // deps must be rule paths
        assert!(Rule::new("r", vec![], vec!["a".into()], None).is_err());
        assert!(Rule::new("r", vec![], vec![":a".into()], None).is_ok());
    }

    #[test]
    fn empty_src_filter_is_dropped() {
        let rule = Rule::new("a", vec![], vec![], Some(String::new())).unwrap();
        assert!(rule.src_filter().is_none());
        let rule = Rule::new("a", vec![], vec![], Some("*.js".into())).unwrap();
        assert_eq!(rule.src_filter(), Some("*.js"));
    }

    #[test]
    fn parent_binding_is_write_once() {
        let rule = Rule::new("a", vec![], vec![], None).unwrap();
        rule.bind_parent("sub/dir", "/root/sub/dir").unwrap();
        assert_eq!(rule.full_path(), "sub/dir:a");
        assert!(rule.bind_parent("other", "/root/other").is_err());
        assert_eq!(rule.full_path(), "sub/dir:a");
    }

    #[test]
    fn rule_refs_picks_rule_paths_from_srcs_and_deps() {
        let rule = plain("r", &["a.txt", ":x", "m:y"], &[":z"]);
        let refs: Vec<&str> = rule.decl().rule_refs().collect();
        assert_eq!(refs, vec![":x", "m:y", ":z"]);
    }

    #[test]
    fn cache_key_is_stable_and_sensitive() {
        let a1 = plain("r1", &[], &[]);
        let a2 = plain("r1", &[], &[]);
        let key = a1.cache_key();
        assert_eq!(key.len(), 64);
        assert_eq!(key, a1.cache_key());
        assert_eq!(key, a2.cache_key());

        assert_ne!(plain("r1", &[], &[]).cache_key(), plain("r2", &[], &[]).cache_key());
        assert_ne!(
            plain("r1", &["a"], &[]).cache_key(),
            plain("r1", &["b"], &[]).cache_key(),
        );
        assert_ne!(
            plain("r1", &[], &[":a"]).cache_key(),
            plain("r1", &[], &[":b"]).cache_key(),
        );
        assert_eq!(
            plain("r1", &["a"], &[":a"]).cache_key(),
            plain("r1", &["a"], &[":a"]).cache_key(),
        );
    }

    #[test]
    fn cache_key_changes_with_type_tag() {
        #[derive(Debug)]
        struct OtherType(Rule);
        impl BuildRule for OtherType {
            fn decl(&self) -> &Rule {
                &self.0
            }
            fn type_tag(&self) -> &'static str {
                "other"
            }
        }
        let a = plain("r1", &[], &[]);
        let b = OtherType(Rule::new("r1", vec![], vec![], None).unwrap());
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn from_decl_rejects_unknown_attrs() {
        let decls = forge_lang::parse_build_file(r#"plain("a", bogus: 1)"#).unwrap();
        assert!(Rule::from_decl(&decls[0], &[]).is_err());
        let decls = forge_lang::parse_build_file(r#"plain("a", srcs: ["x"], out: "y")"#).unwrap();
        let rule = Rule::from_decl(&decls[0], &["out"]).unwrap();
        assert_eq!(rule.srcs(), ["x".to_string()]);
    }
}
