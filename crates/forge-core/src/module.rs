//! Module — a flat namespace of rules.
//!
//! Modules serve organization only; cross-module resolution happens at the
//! project level, which allows lazy loading. A module's path doubles as the
//! module component of its rules' full paths, and its directory anchors
//! their relative source patterns.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use orion_error::ErrorOwe;
use orion_error::prelude::*;

use crate::error::{BuildReason, BuildResult, err};
use crate::registry::RuleRegistry;
use crate::rule::RuleHandle;

#[derive(Debug)]
pub struct Module {
    path: String,
    dir: PathBuf,
    rules: BTreeMap<String, RuleHandle>,
}

impl Module {
    /// `path` is the module's reference form (empty for the root module);
    /// `dir` is the directory anchoring its relative source patterns.
    pub fn new(path: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            dir: dir.into(),
            rules: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Add a rule, binding it to this module. The name must be unique
    /// within the module.
    pub fn add_rule(&mut self, rule: RuleHandle) -> BuildResult<()> {
        let name = rule.decl().name().to_string();
        if self.rules.contains_key(&name) {
            return Err(err(
                BuildReason::DuplicateRule,
                format!("a rule named \"{name}\" is already defined in \"{}\"", self.path),
            ));
        }
        rule.decl().bind_parent(&self.path, self.dir.clone())?;
        self.rules.insert(name, rule);
        Ok(())
    }

    /// Look up a rule by name. A leading `:` is accepted and stripped.
    pub fn get_rule(&self, rule_name: &str) -> Option<RuleHandle> {
        let rule_name = rule_name.strip_prefix(':').unwrap_or(rule_name);
        self.rules.get(rule_name).cloned()
    }

    /// Rules in name order.
    pub fn rules(&self) -> impl Iterator<Item = &RuleHandle> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ModuleLoader — BUILD file → Module
// ---------------------------------------------------------------------------

/// Loads one module from a BUILD file: read, parse, instantiate every
/// declaration through the registry, and collect the rules under the file's
/// module path.
pub struct ModuleLoader<'a> {
    registry: &'a RuleRegistry,
}

impl<'a> ModuleLoader<'a> {
    pub fn new(registry: &'a RuleRegistry) -> Self {
        Self { registry }
    }

    /// Load `file` as the module `module_path` anchored at `dir`.
    pub fn load_file(&self, module_path: &str, file: &Path, dir: &Path) -> BuildResult<Module> {
        let source = std::fs::read_to_string(file)
            .owe_sys()
            .map_err(|e| e.with_detail(format!("reading {}", file.display())))?;
        self.load_source(module_path, dir, &source)
            .map_err(|e| e.with_detail(format!("in {}", file.display())))
    }

    /// Load already-read source text as the module `module_path`.
    pub fn load_source(&self, module_path: &str, dir: &Path, source: &str) -> BuildResult<Module> {
        let decls = forge_lang::parse_build_file(source)
            .map_err(|e| err(BuildReason::Parse, e.to_string()))?;

        let mut module = Module::new(module_path, dir);
        for decl in &decls {
            let rule = self.registry.instantiate(decl)?;
            module.add_rule(rule)?;
        }
        log::debug!(
            "loaded module \"{module_path}\" with {} rule(s)",
            module.len(),
        );
        Ok(module)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::rule::{BuildRule, Rule};

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

    fn plain(name: &str) -> RuleHandle {
        Arc::new(PlainRule(Rule::new(name, vec![], vec![], None).unwrap()))
    }

    fn plain_ctor(decl: &forge_lang::RuleDecl) -> BuildResult<RuleHandle> {
        Ok(Arc::new(PlainRule(Rule::from_decl(decl, &[])?)))
    }

    #[test]
    fn add_and_get() {
        let mut module = Module::new("sub/dir", "/root/sub/dir");
        module.add_rule(plain("a")).unwrap();
        module.add_rule(plain("b")).unwrap();
        assert_eq!(module.len(), 2);

        let a = module.get_rule("a").unwrap();
        assert_eq!(a.decl().full_path(), "sub/dir:a");
        assert!(module.get_rule(":a").is_some());
        assert!(module.get_rule("missing").is_none());
    }

    #[test]
    fn duplicate_rule_name_is_rejected() {
        let mut module = Module::new("m", "/root/m");
        module.add_rule(plain("a")).unwrap();
        let error = module.add_rule(plain("a")).unwrap_err();
        assert!(error.to_string().contains("already defined"), "got: {error}");
    }

    #[test]
    fn loader_builds_module_from_source() {
        let mut registry = RuleRegistry::new();
        registry.register("plain", plain_ctor).unwrap();
        let loader = ModuleLoader::new(&registry);

        let source = r#"
plain("a", srcs: ["a.txt"])
plain("b", deps: [":a"])
"#;
        let module = loader
            .load_source("sub", Path::new("/root/sub"), source)
            .unwrap();
        assert_eq!(module.len(), 2);
        assert_eq!(module.get_rule("b").unwrap().decl().deps(), [":a".to_string()]);
    }

    #[test]
    fn loader_surfaces_parse_and_symbol_errors() {
        let mut registry = RuleRegistry::new();
        registry.register("plain", plain_ctor).unwrap();
        let loader = ModuleLoader::new(&registry);

        let error = loader
            .load_source("m", Path::new("/root/m"), "plain(")
            .unwrap_err();
        assert!(error.to_string().contains("parse"), "got: {error}");

        let error = loader
            .load_source("m", Path::new("/root/m"), r#"mystery("a")"#)
            .unwrap_err();
        assert!(error.to_string().contains("unknown rule type"), "got: {error}");
    }

    #[test]
    fn loader_rejects_duplicate_names_in_one_file() {
        let mut registry = RuleRegistry::new();
        registry.register("plain", plain_ctor).unwrap();
        let loader = ModuleLoader::new(&registry);
        let source = "plain(\"a\")\nplain(\"a\")\n";
        assert!(loader.load_source("m", Path::new("/root/m"), source).is_err());
    }

    #[test]
    fn loader_missing_file_is_io_error() {
        let registry = RuleRegistry::new();
        let loader = ModuleLoader::new(&registry);
        let missing = Path::new("/definitely/not/here/BUILD");
        assert!(loader.load_file("m", missing, missing.parent().unwrap()).is_err());
    }
}
