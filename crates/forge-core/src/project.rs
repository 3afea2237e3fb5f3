//! Project — the module namespace rules resolve against.
//!
//! A project maps module paths to loaded modules and lazily pulls missing
//! modules through its [`ModuleResolver`] on first reference. Once a build
//! context is running the project is treated as immutable; lazy loading is
//! driven to a fixpoint before the dependency graph is built.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::error::{BuildReason, BuildResult, err};
use crate::module::{Module, ModuleLoader};
use crate::name;
use crate::registry::RuleRegistry;
use crate::rule::RuleHandle;

// ---------------------------------------------------------------------------
// ModuleResolver
// ---------------------------------------------------------------------------

/// Loads a module the first time a rule path references it.
pub trait ModuleResolver: Send + Sync {
    fn resolve_module(&self, module_path: &str) -> BuildResult<Module>;
}

/// Resolves module paths against a root directory of BUILD files.
///
/// A module path names either a directory (its `BUILD` file is loaded) or a
/// build file directly; the empty path is the root directory's `BUILD`.
pub struct FileModuleResolver {
    root: PathBuf,
    registry: Arc<RuleRegistry>,
    build_file_name: String,
}

impl FileModuleResolver {
    pub fn new(root: impl Into<PathBuf>, registry: Arc<RuleRegistry>) -> Self {
        Self {
            root: root.into(),
            registry,
            build_file_name: "BUILD".to_string(),
        }
    }
}

impl ModuleResolver for FileModuleResolver {
    fn resolve_module(&self, module_path: &str) -> BuildResult<Module> {
        let candidate = if module_path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(module_path)
        };
        let (file, dir) = if candidate.is_dir() {
            (candidate.join(&self.build_file_name), candidate)
        } else if candidate.is_file() {
            let dir = candidate
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| self.root.clone());
            (candidate, dir)
        } else {
            return Err(err(
                BuildReason::UnknownRule,
                format!("module \"{module_path}\" not found under {}", self.root.display()),
            ));
        };
        if !file.is_file() {
            return Err(err(
                BuildReason::UnknownRule,
                format!("module \"{module_path}\" has no build file at {}", file.display()),
            ));
        }
        ModuleLoader::new(&self.registry).load_file(module_path, &file, &dir)
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

pub struct Project {
    name: String,
    modules: RwLock<BTreeMap<String, Arc<Module>>>,
    resolver: Option<Box<dyn ModuleResolver>>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modules: RwLock::new(BTreeMap::new()),
            resolver: None,
        }
    }

    pub fn with_resolver(name: impl Into<String>, resolver: Box<dyn ModuleResolver>) -> Self {
        Self {
            name: name.into(),
            modules: RwLock::new(BTreeMap::new()),
            resolver: Some(resolver),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a fully-built module. Module paths are unique per project.
    pub fn add_module(&self, module: Module) -> BuildResult<()> {
        let mut modules = self.write_modules();
        let path = module.path().to_string();
        if modules.contains_key(&path) {
            return Err(err(
                BuildReason::DuplicateModule,
                format!("a module with the path \"{path}\" is already defined"),
            ));
        }
        modules.insert(path, Arc::new(module));
        Ok(())
    }

    /// Add a rule to the implicit root module (path `""`). Only valid while
    /// the project is being populated.
    pub fn add_rule(&self, rule: RuleHandle) -> BuildResult<()> {
        let mut modules = self.write_modules();
        let root = modules
            .entry(String::new())
            .or_insert_with(|| Arc::new(Module::new("", ".")));
        let Some(root) = Arc::get_mut(root) else {
            return Err(err(
                BuildReason::Programming,
                "project root module is frozen (a build is referencing it)",
            ));
        };
        root.add_rule(rule)
    }

    pub fn get_module(&self, module_path: &str) -> Option<Arc<Module>> {
        self.read_modules().get(module_path).cloned()
    }

    /// Loaded module paths in sorted order.
    pub fn module_paths(&self) -> Vec<String> {
        self.read_modules().keys().cloned().collect()
    }

    /// All rules of all loaded modules, ordered by module path then rule
    /// name. Deterministic for graph construction.
    pub fn rules(&self) -> Vec<RuleHandle> {
        self.read_modules()
            .values()
            .flat_map(|m| m.rules().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Canonicalize a reference against the requesting module: `":x"`
    /// becomes `"<requesting>:x"`.
    pub fn normalize_ref(requesting_module: Option<&str>, rule_path: &str) -> BuildResult<String> {
        let (module_path, rule_name) = name::split_rule_path(rule_path)?;
        if module_path.is_empty() {
            let base = requesting_module.unwrap_or("");
            Ok(format!("{base}:{rule_name}"))
        } else {
            Ok(format!("{module_path}:{rule_name}"))
        }
    }

    /// Resolve a rule path, loading its module on first reference.
    ///
    /// `requesting_module` anchors module-local references (`:name`); `None`
    /// anchors them at the root module.
    pub fn resolve_rule(
        &self,
        requesting_module: Option<&str>,
        rule_path: &str,
    ) -> BuildResult<RuleHandle> {
        let (module_path, rule_name) = name::split_rule_path(rule_path)?;
        let module_path = if module_path.is_empty() {
            requesting_module.unwrap_or("").to_string()
        } else {
            module_path.to_string()
        };
        let module = self.ensure_module(&module_path)?;
        module.get_rule(rule_name).ok_or_else(|| {
            err(
                BuildReason::UnknownRule,
                format!("rule \"{module_path}:{rule_name}\" not found in project"),
            )
        })
    }

    /// Resolve every rule reachable from `seeds` (rule paths), loading
    /// modules to a fixpoint. Returns the seeds' resolved handles.
    pub fn load_closure(&self, seeds: &[String]) -> BuildResult<Vec<RuleHandle>> {
        let mut resolved_seeds = Vec::with_capacity(seeds.len());
        let mut worklist: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for seed in seeds {
            let rule = self.resolve_rule(None, seed)?;
            let full = rule.decl().full_path();
            if seen.insert(full.clone()) {
                worklist.push(full);
            }
            resolved_seeds.push(rule);
        }

        while let Some(path) = worklist.pop() {
            let rule = self.resolve_rule(None, &path)?;
            let module_path = rule
                .decl()
                .parent()
                .map(|p| p.module_path.clone())
                .unwrap_or_default();
            let refs: Vec<String> = rule.decl().rule_refs().map(str::to_string).collect();
            for reference in refs {
                let full = Self::normalize_ref(Some(&module_path), &reference)?;
                // Resolution failures surface later as graph errors with the
                // dependent rule named; here we only force module loading.
                let _ = self.resolve_rule(None, &full);
                if seen.insert(full.clone()) {
                    worklist.push(full);
                }
            }
        }
        Ok(resolved_seeds)
    }

    fn ensure_module(&self, module_path: &str) -> BuildResult<Arc<Module>> {
        if let Some(module) = self.get_module(module_path) {
            return Ok(module);
        }
        let Some(resolver) = &self.resolver else {
            return Err(err(
                BuildReason::UnknownRule,
                format!("module \"{module_path}\" is not loaded and the project has no resolver"),
            ));
        };
        let module = resolver.resolve_module(module_path)?;
        let mut modules = self.write_modules();
        // Another caller may have raced us here; first insertion wins.
        let entry = modules
            .entry(module_path.to_string())
            .or_insert_with(|| Arc::new(module));
        Ok(Arc::clone(entry))
    }

    fn read_modules(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<Module>>> {
        self.modules.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_modules(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<Module>>> {
        self.modules.write().unwrap_or_else(|p| p.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
