//! Per-rule execution state and the API surface rule bodies program
//! against.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use orion_error::ErrorOwe;
use orion_error::prelude::*;
use wildmatch::WildMatch;

use crate::deferred::{Deferred, gather};
use crate::env::BuildEnvironment;
use crate::error::{BuildError, BuildReason, BuildResult, err};
use crate::name;
use crate::project::Project;
use crate::rule::RuleHandle;
use crate::task::{Task, TaskExecutor, TaskValue};

use super::RuleStatus;

// ---------------------------------------------------------------------------
// RuleContext
// ---------------------------------------------------------------------------

struct RuleState {
    status: RuleStatus,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    output_paths: Vec<PathBuf>,
    error: Option<BuildError>,
    cascaded: bool,
}

struct RuleContextInner {
    rule: RuleHandle,
    env: Arc<BuildEnvironment>,
    project: Arc<Project>,
    executor: Arc<dyn TaskExecutor>,
    completion: Deferred<()>,
    predecessor_failed: bool,
    src_paths: OnceLock<Vec<PathBuf>>,
    state: Mutex<RuleState>,
}

/// Cheap, cloneable handle to one rule's execution state. Created exactly
/// once per rule per build; mutated only by its own rule flow.
#[derive(Clone)]
pub struct RuleContext {
    inner: Arc<RuleContextInner>,
}

impl RuleContext {
    pub(crate) fn new(
        env: Arc<BuildEnvironment>,
        project: Arc<Project>,
        executor: Arc<dyn TaskExecutor>,
        rule: RuleHandle,
        predecessor_failed: bool,
    ) -> Self {
        Self {
            inner: Arc::new(RuleContextInner {
                rule,
                env,
                project,
                executor,
                completion: Deferred::new(),
                predecessor_failed,
                src_paths: OnceLock::new(),
                state: Mutex::new(RuleState {
                    status: RuleStatus::Waiting,
                    start_time: None,
                    end_time: None,
                    output_paths: Vec::new(),
                    error: None,
                    cascaded: false,
                }),
            }),
        }
    }

    // -- read-only references ------------------------------------------------

    pub fn rule(&self) -> &RuleHandle {
        &self.inner.rule
    }

    pub fn build_env(&self) -> &BuildEnvironment {
        &self.inner.env
    }

    pub fn project(&self) -> &Project {
        &self.inner.project
    }

    pub fn rule_path(&self) -> String {
        self.inner.rule.decl().full_path()
    }

    pub fn status(&self) -> RuleStatus {
        self.lock().status
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.lock().start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.lock().end_time
    }

    pub fn error(&self) -> Option<BuildError> {
        self.lock().error.clone()
    }

    /// The rule's completion deferred; resolves when the rule reaches a
    /// terminal status.
    pub fn completion(&self) -> Deferred<()> {
        self.inner.completion.clone()
    }

    /// Resolved absolute source paths. Empty until the driver issues the
    /// rule (and stays empty for cascade failures).
    pub fn src_paths(&self) -> Vec<PathBuf> {
        self.inner.src_paths.get().cloned().unwrap_or_default()
    }

    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.lock().output_paths.clone()
    }

    // -- source resolution ---------------------------------------------------

    /// Resolve the rule's `srcs` once, at issue time.
    ///
    /// Rule references substitute the referenced rule's outputs (looked up
    /// through `predecessor_outputs`); other entries are files or globs
    /// relative to the module directory. `src_filter` applies to file/glob
    /// entries only. The result is de-duplicated preserving order.
    pub(crate) fn resolve_sources(
        &self,
        predecessor_outputs: &dyn Fn(&str) -> BuildResult<Vec<PathBuf>>,
    ) -> BuildResult<()> {
        let decl = self.inner.rule.decl();
        let module_dir = decl.module_dir().unwrap_or(Path::new(".")).to_path_buf();
        let module_path = decl.parent().map(|p| p.module_path.clone()).unwrap_or_default();
        let filter = decl.src_filter().map(WildMatch::new);

        let mut resolved: Vec<PathBuf> = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut push = |path: PathBuf, resolved: &mut Vec<PathBuf>| {
            if seen.insert(path.clone()) {
                resolved.push(path);
            }
        };

        for src in decl.srcs() {
            if name::is_rule_path(src) {
                let full = Project::normalize_ref(Some(&module_path), src)?;
                // Surfaces UnknownRule for dangling references.
                self.inner.project.resolve_rule(None, &full)?;
                for path in predecessor_outputs(&full)? {
                    push(path, &mut resolved);
                }
            } else if name::is_glob(src) {
                let pattern = module_dir.join(src);
                let pattern = pattern.to_str().ok_or_else(|| {
                    err(BuildReason::BadName, format!("non-UTF-8 source pattern: {src}"))
                })?;
                let mut matches: Vec<PathBuf> = Vec::new();
                for entry in glob::glob(pattern)
                    .map_err(|e| err(BuildReason::BadName, format!("bad glob \"{src}\": {e}")))?
                {
                    let path = entry.owe_sys()?;
                    matches.push(path);
                }
                // Filesystem enumeration order is not stable; sort so the
                // resolved list is.
                matches.sort();
                for path in matches {
                    if Self::filter_matches(&filter, &path) {
                        push(path, &mut resolved);
                    }
                }
            } else {
                let path = module_dir.join(src);
                // A direct reference must exist.
                std::fs::metadata(&path)
                    .owe_sys()
                    .map_err(|e| e.with_detail(format!("source \"{src}\" of rule \"{}\"", decl.full_path())))?;
                if Self::filter_matches(&filter, &path) {
                    push(path, &mut resolved);
                }
            }
        }

        self.inner.src_paths.set(resolved).map_err(|_| {
            err(
                BuildReason::Programming,
                format!("sources of rule \"{}\" resolved twice", decl.full_path()),
            )
        })
    }

    fn filter_matches(filter: &Option<WildMatch>, path: &Path) -> bool {
        match filter {
            None => true,
            Some(filter) => path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| filter.matches(n)),
        }
    }

    // -- output path derivation ----------------------------------------------

    /// Module directory relative to the environment root; positions the
    /// rule's subtree under `build-out`/`build-gen`.
    fn rel_module_dir(&self) -> PathBuf {
        let dir = self
            .inner
            .rule
            .decl()
            .module_dir()
            .unwrap_or(Path::new("."))
            .to_path_buf();
        if let Ok(rel) = dir.strip_prefix(self.inner.env.root_path()) {
            return rel.to_path_buf();
        }
        if dir == Path::new(".") {
            return PathBuf::new();
        }
        if dir.is_relative() { dir } else { PathBuf::new() }
    }

    fn target_path(&self, root: PathBuf, name: Option<&str>, suffix: Option<&str>) -> PathBuf {
        let base = name.unwrap_or_else(|| self.inner.rule.decl().name());
        let file = format!("{base}{}", suffix.unwrap_or(""));
        root.join(self.rel_module_dir()).join(file)
    }

    fn target_path_for_src(&self, root: PathBuf, src: &Path) -> PathBuf {
        let module_dir = self
            .inner
            .rule
            .decl()
            .module_dir()
            .unwrap_or(Path::new("."))
            .to_path_buf();
        let rel = src
            .strip_prefix(&module_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(src.file_name().unwrap_or(src.as_os_str())));
        root.join(self.rel_module_dir()).join(rel)
    }

    /// `<root>/build-out/<module-rel-dir>/<name><suffix>`. Pure function of
    /// environment, rule path, and arguments.
    pub fn out_path(&self, name: Option<&str>, suffix: Option<&str>) -> PathBuf {
        self.target_path(self.inner.env.out_root(), name, suffix)
    }

    /// `<root>/build-gen/<module-rel-dir>/<name><suffix>`.
    pub fn gen_path(&self, name: Option<&str>, suffix: Option<&str>) -> PathBuf {
        self.target_path(self.inner.env.gen_root(), name, suffix)
    }

    /// A source's counterpart under `build-out`, preserving its position
    /// relative to the module directory.
    pub fn out_path_for_src(&self, src: &Path) -> PathBuf {
        self.target_path_for_src(self.inner.env.out_root(), src)
    }

    /// A source's counterpart under `build-gen`.
    pub fn gen_path_for_src(&self, src: &Path) -> PathBuf {
        self.target_path_for_src(self.inner.env.gen_root(), src)
    }

    /// Idempotent directory creation for an output target.
    pub fn ensure_output_exists(&self, dir: &Path) -> BuildResult<()> {
        std::fs::create_dir_all(dir)
            .owe_sys()
            .map_err(|e| e.with_detail(format!("creating {}", dir.display())))
    }

    // -- task submission and completion chaining -----------------------------

    /// Record produced outputs, in the order the rule appends them.
    pub fn append_output_paths(&self, paths: Vec<PathBuf>) {
        self.lock().output_paths.extend(paths);
    }

    /// Submit a task to the build's executor.
    pub fn run_task_async(&self, task: Box<dyn Task>) -> BuildResult<Deferred<TaskValue>> {
        self.inner.executor.submit(task)
    }

    /// Bind child deferreds to the rule's completion: all succeed → the
    /// rule succeeds; the first failure fails the rule with that error.
    pub fn chain(&self, deferreds: &[Deferred<TaskValue>]) {
        let combined = gather(deferreds, true);
        let ctx = self.clone();
        combined.on_success(move |_| {
            if let Err(e) = ctx.succeed() {
                log::warn!("rule {} completed twice: {e}", ctx.rule_path());
            }
        });
        let ctx = self.clone();
        combined.on_failure(move |error| {
            let error = error.clone();
            if let Err(e) = ctx.fail(error) {
                log::warn!("rule {} completed twice: {e}", ctx.rule_path());
            }
        });
    }

    /// Forward failure only — for fan-out flows whose success arms chain
    /// separately.
    pub fn chain_errback(&self, deferred: &Deferred<TaskValue>) {
        let ctx = self.clone();
        deferred.on_failure(move |error| {
            let error = error.clone();
            if let Err(e) = ctx.fail(error) {
                log::warn!("rule {} completed twice: {e}", ctx.rule_path());
            }
        });
    }

    // -- state transitions ---------------------------------------------------

    /// True iff any predecessor rule finished `Failed`.
    pub fn check_predecessor_failures(&self) -> bool {
        self.inner.predecessor_failed
    }

    /// Whether this rule failed because a predecessor did.
    pub fn is_cascaded(&self) -> bool {
        self.lock().cascaded
    }

    /// Waiting → Running; stamps the start time.
    pub(crate) fn mark_running(&self) -> BuildResult<()> {
        let mut state = self.lock();
        if state.status != RuleStatus::Waiting {
            return Err(err(
                BuildReason::Programming,
                format!("rule \"{}\" began twice", self.rule_path()),
            ));
        }
        state.status = RuleStatus::Running;
        state.start_time = Some(Utc::now());
        Ok(())
    }

    /// Terminal failure assigned without invoking `begin`, because a
    /// predecessor failed.
    pub fn cascade_failure(&self) -> BuildResult<()> {
        let error = err(
            BuildReason::Cascaded,
            format!("rule \"{}\" skipped: a dependency failed", self.rule_path()),
        );
        {
            let mut state = self.lock();
            if matches!(state.status, RuleStatus::Succeeded | RuleStatus::Failed) {
                return Err(err(
                    BuildReason::Programming,
                    format!("rule \"{}\" already completed", self.rule_path()),
                ));
            }
            state.status = RuleStatus::Failed;
            state.end_time = Some(Utc::now());
            state.error = Some(error.clone());
            state.cascaded = true;
        }
        self.inner.completion.fail(error)
    }

    /// Terminal transition to `Succeeded`; resolves the completion.
    pub fn succeed(&self) -> BuildResult<()> {
        {
            let mut state = self.lock();
            if matches!(state.status, RuleStatus::Succeeded | RuleStatus::Failed) {
                return Err(err(
                    BuildReason::Programming,
                    format!("rule \"{}\" already completed", self.rule_path()),
                ));
            }
            state.status = RuleStatus::Succeeded;
            state.end_time = Some(Utc::now());
        }
        self.inner.completion.succeed(())
    }

    /// Terminal transition to `Failed`; resolves the completion with the
    /// error.
    pub fn fail(&self, error: BuildError) -> BuildResult<()> {
        {
            let mut state = self.lock();
            if matches!(state.status, RuleStatus::Succeeded | RuleStatus::Failed) {
                return Err(err(
                    BuildReason::Programming,
                    format!("rule \"{}\" already completed", self.rule_path()),
                ));
            }
            state.status = RuleStatus::Failed;
            state.end_time = Some(Utc::now());
            state.error = Some(error.clone());
        }
        self.inner.completion.fail(error)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RuleState> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}
