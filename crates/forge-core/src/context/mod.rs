//! Build context — the per-build driver.
//!
//! A [`BuildContext`] runs one build of a target set: it validates targets,
//! computes the rule sequence, and pumps rules into the task executor while
//! honoring live dependencies. The pump is a single supervisor loop
//! consuming a completion channel; rule-completion subscribers post into the
//! channel and the loop issues whatever became unblocked. All driver state
//! mutation happens in that one flow.
//!
//! Contexts are single-use: to run another build, construct a new one over
//! the same project.

mod rule_ctx;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::env::BuildEnvironment;
use crate::error::{BuildError, BuildReason, BuildResult, err};
use crate::graph::RuleGraph;
use crate::name;
use crate::project::Project;
use crate::rule::RuleHandle;
use crate::task::{InProcessTaskExecutor, TaskExecutor};

pub use rule_ctx::RuleContext;

// ---------------------------------------------------------------------------
// Status and options
// ---------------------------------------------------------------------------

/// Lifecycle state of a rule (and of a build as a whole).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStatus {
    Waiting,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Ignore cached artifacts and rebuild everything.
    pub force: bool,
    /// Stop issuing new rules after the first failure; in-flight rules
    /// finish.
    pub stop_on_error: bool,
    /// Return the first non-cascade error from `execute` instead of a
    /// `false` success flag.
    pub raise_on_error: bool,
}

// ---------------------------------------------------------------------------
// BuildContext
// ---------------------------------------------------------------------------

pub struct BuildContext {
    env: Arc<BuildEnvironment>,
    project: Arc<Project>,
    executor: Arc<dyn TaskExecutor>,
    owns_executor: bool,
    options: BuildOptions,
    rule_contexts: HashMap<String, RuleContext>,
    executed: bool,
}

impl BuildContext {
    /// Construct with an owned in-process executor. The context closes the
    /// executor when the build finishes.
    pub fn new(env: BuildEnvironment, project: Arc<Project>, options: BuildOptions) -> Self {
        Self {
            env: Arc::new(env),
            project,
            executor: Arc::new(InProcessTaskExecutor::new()),
            owns_executor: true,
            options,
            rule_contexts: HashMap::new(),
            executed: false,
        }
    }

    /// Construct over a caller-owned executor; the caller closes it.
    pub fn with_executor(
        env: BuildEnvironment,
        project: Arc<Project>,
        options: BuildOptions,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            env: Arc::new(env),
            project,
            executor,
            owns_executor: false,
            options,
            rule_contexts: HashMap::new(),
            executed: false,
        }
    }

    pub fn env(&self) -> &BuildEnvironment {
        &self.env
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Run the targets to completion. Returns `true` iff every issued rule
    /// succeeded. Target validation failures (bad syntax, unknown rules,
    /// graph errors) return an error before any rule runs.
    pub async fn execute<S: AsRef<str>>(&mut self, targets: &[S]) -> BuildResult<bool> {
        if self.executed {
            return Err(err(
                BuildReason::Programming,
                "build context is single-use; construct a new one",
            ));
        }
        self.executed = true;

        let result = self.run(targets).await;
        if self.owns_executor
            && let Err(close_error) = self.executor.close(true).await
        {
            log::warn!("executor close failed: {close_error}");
        }
        result
    }

    /// Status and outputs of a rule. Rules never scheduled report
    /// `(Waiting, [])`.
    pub fn get_rule_results(&self, rule_path: &str) -> BuildResult<(RuleStatus, Vec<PathBuf>)> {
        let rule = self.project.resolve_rule(None, rule_path)?;
        let full = rule.decl().full_path();
        Ok(match self.rule_contexts.get(&full) {
            Some(ctx) => (ctx.status(), ctx.output_paths()),
            None => (RuleStatus::Waiting, Vec::new()),
        })
    }

    /// Just the output path list of a rule.
    pub fn get_rule_outputs(&self, rule_path: &str) -> BuildResult<Vec<PathBuf>> {
        Ok(self.get_rule_results(rule_path)?.1)
    }

    /// The first non-cascade failure of the build, if any rule failed.
    pub fn first_error(&self) -> Option<BuildError> {
        let mut cascade = None;
        for ctx in self.rule_contexts.values() {
            if let Some(error) = ctx.error() {
                if ctx.is_cascaded() {
                    cascade.get_or_insert(error);
                } else {
                    return Some(error);
                }
            }
        }
        cascade
    }

    /// Rule contexts created by this build, keyed by full rule path.
    pub fn rule_contexts(&self) -> impl Iterator<Item = (&String, &RuleContext)> {
        self.rule_contexts.iter()
    }

    // -- driver loop ---------------------------------------------------------

    async fn run<S: AsRef<str>>(&mut self, targets: &[S]) -> BuildResult<bool> {
        // 1. Validate every target early: well-formed rule path, resolves.
        let mut target_paths = Vec::with_capacity(targets.len());
        for target in targets {
            let target = target.as_ref();
            name::validate_refs(&[target], true)?;
            let rule = self.project.resolve_rule(None, target)?;
            target_paths.push(rule.decl().full_path());
        }

        // 2. Load the reachable module closure, then build graph + sequence.
        self.project.load_closure(&target_paths)?;
        let graph = RuleGraph::build(&self.project)?;
        let sequence = graph.sequence(&target_paths)?;
        log::info!(
            "executing {} rule(s) for {} target(s)",
            sequence.len(),
            target_paths.len(),
        );

        // 3. Pump: issue unblocked rules, consume one completion, repeat.
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(String, bool)>();
        let mut remaining: VecDeque<RuleHandle> = sequence.into();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut any_failed = false;

        loop {
            'issue: while let Some(next) = remaining.front() {
                let next_path = next.decl().full_path();
                for running in &in_flight {
                    if graph.depends_on(&next_path, running)? {
                        // Head of queue is blocked on live work; everything
                        // behind it waits too.
                        break 'issue;
                    }
                }
                let rule = remaining.pop_front().expect("peeked head");
                in_flight.insert(next_path);
                self.issue(rule, &done_tx)?;
            }

            if remaining.is_empty() && in_flight.is_empty() {
                break;
            }

            // We hold a sender, so recv only yields real completions.
            let Some((path, failed)) = done_rx.recv().await else {
                break;
            };
            in_flight.remove(&path);
            if failed {
                any_failed = true;
                if self.options.stop_on_error && !remaining.is_empty() {
                    log::info!(
                        "stopping after failure of {path}: {} rule(s) not issued",
                        remaining.len(),
                    );
                    remaining.clear();
                }
            }
        }

        if any_failed {
            if self.options.raise_on_error {
                return Err(self
                    .first_error()
                    .unwrap_or_else(|| err(BuildReason::TaskFailed, "build failed")));
            }
            return Ok(false);
        }
        Ok(true)
    }

    /// Create the rule's context and start it: cascade if a predecessor
    /// failed, otherwise resolve sources and invoke `begin`. The context's
    /// completion is wired into the pump channel before anything can
    /// resolve it.
    fn issue(
        &mut self,
        rule: RuleHandle,
        done_tx: &mpsc::UnboundedSender<(String, bool)>,
    ) -> BuildResult<()> {
        let path = rule.decl().full_path();
        log::debug!("issuing {path}");

        let predecessor_failed = self.any_predecessor_failed(&rule)?;
        let ctx = RuleContext::new(
            Arc::clone(&self.env),
            Arc::clone(&self.project),
            Arc::clone(&self.executor),
            Arc::clone(&rule),
            predecessor_failed,
        );

        let completion = ctx.completion();
        {
            let tx = done_tx.clone();
            let path = path.clone();
            completion.on_success(move |_| {
                let _ = tx.send((path, false));
            });
        }
        {
            let tx = done_tx.clone();
            let path = path.clone();
            completion.on_failure(move |_| {
                let _ = tx.send((path, true));
            });
        }

        self.rule_contexts.insert(path.clone(), ctx.clone());

        if predecessor_failed {
            log::debug!("cascading failure into {path}");
            return ctx.cascade_failure();
        }

        let resolve_result = {
            let contexts = &self.rule_contexts;
            let lookup = |full: &str| -> BuildResult<Vec<PathBuf>> {
                let Some(pred) = contexts.get(full) else {
                    return Err(err(
                        BuildReason::Programming,
                        format!("predecessor \"{full}\" has not executed"),
                    ));
                };
                match pred.status() {
                    RuleStatus::Succeeded => Ok(pred.output_paths()),
                    other => Err(err(
                        BuildReason::Programming,
                        format!("predecessor \"{full}\" is {other:?}, not Succeeded"),
                    )),
                }
            };
            ctx.resolve_sources(&lookup)
        };
        if let Err(error) = resolve_result {
            log::debug!("source resolution for {path} failed: {error}");
            return ctx.fail(error);
        }

        ctx.mark_running()?;
        if let Err(error) = rule.begin(ctx.clone()) {
            log::debug!("begin of {path} failed: {error}");
            return ctx.fail(error);
        }
        Ok(())
    }

    /// True iff any direct predecessor (rule reference in srcs/deps) ended
    /// `Failed`. Cascades propagate transitively because the predecessor's
    /// own context is already `Failed` when this rule is issued.
    fn any_predecessor_failed(&self, rule: &RuleHandle) -> BuildResult<bool> {
        let decl = rule.decl();
        let module_path = decl.parent().map(|p| p.module_path.clone()).unwrap_or_default();
        for reference in decl.rule_refs() {
            let full = Project::normalize_ref(Some(&module_path), reference)?;
            if let Some(pred) = self.rule_contexts.get(&full)
                && pred.status() == RuleStatus::Failed
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
