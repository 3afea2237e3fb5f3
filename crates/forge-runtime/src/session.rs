//! Build session — bootstrap and one-shot build runs.
//!
//! A session wires together the pieces a command needs: the rule registry,
//! a file module resolver rooted at the workspace, the project, and a task
//! executor sized from the jobs option. Each `run` constructs a fresh
//! [`BuildContext`] (contexts are single-use); the session owns the
//! executor across runs and closes it on shutdown.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use orion_error::ErrorOweBase;
use orion_error::op_context;
use orion_error::prelude::*;

use forge_core::context::{BuildContext, BuildOptions, RuleStatus};
use forge_core::env::BuildEnvironment;
use forge_core::project::{FileModuleResolver, Project};
use forge_core::registry::RuleRegistry;
use forge_core::task::{InProcessTaskExecutor, TaskExecutor};

use crate::error::{RuntimeReason, RuntimeResult};
use crate::pool::PooledTaskExecutor;

// ---------------------------------------------------------------------------
// Options and report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Worker count; `Some(1)` selects the in-process executor, `None` the
    /// host parallelism.
    pub jobs: Option<usize>,
    pub force: bool,
    pub stop_on_error: bool,
    pub raise_on_error: bool,
}

/// Outcome of one rule in a finished build.
#[derive(Debug, Clone)]
pub struct RuleSummary {
    pub path: String,
    pub status: RuleStatus,
    pub cascaded: bool,
    pub error: Option<String>,
    pub output_paths: Vec<PathBuf>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Outcome of one `run` call.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub success: bool,
    /// Output paths per requested target, in target order.
    pub target_outputs: BTreeMap<String, Vec<PathBuf>>,
    /// Every rule the build touched, sorted by rule path.
    pub rules: Vec<RuleSummary>,
}

impl BuildReport {
    /// Union of all targets' outputs, sorted and de-duplicated.
    pub fn all_outputs(&self) -> Vec<PathBuf> {
        let mut outputs: Vec<PathBuf> = self
            .target_outputs
            .values()
            .flatten()
            .cloned()
            .collect();
        outputs.sort();
        outputs.dedup();
        outputs
    }
}

// ---------------------------------------------------------------------------
// BuildSession
// ---------------------------------------------------------------------------

pub struct BuildSession {
    env: BuildEnvironment,
    project: Arc<Project>,
    executor: Arc<dyn TaskExecutor>,
    options: SessionOptions,
}

impl BuildSession {
    /// Assemble a session over a workspace root. Must run inside a tokio
    /// runtime (the pooled executor spawns its dispatcher).
    pub fn bootstrap(
        root: &Path,
        project_name: &str,
        registry: RuleRegistry,
        options: SessionOptions,
    ) -> RuntimeResult<Self> {
        let root = root
            .canonicalize()
            .owe(RuntimeReason::Bootstrap)
            .map_err(|e| e.with_detail(format!("workspace root {}", root.display())))?;

        let registry = Arc::new(registry);
        let resolver = FileModuleResolver::new(&root, Arc::clone(&registry));
        let project = Arc::new(Project::with_resolver(project_name, Box::new(resolver)));

        let executor: Arc<dyn TaskExecutor> = match options.jobs {
            Some(1) => Arc::new(InProcessTaskExecutor::new()),
            jobs => Arc::new(PooledTaskExecutor::new(jobs)),
        };

        fg_info!(
            sys,
            root = %root.display(),
            jobs = options.jobs.map(|j| j as i64).unwrap_or(-1),
            "session bootstrap complete"
        );

        Ok(Self {
            env: BuildEnvironment::new(root),
            project,
            executor,
            options,
        })
    }

    pub fn env(&self) -> &BuildEnvironment {
        &self.env
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    /// Run one build of the given targets and collect a report.
    pub async fn run(&self, targets: &[String]) -> RuntimeResult<BuildReport> {
        let mut op = op_context!("build").with_auto_log();
        op.record("targets", targets.join(" ").as_str());

        let build_options = BuildOptions {
            force: self.options.force,
            stop_on_error: self.options.stop_on_error,
            raise_on_error: self.options.raise_on_error,
        };
        let mut ctx = BuildContext::with_executor(
            self.env.clone(),
            Arc::clone(&self.project),
            build_options,
            Arc::clone(&self.executor),
        );

        let success = ctx.execute(targets).await.owe(RuntimeReason::Build)?;

        let mut target_outputs = BTreeMap::new();
        for target in targets {
            let (_, outputs) = ctx
                .get_rule_results(target)
                .owe(RuntimeReason::Build)?;
            target_outputs.insert(target.clone(), outputs);
        }

        let mut rules: Vec<RuleSummary> = ctx
            .rule_contexts()
            .map(|(path, rule_ctx)| RuleSummary {
                path: path.clone(),
                status: rule_ctx.status(),
                cascaded: rule_ctx.is_cascaded(),
                error: rule_ctx.error().map(|e| e.to_string()),
                output_paths: rule_ctx.output_paths(),
                start_time: rule_ctx.start_time(),
                end_time: rule_ctx.end_time(),
            })
            .collect();
        rules.sort_by(|a, b| a.path.cmp(&b.path));

        fg_info!(
            sys,
            success = success,
            rules = rules.len(),
            "build finished"
        );
        op.mark_suc();
        Ok(BuildReport {
            success,
            target_outputs,
            rules,
        })
    }

    /// Close the session's executor, waiting for in-flight work.
    pub async fn shutdown(self) -> RuntimeResult<()> {
        self.executor.close(true).await.owe(RuntimeReason::Shutdown)
    }
}
