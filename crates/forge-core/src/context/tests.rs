use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::*;
use crate::error::{BuildReason, err};
use crate::module::Module;
use crate::rule::{BuildRule, Rule};
use crate::task::{Task, TaskValue};

// ---------------------------------------------------------------------------
// Test rule types
// ---------------------------------------------------------------------------

/// Records the order rule bodies were entered.
#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl Recorder {
    fn push(&self, path: String) {
        self.0.lock().unwrap().push(path);
    }
    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Succeeds immediately, recording that `begin` ran.
struct NoopRule {
    rule: Rule,
    recorder: Arc<Recorder>,
}

impl BuildRule for NoopRule {
    fn decl(&self) -> &Rule {
        &self.rule
    }
    fn type_tag(&self) -> &'static str {
        "noop"
    }
    fn begin(&self, ctx: RuleContext) -> BuildResult<()> {
        self.recorder.push(ctx.rule_path());
        ctx.succeed()
    }
}

/// Outputs are exactly the resolved source paths.
struct PassThroughRule {
    rule: Rule,
}

impl BuildRule for PassThroughRule {
    fn decl(&self) -> &Rule {
        &self.rule
    }
    fn type_tag(&self) -> &'static str {
        "pass_through"
    }
    fn begin(&self, ctx: RuleContext) -> BuildResult<()> {
        ctx.append_output_paths(ctx.src_paths());
        ctx.succeed()
    }
}

/// Always fails from `begin`.
struct FailingRule {
    rule: Rule,
    recorder: Arc<Recorder>,
}

impl BuildRule for FailingRule {
    fn decl(&self) -> &Rule {
        &self.rule
    }
    fn type_tag(&self) -> &'static str {
        "failing"
    }
    fn begin(&self, ctx: RuleContext) -> BuildResult<()> {
        self.recorder.push(ctx.rule_path());
        Err(err(BuildReason::TaskFailed, "intentional failure"))
    }
}

struct DoubleTask(i64);

impl Task for DoubleTask {
    fn name(&self) -> &str {
        "double"
    }
    fn run(self: Box<Self>) -> BuildResult<TaskValue> {
        Ok(TaskValue::from(self.0 * 2))
    }
}

/// Submits tasks through the executor and chains them to completion.
struct TaskChainRule {
    rule: Rule,
}

impl BuildRule for TaskChainRule {
    fn decl(&self) -> &Rule {
        &self.rule
    }
    fn type_tag(&self) -> &'static str {
        "task_chain"
    }
    fn begin(&self, ctx: RuleContext) -> BuildResult<()> {
        let first = ctx.run_task_async(Box::new(DoubleTask(1)))?;
        let second = ctx.run_task_async(Box::new(DoubleTask(2)))?;
        ctx.chain(&[first, second]);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

fn rule(name: &str, srcs: &[&str], deps: &[&str]) -> Rule {
    Rule::new(
        name,
        srcs.iter().map(|s| s.to_string()).collect(),
        deps.iter().map(|s| s.to_string()).collect(),
        None,
    )
    .unwrap()
}

fn noop(name: &str, deps: &[&str], recorder: &Arc<Recorder>) -> RuleHandle {
    Arc::new(NoopRule {
        rule: rule(name, &[], deps),
        recorder: Arc::clone(recorder),
    })
}

fn failing(name: &str, recorder: &Arc<Recorder>) -> RuleHandle {
    Arc::new(FailingRule {
        rule: rule(name, &[], &[]),
        recorder: Arc::clone(recorder),
    })
}

fn context_over(rules: Vec<RuleHandle>) -> BuildContext {
    let project = Project::new("test");
    for r in rules {
        project.add_rule(r).unwrap();
    }
    BuildContext::new(
        BuildEnvironment::new("."),
        Arc::new(project),
        BuildOptions::default(),
    )
}

fn artifact_dir(test: &str) -> PathBuf {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../target/test-artifacts/forge-core")
        .join(test);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir.canonicalize().unwrap()
}

fn write_file(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

// ---------------------------------------------------------------------------
// Target validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bad_target_name_fails_early() {
    let recorder = Arc::new(Recorder::default());
    let mut ctx = context_over(vec![noop("a", &[], &recorder)]);
    let error = ctx.execute(&["a"]).await.unwrap_err();
    assert!(error.to_string().contains("rule path"), "got: {error}");
    assert!(recorder.entries().is_empty());
}

#[tokio::test]
async fn unknown_target_fails_early() {
    let recorder = Arc::new(Recorder::default());
    let mut ctx = context_over(vec![noop("a", &[], &recorder)]);
    assert!(ctx.execute(&[":b"]).await.is_err());
    assert!(recorder.entries().is_empty());
}

#[tokio::test]
async fn context_is_single_use() {
    let recorder = Arc::new(Recorder::default());
    let mut ctx = context_over(vec![noop("a", &[], &recorder)]);
    assert!(ctx.execute(&[":a"]).await.unwrap());
    assert!(ctx.execute(&[":a"]).await.is_err());
}

// ---------------------------------------------------------------------------
// Sequencing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_rule_build() {
    let recorder = Arc::new(Recorder::default());
    let mut ctx = context_over(vec![noop("a", &[], &recorder)]);
    assert!(ctx.execute(&[":a"]).await.unwrap());
    let (status, outputs) = ctx.get_rule_results(":a").unwrap();
    assert_eq!(status, RuleStatus::Succeeded);
    assert!(outputs.is_empty());
    assert_eq!(recorder.entries(), vec![":a"]);
}

#[tokio::test]
async fn dependencies_run_before_dependents() {
    let recorder = Arc::new(Recorder::default());
    let mut ctx = context_over(vec![
        noop("a1", &[], &recorder),
        noop("a2", &[], &recorder),
        noop("b", &[":a1", ":a2"], &recorder),
        noop("c", &[":b"], &recorder),
    ]);
    assert!(ctx.execute(&[":c"]).await.unwrap());

    let entries = recorder.entries();
    assert_eq!(entries.len(), 4);
    let pos = |p: &str| entries.iter().position(|e| e == p).unwrap();
    assert!(pos(":a1") < pos(":b"));
    assert!(pos(":a2") < pos(":b"));
    assert!(pos(":b") < pos(":c"));

    for path in [":a1", ":a2", ":b", ":c"] {
        assert_eq!(ctx.get_rule_results(path).unwrap().0, RuleStatus::Succeeded);
    }
}

#[tokio::test]
async fn predecessor_terminal_before_dependent_begins() {
    let recorder = Arc::new(Recorder::default());
    let mut ctx = context_over(vec![
        noop("a", &[], &recorder),
        noop("b", &[":a"], &recorder),
    ]);
    assert!(ctx.execute(&[":b"]).await.unwrap());

    let contexts: std::collections::HashMap<_, _> = ctx
        .rule_contexts()
        .map(|(p, c)| (p.clone(), c.clone()))
        .collect();
    let a_end = contexts[":a"].end_time().unwrap();
    let b_start = contexts[":b"].start_time().unwrap();
    assert!(a_end <= b_start);
}

#[tokio::test]
async fn unscheduled_rules_stay_waiting() {
    let recorder = Arc::new(Recorder::default());
    let mut ctx = context_over(vec![
        noop("a", &[], &recorder),
        noop("unrelated", &[], &recorder),
    ]);
    assert!(ctx.execute(&[":a"]).await.unwrap());
    let (status, outputs) = ctx.get_rule_results(":unrelated").unwrap();
    assert_eq!(status, RuleStatus::Waiting);
    assert!(outputs.is_empty());
    assert!(ctx.get_rule_results(":ghost").is_err());
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failure_cascades_without_invoking_begin() {
    let recorder = Arc::new(Recorder::default());
    let mut ctx = context_over(vec![
        failing("a", &recorder),
        noop("b", &[":a"], &recorder),
    ]);
    assert!(!ctx.execute(&[":b"]).await.unwrap());

    assert_eq!(ctx.get_rule_results(":a").unwrap().0, RuleStatus::Failed);
    assert_eq!(ctx.get_rule_results(":b").unwrap().0, RuleStatus::Failed);
    // :b's body never ran; its failure is the cascade marker.
    assert_eq!(recorder.entries(), vec![":a"]);
    let contexts: std::collections::HashMap<_, _> = ctx
        .rule_contexts()
        .map(|(p, c)| (p.clone(), c.clone()))
        .collect();
    assert!(!contexts[":a"].is_cascaded());
    assert!(contexts[":b"].is_cascaded());
    // The first non-cascade error is :a's.
    let first = ctx.first_error().unwrap();
    assert!(first.to_string().contains("intentional"), "got: {first}");
}

#[tokio::test]
async fn independent_rules_continue_after_failure() {
    let recorder = Arc::new(Recorder::default());
    let mut ctx = context_over(vec![
        failing("a", &recorder),
        noop("z_independent", &[], &recorder),
    ]);
    assert!(!ctx.execute(&[":a", ":z_independent"]).await.unwrap());
    assert_eq!(
        ctx.get_rule_results(":z_independent").unwrap().0,
        RuleStatus::Succeeded,
    );
}

#[tokio::test]
async fn stop_on_error_leaves_remaining_rules_waiting() {
    let recorder = Arc::new(Recorder::default());
    let project = Project::new("test");
    project.add_rule(failing("a", &recorder)).unwrap();
    project.add_rule(noop("b", &[":a"], &recorder)).unwrap();
    project.add_rule(noop("z_other", &[], &recorder)).unwrap();
    let mut ctx = BuildContext::new(
        BuildEnvironment::new("."),
        Arc::new(project),
        BuildOptions {
            stop_on_error: true,
            ..Default::default()
        },
    );
    assert!(!ctx.execute(&[":b", ":z_other"]).await.unwrap());

    assert_eq!(ctx.get_rule_results(":a").unwrap().0, RuleStatus::Failed);
    // Everything the pump had not issued when :a failed stays Waiting.
    assert_eq!(ctx.get_rule_results(":b").unwrap().0, RuleStatus::Waiting);
    assert_eq!(ctx.get_rule_results(":z_other").unwrap().0, RuleStatus::Waiting);
}

#[tokio::test]
async fn raise_on_error_returns_the_failure() {
    let recorder = Arc::new(Recorder::default());
    let project = Project::new("test");
    project.add_rule(failing("a", &recorder)).unwrap();
    let mut ctx = BuildContext::new(
        BuildEnvironment::new("."),
        Arc::new(project),
        BuildOptions {
            raise_on_error: true,
            ..Default::default()
        },
    );
    let error = ctx.execute(&[":a"]).await.unwrap_err();
    assert!(error.to_string().contains("intentional"), "got: {error}");
}

#[tokio::test]
async fn cycle_fails_before_any_rule_runs() {
    let recorder = Arc::new(Recorder::default());
    let mut ctx = context_over(vec![
        noop("a", &[":b"], &recorder),
        noop("b", &[":a"], &recorder),
    ]);
    assert!(ctx.execute(&[":a"]).await.is_err());
    assert!(recorder.entries().is_empty());
}

// ---------------------------------------------------------------------------
// Task chaining
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chained_tasks_complete_the_rule() {
    let project = Project::new("test");
    project
        .add_rule(Arc::new(TaskChainRule {
            rule: rule("t", &[], &[]),
        }) as RuleHandle)
        .unwrap();
    let mut ctx = BuildContext::new(
        BuildEnvironment::new("."),
        Arc::new(project),
        BuildOptions::default(),
    );
    assert!(ctx.execute(&[":t"]).await.unwrap());
    assert_eq!(ctx.get_rule_results(":t").unwrap().0, RuleStatus::Succeeded);
}

/// Forwards only task failure; completes itself on the success arm.
struct ErrbackRule {
    rule: Rule,
    task_fails: bool,
}

impl BuildRule for ErrbackRule {
    fn decl(&self) -> &Rule {
        &self.rule
    }
    fn type_tag(&self) -> &'static str {
        "errback"
    }
    fn begin(&self, ctx: RuleContext) -> BuildResult<()> {
        let deferred: crate::deferred::Deferred<TaskValue> = crate::deferred::Deferred::new();
        ctx.chain_errback(&deferred);
        let arm = ctx.clone();
        deferred.on_success(move |_| {
            arm.append_output_paths(vec![PathBuf::from("fanned-out")]);
            arm.succeed().unwrap();
        });
        if self.task_fails {
            let _ = deferred.fail(err(BuildReason::TaskFailed, "fan-out failed"));
        } else {
            let _ = deferred.succeed(TaskValue::from(1));
        }
        Ok(())
    }
}

#[tokio::test]
async fn chain_errback_forwards_only_failure() {
    let project = Project::new("test");
    project
        .add_rule(Arc::new(ErrbackRule {
            rule: rule("ok", &[], &[]),
            task_fails: false,
        }) as RuleHandle)
        .unwrap();
    project
        .add_rule(Arc::new(ErrbackRule {
            rule: rule("bad", &[], &[]),
            task_fails: true,
        }) as RuleHandle)
        .unwrap();
    let mut ctx = BuildContext::new(
        BuildEnvironment::new("."),
        Arc::new(project),
        BuildOptions::default(),
    );
    assert!(!ctx.execute(&[":ok", ":bad"]).await.unwrap());
    assert_eq!(ctx.get_rule_results(":ok").unwrap().0, RuleStatus::Succeeded);
    assert_eq!(ctx.get_rule_results(":bad").unwrap().0, RuleStatus::Failed);
}

// ---------------------------------------------------------------------------
// Source resolution against the filesystem
// ---------------------------------------------------------------------------

fn file_project(root: &Path, rules: Vec<RuleHandle>) -> Arc<Project> {
    let project = Project::new("test");
    let mut module = Module::new("", root);
    for r in rules {
        module.add_rule(r).unwrap();
    }
    project.add_module(module).unwrap();
    Arc::new(project)
}

fn pass_through(name: &str, srcs: &[&str], filter: Option<&str>) -> RuleHandle {
    Arc::new(PassThroughRule {
        rule: Rule::new(
            name,
            srcs.iter().map(|s| s.to_string()).collect(),
            vec![],
            filter.map(str::to_string),
        )
        .unwrap(),
    })
}

#[tokio::test]
async fn pass_through_of_a_direct_file() {
    let root = artifact_dir("pass_through_direct");
    write_file(&root.join("a.txt"), "hello");

    let project = file_project(&root, vec![pass_through("a", &["a.txt"], None)]);
    let mut ctx = BuildContext::new(
        BuildEnvironment::new(&root),
        project,
        BuildOptions::default(),
    );
    assert!(ctx.execute(&[":a"]).await.unwrap());
    assert_eq!(ctx.get_rule_outputs(":a").unwrap(), vec![root.join("a.txt")]);
}

#[tokio::test]
async fn glob_sources_with_filter() {
    let root = artifact_dir("glob_filter");
    write_file(&root.join("a.txt"), "a");
    write_file(&root.join("b.txt"), "b");
    write_file(&root.join("c.md"), "c");

    let project = file_project(
        &root,
        vec![
            pass_through("local_txt", &["*.txt"], None),
            pass_through("filtered", &["*"], Some("*.txt")),
        ],
    );
    let mut ctx = BuildContext::new(
        BuildEnvironment::new(&root),
        project,
        BuildOptions::default(),
    );
    assert!(ctx.execute(&[":local_txt", ":filtered"]).await.unwrap());

    let expected = vec![root.join("a.txt"), root.join("b.txt")];
    assert_eq!(ctx.get_rule_outputs(":local_txt").unwrap(), expected);
    assert_eq!(ctx.get_rule_outputs(":filtered").unwrap(), expected);
}

#[tokio::test]
async fn empty_glob_is_not_an_error_but_missing_file_is() {
    let root = artifact_dir("missing_sources");
    let project = file_project(
        &root,
        vec![
            pass_through("empty", &["*.nothing"], None),
            pass_through("missing", &["gone.txt"], None),
        ],
    );
    let mut ctx = BuildContext::new(
        BuildEnvironment::new(&root),
        project,
        BuildOptions::default(),
    );
    assert!(!ctx.execute(&[":empty", ":missing"]).await.unwrap());
    assert_eq!(ctx.get_rule_results(":empty").unwrap().0, RuleStatus::Succeeded);
    assert!(ctx.get_rule_outputs(":empty").unwrap().is_empty());
    assert_eq!(ctx.get_rule_results(":missing").unwrap().0, RuleStatus::Failed);
}

#[tokio::test]
async fn rule_reference_substitutes_predecessor_outputs() {
    let root = artifact_dir("rule_ref_outputs");
    write_file(&root.join("a.txt"), "a");

    let project = file_project(
        &root,
        vec![
            pass_through("a", &["a.txt"], None),
            pass_through("ref", &[":a"], None),
        ],
    );
    let mut ctx = BuildContext::new(
        BuildEnvironment::new(&root),
        project,
        BuildOptions::default(),
    );
    // Executing :ref alone sequences :a first.
    assert!(ctx.execute(&[":ref"]).await.unwrap());
    assert_eq!(
        ctx.get_rule_outputs(":ref").unwrap(),
        ctx.get_rule_outputs(":a").unwrap(),
    );
}

#[tokio::test]
async fn duplicate_sources_are_deduplicated() {
    let root = artifact_dir("dedup_sources");
    write_file(&root.join("a.txt"), "a");

    let project = file_project(&root, vec![pass_through("a", &["a.txt", "*.txt"], None)]);
    let mut ctx = BuildContext::new(
        BuildEnvironment::new(&root),
        project,
        BuildOptions::default(),
    );
    assert!(ctx.execute(&[":a"]).await.unwrap());
    assert_eq!(ctx.get_rule_outputs(":a").unwrap(), vec![root.join("a.txt")]);
}

// ---------------------------------------------------------------------------
// Output path derivation
// ---------------------------------------------------------------------------

#[test]
fn output_paths_preserve_module_subdirectory() {
    let root = PathBuf::from("/work/project");
    let project = Project::new("test");
    let mut module = Module::new("assets/img", root.join("assets/img"));
    module
        .add_rule(pass_through("thumbs", &[], None))
        .unwrap();
    project.add_module(module).unwrap();
    let project = Arc::new(project);

    let rule = project.resolve_rule(None, "assets/img:thumbs").unwrap();
    let ctx = RuleContext::new(
        Arc::new(BuildEnvironment::new(&root)),
        Arc::clone(&project),
        Arc::new(crate::task::InProcessTaskExecutor::new()),
        rule,
        false,
    );

    assert_eq!(
        ctx.out_path(None, None),
        root.join("build-out/assets/img/thumbs"),
    );
    assert_eq!(
        ctx.out_path(Some("sheet"), Some(".png")),
        root.join("build-out/assets/img/sheet.png"),
    );
    assert_eq!(
        ctx.gen_path(None, Some(".list")),
        root.join("build-gen/assets/img/thumbs.list"),
    );
    assert_eq!(
        ctx.out_path_for_src(&root.join("assets/img/deep/x.png")),
        root.join("build-out/assets/img/deep/x.png"),
    );
    assert_eq!(
        ctx.gen_path_for_src(&root.join("assets/img/x.png")),
        root.join("build-gen/assets/img/x.png"),
    );
    // Sources outside the module directory fall back to their file name.
    assert_eq!(
        ctx.out_path_for_src(Path::new("/elsewhere/y.png")),
        root.join("build-out/assets/img/y.png"),
    );
}
