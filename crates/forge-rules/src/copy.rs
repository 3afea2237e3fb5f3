//! `copy_files` — copy sources into `build-out`.
//!
//! Each source lands at its module-relative position under the output tree.
//! The copies run as a single task on the executor.

use std::path::PathBuf;
use std::sync::Arc;

use orion_error::ErrorOwe;
use orion_error::prelude::*;

use forge_core::context::RuleContext;
use forge_core::error::BuildResult;
use forge_core::rule::{BuildRule, Rule, RuleHandle};
use forge_core::task::{Task, TaskValue};
use forge_lang::RuleDecl;

pub struct CopyFilesRule {
    rule: Rule,
}

pub fn copy_files_ctor(decl: &RuleDecl) -> BuildResult<RuleHandle> {
    Ok(Arc::new(CopyFilesRule {
        rule: Rule::from_decl(decl, &[])?,
    }))
}

impl BuildRule for CopyFilesRule {
    fn decl(&self) -> &Rule {
        &self.rule
    }

    fn type_tag(&self) -> &'static str {
        "copy_files"
    }

    fn begin(&self, ctx: RuleContext) -> BuildResult<()> {
        let mut pairs = Vec::new();
        let mut outputs = Vec::new();
        for src in ctx.src_paths() {
            let dest = ctx.out_path_for_src(&src);
            if let Some(parent) = dest.parent() {
                ctx.ensure_output_exists(parent)?;
            }
            outputs.push(dest.clone());
            pairs.push((src, dest));
        }
        ctx.append_output_paths(outputs);
        if pairs.is_empty() {
            return ctx.succeed();
        }
        let deferred = ctx.run_task_async(Box::new(CopyFilesTask { pairs }))?;
        ctx.chain(&[deferred]);
        Ok(())
    }
}

struct CopyFilesTask {
    pairs: Vec<(PathBuf, PathBuf)>,
}

impl Task for CopyFilesTask {
    fn name(&self) -> &str {
        "copy_files"
    }

    fn run(self: Box<Self>) -> BuildResult<TaskValue> {
        let mut copied = 0u64;
        for (from, to) in &self.pairs {
            std::fs::copy(from, to)
                .owe_sys()
                .map_err(|e| {
                    e.with_detail(format!("copying {} to {}", from.display(), to.display()))
                })?;
            copied += 1;
        }
        Ok(TaskValue::from(copied))
    }
}
