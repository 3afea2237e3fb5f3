//! `concat_files` — join sources into one output file.
//!
//! Sources are concatenated in resolved order. The output name comes from
//! the `out` attribute, defaulting to the rule name.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use orion_error::ErrorOwe;
use orion_error::prelude::*;

use forge_core::context::RuleContext;
use forge_core::error::BuildResult;
use forge_core::rule::{BuildRule, Rule, RuleHandle};
use forge_core::task::{Task, TaskValue};
use forge_lang::RuleDecl;

pub struct ConcatFilesRule {
    rule: Rule,
    out: Option<String>,
}

pub fn concat_files_ctor(decl: &RuleDecl) -> BuildResult<RuleHandle> {
    Ok(Arc::new(ConcatFilesRule {
        rule: Rule::from_decl(decl, &["out"])?,
        out: decl.str_attr("out").map(str::to_string),
    }))
}

impl BuildRule for ConcatFilesRule {
    fn decl(&self) -> &Rule {
        &self.rule
    }

    fn type_tag(&self) -> &'static str {
        "concat_files"
    }

    fn fingerprint(&self) -> String {
        format!("out={}", self.out.as_deref().unwrap_or(""))
    }

    fn begin(&self, ctx: RuleContext) -> BuildResult<()> {
        let out = ctx.out_path(self.out.as_deref(), None);
        if let Some(parent) = out.parent() {
            ctx.ensure_output_exists(parent)?;
        }
        ctx.append_output_paths(vec![out.clone()]);
        let deferred = ctx.run_task_async(Box::new(ConcatFilesTask {
            srcs: ctx.src_paths(),
            out,
        }))?;
        ctx.chain(&[deferred]);
        Ok(())
    }
}

struct ConcatFilesTask {
    srcs: Vec<PathBuf>,
    out: PathBuf,
}

impl Task for ConcatFilesTask {
    fn name(&self) -> &str {
        "concat_files"
    }

    fn run(self: Box<Self>) -> BuildResult<TaskValue> {
        let mut file = std::fs::File::create(&self.out)
            .owe_sys()
            .map_err(|e| e.with_detail(format!("creating {}", self.out.display())))?;
        let mut total = 0u64;
        for src in &self.srcs {
            let bytes = std::fs::read(src)
                .owe_sys()
                .map_err(|e| e.with_detail(format!("reading {}", src.display())))?;
            file.write_all(&bytes)
                .owe_sys()
                .map_err(|e| e.with_detail(format!("writing {}", self.out.display())))?;
            total += bytes.len() as u64;
        }
        Ok(TaskValue::from(total))
    }
}
