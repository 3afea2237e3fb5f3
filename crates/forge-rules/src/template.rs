//! `template_files` — parameter substitution into `build-gen`.
//!
//! Copies each source under the generated tree, replacing `${KEY}`
//! occurrences with the values from `params: ["KEY=VALUE", ...]`.

use std::path::PathBuf;
use std::sync::Arc;

use orion_error::ErrorOwe;
use orion_error::prelude::*;

use forge_core::context::RuleContext;
use forge_core::error::{BuildReason, BuildResult, err};
use forge_core::rule::{BuildRule, Rule, RuleHandle};
use forge_core::task::{Task, TaskValue};
use forge_lang::RuleDecl;

pub struct TemplateFilesRule {
    rule: Rule,
    params: Vec<(String, String)>,
}

pub fn template_files_ctor(decl: &RuleDecl) -> BuildResult<RuleHandle> {
    let mut params = Vec::new();
    for entry in decl.list_attr("params").unwrap_or_default() {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(err(
                BuildReason::Parse,
                format!("template param must be KEY=VALUE, got \"{entry}\""),
            ));
        };
        params.push((key.to_string(), value.to_string()));
    }
    Ok(Arc::new(TemplateFilesRule {
        rule: Rule::from_decl(decl, &["params"])?,
        params,
    }))
}

impl BuildRule for TemplateFilesRule {
    fn decl(&self) -> &Rule {
        &self.rule
    }

    fn type_tag(&self) -> &'static str {
        "template_files"
    }

    fn fingerprint(&self) -> String {
        let mut encoded = String::new();
        for (key, value) in &self.params {
            encoded.push_str(key);
            encoded.push('=');
            encoded.push_str(value);
            encoded.push('\u{1f}');
        }
        encoded
    }

    fn begin(&self, ctx: RuleContext) -> BuildResult<()> {
        let mut pairs = Vec::new();
        let mut outputs = Vec::new();
        for src in ctx.src_paths() {
            let dest = ctx.gen_path_for_src(&src);
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
        let deferred = ctx.run_task_async(Box::new(TemplateFilesTask {
            pairs,
            params: self.params.clone(),
        }))?;
        ctx.chain(&[deferred]);
        Ok(())
    }
}

struct TemplateFilesTask {
    pairs: Vec<(PathBuf, PathBuf)>,
    params: Vec<(String, String)>,
}

impl Task for TemplateFilesTask {
    fn name(&self) -> &str {
        "template_files"
    }

    fn run(self: Box<Self>) -> BuildResult<TaskValue> {
        let mut rendered = 0u64;
        for (from, to) in &self.pairs {
            let mut content = std::fs::read_to_string(from)
                .owe_sys()
                .map_err(|e| e.with_detail(format!("reading {}", from.display())))?;
            for (key, value) in &self.params {
                content = content.replace(&format!("${{{key}}}"), value);
            }
            std::fs::write(to, content)
                .owe_sys()
                .map_err(|e| e.with_detail(format!("writing {}", to.display())))?;
            rendered += 1;
        }
        Ok(TaskValue::from(rendered))
    }
}
