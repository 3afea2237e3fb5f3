//! `file_set` — the identity rule.
//!
//! Outputs are exactly the resolved source paths. Useful for naming a set
//! of files (or another rule's outputs) so other rules can reference it.

use std::sync::Arc;

use forge_core::context::RuleContext;
use forge_core::error::BuildResult;
use forge_core::rule::{BuildRule, Rule, RuleHandle};
use forge_lang::RuleDecl;

pub struct FileSetRule {
    rule: Rule,
}

pub fn file_set_ctor(decl: &RuleDecl) -> BuildResult<RuleHandle> {
    Ok(Arc::new(FileSetRule {
        rule: Rule::from_decl(decl, &[])?,
    }))
}

impl BuildRule for FileSetRule {
    fn decl(&self) -> &Rule {
        &self.rule
    }

    fn type_tag(&self) -> &'static str {
        "file_set"
    }

    fn begin(&self, ctx: RuleContext) -> BuildResult<()> {
        ctx.append_output_paths(ctx.src_paths());
        ctx.succeed()
    }
}
