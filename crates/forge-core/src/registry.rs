//! Rule-type registry.
//!
//! Maps a rule-type tag (the identifier a BUILD file declaration starts
//! with) to a constructor. The registry only exposes a name-indexed scope
//! for instantiating declarations; it never runs rule bodies itself.

use std::collections::BTreeMap;

use forge_lang::RuleDecl;

use crate::error::{BuildReason, BuildResult, err};
use crate::rule::RuleHandle;

/// Constructs a rule from its parsed declaration, validating the
/// declaration's attributes for the type.
pub type RuleCtor = fn(&RuleDecl) -> BuildResult<RuleHandle>;

#[derive(Default)]
pub struct RuleRegistry {
    types: BTreeMap<String, RuleCtor>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule type. A duplicate tag is an error.
    pub fn register(&mut self, tag: &str, ctor: RuleCtor) -> BuildResult<()> {
        if self.types.contains_key(tag) {
            return Err(err(
                BuildReason::DuplicateType,
                format!("rule type \"{tag}\" is already registered"),
            ));
        }
        self.types.insert(tag.to_string(), ctor);
        Ok(())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.types.contains_key(tag)
    }

    pub fn get(&self, tag: &str) -> Option<RuleCtor> {
        self.types.get(tag).copied()
    }

    /// Registered tags in sorted order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Instantiate a declaration through its type's constructor.
    /// An unregistered tag is an unknown-symbol error.
    pub fn instantiate(&self, decl: &RuleDecl) -> BuildResult<RuleHandle> {
        let Some(ctor) = self.get(&decl.rule_type) else {
            return Err(err(
                BuildReason::UnknownSymbol,
                format!("unknown rule type \"{}\"", decl.rule_type),
            ));
        };
        ctor(decl)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
