//! Core rule types.
//!
//! The rule types every workspace gets out of the box: pass-through file
//! sets, file copying, concatenation, and parameter-substituting templates.
//! Anything heavier (asset compilers and the like) registers through the
//! same [`RuleRegistry`] contract from its own crate.

pub mod concat;
pub mod copy;
pub mod file_set;
pub mod template;

use forge_core::error::BuildResult;
use forge_core::registry::RuleRegistry;

/// Register the built-in rule types.
pub fn register_core_rules(registry: &mut RuleRegistry) -> BuildResult<()> {
    registry.register("file_set", file_set::file_set_ctor)?;
    registry.register("copy_files", copy::copy_files_ctor)?;
    registry.register("concat_files", concat::concat_files_ctor)?;
    registry.register("template_files", template::template_files_ctor)?;
    Ok(())
}

/// A registry pre-populated with the built-in rule types.
pub fn core_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();
    register_core_rules(&mut registry).expect("fresh registry cannot have duplicate tags");
    registry
}
