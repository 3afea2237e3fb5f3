pub mod ast;
pub mod build_parser;
mod parse_utils;

pub use ast::{AttrValue, RuleDecl};
pub use build_parser::{BuildParseError, parse_build_file};
