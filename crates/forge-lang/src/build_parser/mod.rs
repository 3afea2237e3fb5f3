//! Parser for BUILD files.
//!
//! A BUILD file is a sequence of rule declarations:
//!
//! ```text
//! # static asset set
//! file_set("textures", srcs: ["assets/*.png"], src_filter: "*.png")
//!
//! copy_files("deploy", srcs: [":textures"], deps: ["shared/util:manifest"])
//! ```
//!
//! The parser is purely syntactic: it does not know which rule types exist
//! or which attributes they accept.

use std::fmt;

use winnow::combinator::{alt, cut_err, opt};
use winnow::error::{StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::literal;

use crate::ast::{AttrValue, RuleDecl};
use crate::parse_utils::{ident, integer, kw, quoted_string, ws_skip};


// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Parse failure with a 1-based line/column position.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for BuildParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for BuildParseError {}

/// Parse a whole BUILD file into its rule declarations.
pub fn parse_build_file(source: &str) -> Result<Vec<RuleDecl>, BuildParseError> {
    build_file.parse(source).map_err(|e| {
        let offset = e.offset().min(source.len());
        let consumed = &source[..offset];
        let line = consumed.matches('\n').count() + 1;
        let column = offset - consumed.rfind('\n').map(|p| p + 1).unwrap_or(0) + 1;
        let message = {
            let rendered = e.inner().to_string();
            if rendered.is_empty() {
                "invalid declaration".to_string()
            } else {
                rendered
            }
        };
        BuildParseError { line, column, message }
    })
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

fn build_file(input: &mut &str) -> ModalResult<Vec<RuleDecl>> {
    let mut decls = Vec::new();
    loop {
        ws_skip.parse_next(input)?;
        if input.is_empty() {
            break;
        }
        decls.push(rule_decl.parse_next(input)?);
    }
    Ok(decls)
}

/// `rule_type("name", key: value, ...)`
fn rule_decl(input: &mut &str) -> ModalResult<RuleDecl> {
    let rule_type = ident
        .context(StrContext::Expected(StrContextValue::Description(
            "rule type identifier",
        )))
        .parse_next(input)?
        .to_string();

    ws_skip.parse_next(input)?;
    cut_err(literal("("))
        .context(StrContext::Expected(StrContextValue::Description(
            "'(' after rule type",
        )))
        .parse_next(input)?;

    ws_skip.parse_next(input)?;
    let name = cut_err(quoted_string)
        .context(StrContext::Expected(StrContextValue::Description(
            "quoted rule name",
        )))
        .parse_next(input)?;

    let mut attrs = Vec::new();
    loop {
        ws_skip.parse_next(input)?;
        if opt(literal(")")).parse_next(input)?.is_some() {
            break;
        }
        cut_err(literal(","))
            .context(StrContext::Expected(StrContextValue::Description(
                "',' or ')'",
            )))
            .parse_next(input)?;
        ws_skip.parse_next(input)?;
        // Trailing comma before the closing parenthesis.
        if opt(literal(")")).parse_next(input)?.is_some() {
            break;
        }
        let key = cut_err(ident)
            .context(StrContext::Expected(StrContextValue::Description(
                "attribute name",
            )))
            .parse_next(input)?
            .to_string();
        ws_skip.parse_next(input)?;
        cut_err(literal(":"))
            .context(StrContext::Expected(StrContextValue::Description(
                "':' after attribute name",
            )))
            .parse_next(input)?;
        ws_skip.parse_next(input)?;
        let value = cut_err(attr_value)
            .context(StrContext::Expected(StrContextValue::Description(
                "attribute value",
            )))
            .parse_next(input)?;
        attrs.push((key, value));
    }

    Ok(RuleDecl { rule_type, name, attrs })
}

fn attr_value(input: &mut &str) -> ModalResult<AttrValue> {
    alt((
        quoted_string.map(AttrValue::Str),
        string_list.map(AttrValue::List),
        kw("true").value(AttrValue::Bool(true)),
        kw("false").value(AttrValue::Bool(false)),
        integer.map(AttrValue::Int),
    ))
    .parse_next(input)
}

/// `[ "a", "b", ... ]` — string elements only.
fn string_list(input: &mut &str) -> ModalResult<Vec<String>> {
    literal("[").parse_next(input)?;
    let mut items = Vec::new();
    loop {
        ws_skip.parse_next(input)?;
        if opt(literal("]")).parse_next(input)?.is_some() {
            break;
        }
        if !items.is_empty() {
            cut_err(literal(","))
                .context(StrContext::Expected(StrContextValue::Description(
                    "',' or ']'",
                )))
                .parse_next(input)?;
            ws_skip.parse_next(input)?;
            // Trailing comma.
            if opt(literal("]")).parse_next(input)?.is_some() {
                break;
            }
        }
        let item = cut_err(quoted_string)
            .context(StrContext::Expected(StrContextValue::Description(
                "quoted list element",
            )))
            .parse_next(input)?;
        items.push(item);
    }
    Ok(items)
}
