//! AST for BUILD-file rule declarations.
//!
//! A BUILD file is a flat sequence of declarations of the form
//! `rule_type("name", attr: value, ...)`. The parser produces one
//! [`RuleDecl`] per declaration; attribute interpretation (which attributes
//! a rule type accepts, and what they mean) happens later, when the rule
//! registry instantiates the declaration.

/// One parsed rule declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDecl {
    /// The rule-type tag (the identifier before the parenthesis).
    pub rule_type: String,
    /// The rule name (first positional argument).
    pub name: String,
    /// Named attributes in declaration order.
    pub attrs: Vec<(String, AttrValue)>,
}

/// An attribute value in a rule declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    List(Vec<String>),
    Int(i64),
    Bool(bool),
}

impl RuleDecl {
    /// Look up an attribute by key.
    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// A string attribute, if present and string-typed.
    pub fn str_attr(&self, key: &str) -> Option<&str> {
        match self.attr(key) {
            Some(AttrValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// A string-list attribute. A single string is accepted as a
    /// one-element list, mirroring how declarations commonly shorten
    /// `srcs: ["x"]` to `srcs: "x"`.
    pub fn list_attr(&self, key: &str) -> Option<Vec<String>> {
        match self.attr(key) {
            Some(AttrValue::List(items)) => Some(items.clone()),
            Some(AttrValue::Str(s)) if !s.is_empty() => Some(vec![s.clone()]),
            Some(AttrValue::Str(_)) => Some(Vec::new()),
            _ => None,
        }
    }

    /// The attribute keys this declaration carries.
    pub fn attr_keys(&self) -> impl Iterator<Item = &str> {
        self.attrs.iter().map(|(k, _)| k.as_str())
    }
}
