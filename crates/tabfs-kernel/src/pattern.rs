//! Path pattern compiler.
//!
//! A pattern is a path template such as `/tabs/by-id/#TAB_ID/url.txt`.
//! `#NAME` marks an integer variable, `:NAME` a string variable; variable
//! names are upper case with underscores and may share a segment with
//! literal text (`/tabs/by-title/:TAB_TITLE.#TAB_ID`).
//!
//! Matching is anchored to the whole path. Captured values are stored under
//! the lower-camel-case form of the variable name (`TAB_ID` → `tabId`).

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use thiserror::Error;

use crate::error::{FsError, FsResult};

/// Type tag of a pattern variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    /// `#NAME`: one or more decimal digits.
    Integer,
    /// `:NAME`: one or more non-`/` characters.
    String,
}

impl VarType {
    fn sigil(self) -> char {
        match self {
            VarType::Integer => '#',
            VarType::String => ':',
        }
    }

    fn regex(self) -> &'static str {
        match self {
            VarType::Integer => "[0-9]+",
            VarType::String => "[^/]+",
        }
    }
}

/// One piece of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Literal(String),
    Var { name: String, ty: VarType },
}

/// A bound variable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

/// Variable bindings produced by a successful match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings(BTreeMap<String, Value>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Integer variable by binding key (`tabId`).
    pub fn int(&self, key: &str) -> FsResult<i64> {
        match self.0.get(key) {
            Some(Value::Int(n)) => Ok(*n),
            Some(Value::Str(_)) => Err(FsError::io(format!("variable {key} is not an integer"))),
            None => Err(FsError::io(format!("route has no variable {key}"))),
        }
    }

    /// String variable by binding key (`tabTitle`).
    pub fn str(&self, key: &str) -> FsResult<&str> {
        match self.0.get(key) {
            Some(Value::Str(s)) => Ok(s.as_str()),
            Some(Value::Int(_)) => Err(FsError::io(format!("variable {key} is not a string"))),
            None => Err(FsError::io(format!("route has no variable {key}"))),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Bindings {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Pattern compilation error.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("pattern must start with '/': {0}")]
    NotAbsolute(String),

    #[error("variable {var} appears twice in {pattern}")]
    DuplicateVariable { pattern: String, var: String },

    #[error("invalid pattern {pattern}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// `TAB_ID` → `tabId`.
pub fn to_binding_key(var_name: &str) -> String {
    let mut key = String::with_capacity(var_name.len());
    let mut upper_next = false;
    for c in var_name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            key.extend(c.to_uppercase());
            upper_next = false;
        } else {
            key.extend(c.to_lowercase());
        }
    }
    key
}

/// `tabId` → `TAB_ID`. Inverse of [`to_binding_key`].
pub fn to_var_name(binding_key: &str) -> String {
    let mut name = String::with_capacity(binding_key.len() + 4);
    for c in binding_key.chars() {
        if c.is_uppercase() {
            name.push('_');
        }
        name.extend(c.to_uppercase());
    }
    name
}

fn is_var_char(c: char) -> bool {
    c.is_ascii_uppercase() || c == '_'
}

/// Split pattern text into literal and variable pieces.
fn parse_pieces(pattern: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        let ty = match c {
            '#' => Some(VarType::Integer),
            ':' => Some(VarType::String),
            _ => None,
        };
        match ty {
            Some(ty) if chars.peek().is_some_and(|&n| is_var_char(n)) => {
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if !is_var_char(n) {
                        break;
                    }
                    name.push(n);
                    chars.next();
                }
                pieces.push(Piece::Var { name, ty });
            }
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    pieces
}

/// Returns true if `segment` contains a variable.
pub fn segment_has_var(segment: &str) -> bool {
    parse_pieces(segment)
        .iter()
        .any(|p| matches!(p, Piece::Var { .. }))
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    pieces: Vec<Piece>,
    /// Binding key and type per capture group, in group order.
    vars: Vec<(String, VarType)>,
    regex: Regex,
}

impl PathPattern {
    /// Compile a pattern.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if !pattern.starts_with('/') {
            return Err(PatternError::NotAbsolute(pattern.to_string()));
        }

        let pieces = parse_pieces(pattern);
        let mut vars: Vec<(String, VarType)> = Vec::new();
        let mut re = String::from("^");

        for piece in &pieces {
            match piece {
                Piece::Literal(text) => re.push_str(&regex::escape(text)),
                Piece::Var { name, ty } => {
                    let key = to_binding_key(name);
                    if vars.iter().any(|(k, _)| *k == key) {
                        return Err(PatternError::DuplicateVariable {
                            pattern: pattern.to_string(),
                            var: name.clone(),
                        });
                    }
                    re.push('(');
                    re.push_str(ty.regex());
                    re.push(')');
                    vars.push((key, *ty));
                }
            }
        }
        re.push('$');

        let regex = Regex::new(&re).map_err(|source| PatternError::Regex {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            source: pattern.to_string(),
            pieces,
            vars,
            regex,
        })
    }

    /// Match a concrete path, returning its bindings.
    pub fn matches(&self, path: &str) -> Option<Bindings> {
        let caps = self.regex.captures(path)?;
        let mut bindings = Bindings::new();
        for (i, (key, ty)) in self.vars.iter().enumerate() {
            let text = caps.get(i + 1)?.as_str();
            let value = match ty {
                // Digits that overflow i64 cannot name anything real.
                VarType::Integer => Value::Int(text.parse().ok()?),
                VarType::String => Value::Str(text.to_string()),
            };
            bindings.insert(key.clone(), value);
        }
        Some(bindings)
    }

    /// Number of variables; lower is more specific.
    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    /// The pattern text this was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    /// Render the pattern back from its pieces.
    pub fn render(&self) -> String {
        self.pieces
            .iter()
            .map(|p| match p {
                Piece::Literal(s) => s.clone(),
                Piece::Var { name, ty } => format!("{}{}", ty.sigil(), name),
            })
            .collect()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        let p = PathPattern::compile("/tabs/create").unwrap();
        assert_eq!(p.var_count(), 0);
        assert!(p.matches("/tabs/create").unwrap().is_empty());
        assert!(p.matches("/tabs/create/x").is_none());
        assert!(p.matches("/tabs").is_none());
        assert!(p.matches("/tabsXcreate").is_none());
    }

    #[test]
    fn test_integer_var_coerced() {
        let p = PathPattern::compile("/tabs/by-id/#TAB_ID/url.txt").unwrap();
        let vars = p.matches("/tabs/by-id/10/url.txt").unwrap();
        assert_eq!(vars.get("tabId"), Some(&Value::Int(10)));
        assert_eq!(vars.int("tabId").unwrap(), 10);
        assert!(p.matches("/tabs/by-id/ten/url.txt").is_none());
    }

    #[test]
    fn test_mixed_segment() {
        let p = PathPattern::compile("/tabs/by-title/:TAB_TITLE.#TAB_ID").unwrap();
        assert_eq!(p.var_count(), 2);
        let vars = p.matches("/tabs/by-title/Some.Page_Title.42").unwrap();
        assert_eq!(vars.str("tabTitle").unwrap(), "Some.Page_Title");
        assert_eq!(vars.int("tabId").unwrap(), 42);
    }

    #[test]
    fn test_string_var_stops_at_slash() {
        let p = PathPattern::compile("/evals/:FILENAME").unwrap();
        assert!(p.matches("/evals/a.js").is_some());
        assert!(p.matches("/evals/a/b.js").is_none());
        assert!(p.matches("/evals/").is_none());
    }

    #[test]
    fn test_literal_dots_escaped() {
        let p = PathPattern::compile("/url.txt").unwrap();
        assert!(p.matches("/urlXtxt").is_none());
    }

    #[test]
    fn test_overflowing_integer_does_not_match() {
        let p = PathPattern::compile("/n/#N").unwrap();
        assert!(p.matches("/n/99999999999999999999999").is_none());
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            PathPattern::compile("tabs"),
            Err(PatternError::NotAbsolute(_))
        ));
        assert!(matches!(
            PathPattern::compile("/#ID/#ID"),
            Err(PatternError::DuplicateVariable { .. })
        ));
    }

    #[test]
    fn test_sigil_without_name_is_literal() {
        let p = PathPattern::compile("/a#b/c:").unwrap();
        assert_eq!(p.var_count(), 0);
        assert!(p.matches("/a#b/c:").is_some());
    }

    #[test]
    fn test_key_conversion_roundtrips() {
        assert_eq!(to_binding_key("TAB_ID"), "tabId");
        assert_eq!(to_binding_key("EXTENSION_TITLE"), "extensionTitle");
        assert_eq!(to_binding_key("SUFFIX"), "suffix");
        for name in ["TAB_ID", "WINDOW_ID", "INPUT_ID", "EXPR"] {
            assert_eq!(to_var_name(&to_binding_key(name)), name);
        }
    }

    #[test]
    fn test_render() {
        let src = "/windows/#WINDOW_ID/tabs/:TAB_TITLE.#TAB_ID";
        assert_eq!(PathPattern::compile(src).unwrap().render(), src);
        assert!(segment_has_var("#WINDOW_ID"));
        assert!(!segment_has_var("by-id"));
    }
}
