//! The dynamic data tree loaded from build descriptions.

use std::fmt;

use indexmap::IndexMap;

mod parse;
pub use parse::{ParseError, parse_dict, parse_value};

/// An insertion-ordered mapping. Several merge rules depend on key order,
/// so a plain hash map is not an option here.
pub type Dict = IndexMap<String, Value>;

/// A single node in the loaded data tree.
///
/// Build descriptions are heterogeneous: strings, integers, booleans,
/// ordered sequences, and ordered mappings, nested arbitrarily. Booleans
/// never appear in the on-disk syntax but are produced by `-D NAME`
/// defines and by condition evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Dict(Dict),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// A short name for the value's shape, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
        }
    }

    /// Truthiness for flag-like settings such as `process_outputs_as_sources`,
    /// which appear as `0`/`1`, `'0'`/`'1'`, or booleans.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty() && s != "0",
            Value::Int(i) => *i != 0,
            Value::Bool(b) => *b,
            Value::List(l) => !l.is_empty(),
            Value::Dict(d) => !d.is_empty(),
        }
    }

    /// Coerce a scalar into its string form (`1`/`0` for booleans).
    /// Lists and dicts have no string form.
    pub fn to_plain_string(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_owned()),
            Value::List(_) | Value::Dict(_) => None,
        }
    }

    /// Interpret a list of scalars as a list of strings.
    pub fn string_list(&self) -> Option<Vec<String>> {
        let list = self.as_list()?;
        list.iter().map(|v| v.to_plain_string()).collect()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("'")?;
    for c in s.chars() {
        match c {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("'")
}

/// Renders the value back in the on-disk literal syntax. Mainly used by
/// tests and diagnostics; round-trips through the parser.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write_quoted(f, s),
            Value::Int(i) => write!(f, "{i}"),
            Value::Bool(b) => write!(f, "{}", if *b { "1" } else { "0" }),
            Value::List(l) => {
                f.write_str("[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Value::Dict(d) => {
                f.write_str("{")?;
                for (i, (k, v)) in d.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_quoted(f, k)?;
                    write!(f, ": {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_coercion() {
        assert_eq!(Value::Int(3).to_plain_string().as_deref(), Some("3"));
        assert_eq!(Value::Bool(true).to_plain_string().as_deref(), Some("1"));
        assert_eq!(Value::from("x").to_plain_string().as_deref(), Some("x"));
        assert_eq!(Value::List(vec![]).to_plain_string(), None);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::from("0").truthy());
        assert!(!Value::from("").truthy());
        assert!(Value::from("1").truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::Int(2).truthy());
    }

    #[test]
    fn display_round_trips() {
        let src = "{'a': ['x', 1], 'b': {'c': 'it\\'s'}}";
        let parsed = parse_value(src).unwrap();
        assert_eq!(parsed.to_string(), src);
    }
}
