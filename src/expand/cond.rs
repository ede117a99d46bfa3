//! Evaluator for the condition mini-language used by `conditions` and
//! `target_conditions` blocks.
//!
//! Conditions are boolean-ish expressions over known variables:
//! comparisons (`==`, `!=`, `<`, `<=`, `>`, `>=`), `and`/`or`/`not`,
//! and membership via `in`. Referencing an unknown variable is fatal.

use logos::Logos;

use crate::value::{Dict, Value};

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum CondError {
    #[error("unrecognized token in condition {0:?}")]
    UnrecognizedToken(String),

    #[error("unexpected end of condition {0:?}")]
    UnexpectedEof(String),

    #[error("unexpected {found} in condition {condition:?}")]
    UnexpectedToken { condition: String, found: String },

    #[error("unknown variable {name:?} in condition {condition:?}")]
    UnknownVariable { condition: String, name: String },

    #[error("cannot order {lhs} against {rhs} in condition {condition:?}")]
    Unordered {
        condition: String,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("right-hand side of `in` is not a list or string in condition {0:?}")]
    BadMembership(String),

    #[error("variable {0:?} has no value usable in a condition")]
    UnusableVariable(String),
}

#[derive(Debug, PartialEq, Clone, logos::Logos)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token("==")]
    Eq,
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    #[regex(r"[A-Za-z_][A-Za-z0-9_.\-]*", |lex| lex.slice().to_owned())]
    Ident(String),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"'(?:[^'\\\n]|\\.)*'", |lex| strip_quotes(lex.slice()))]
    #[regex(r#""(?:[^"\\\n]|\\.)*""#, |lex| strip_quotes(lex.slice()))]
    Str(String),
}

fn strip_quotes(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    inner.replace("\\'", "'").replace("\\\"", "\"")
}

/// A value during condition evaluation.
#[derive(Debug, Clone, PartialEq)]
enum CondValue {
    Int(i64),
    Str(String),
    Bool(bool),
    List(Vec<CondValue>),
}

impl CondValue {
    fn kind(&self) -> &'static str {
        match self {
            CondValue::Int(_) => "integer",
            CondValue::Str(_) => "string",
            CondValue::Bool(_) => "boolean",
            CondValue::List(_) => "list",
        }
    }

    fn truthy(&self) -> bool {
        match self {
            CondValue::Int(i) => *i != 0,
            CondValue::Str(s) => !s.is_empty(),
            CondValue::Bool(b) => *b,
            CondValue::List(l) => !l.is_empty(),
        }
    }

    fn equals(&self, other: &CondValue) -> bool {
        match (self, other) {
            (CondValue::Bool(b), CondValue::Int(i)) | (CondValue::Int(i), CondValue::Bool(b)) => {
                *i == (*b as i64)
            }
            (a, b) => a == b,
        }
    }
}

fn from_value(value: &Value, name: &str) -> Result<CondValue, CondError> {
    match value {
        Value::Str(s) => Ok(CondValue::Str(s.clone())),
        Value::Int(i) => Ok(CondValue::Int(*i)),
        Value::Bool(b) => Ok(CondValue::Bool(*b)),
        Value::List(items) => items
            .iter()
            .map(|v| from_value(v, name))
            .collect::<Result<Vec<_>, _>>()
            .map(CondValue::List),
        Value::Dict(_) => Err(CondError::UnusableVariable(name.to_owned())),
    }
}

struct Parser<'s> {
    condition: &'s str,
    tokens: Vec<Token>,
    pos: usize,
    variables: &'s Dict,
}

impl<'s> Parser<'s> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, CondError> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| CondError::UnexpectedEof(self.condition.to_owned()))?;
        self.pos += 1;
        Ok(tok)
    }

    fn unexpected<T>(&mut self) -> Result<T, CondError> {
        let found = match self.peek() {
            Some(tok) => format!("{tok:?}"),
            None => return Err(CondError::UnexpectedEof(self.condition.to_owned())),
        };
        Err(CondError::UnexpectedToken {
            condition: self.condition.to_owned(),
            found,
        })
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == kw)
    }

    fn or_expr(&mut self) -> Result<CondValue, CondError> {
        let mut lhs = self.and_expr()?;
        while self.is_keyword("or") {
            self.next()?;
            let rhs = self.and_expr()?;
            lhs = CondValue::Bool(lhs.truthy() || rhs.truthy());
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<CondValue, CondError> {
        let mut lhs = self.not_expr()?;
        while self.is_keyword("and") {
            self.next()?;
            let rhs = self.not_expr()?;
            lhs = CondValue::Bool(lhs.truthy() && rhs.truthy());
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<CondValue, CondError> {
        if self.is_keyword("not") {
            self.next()?;
            let operand = self.not_expr()?;
            return Ok(CondValue::Bool(!operand.truthy()));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<CondValue, CondError> {
        let lhs = self.term()?;
        let op = match self.peek() {
            Some(Token::Eq) => "==",
            Some(Token::Ne) => "!=",
            Some(Token::Le) => "<=",
            Some(Token::Ge) => ">=",
            Some(Token::Lt) => "<",
            Some(Token::Gt) => ">",
            Some(Token::Ident(w)) if w == "in" => "in",
            _ => return Ok(lhs),
        };
        self.next()?;
        let rhs = self.term()?;
        let result = match op {
            "==" => lhs.equals(&rhs),
            "!=" => !lhs.equals(&rhs),
            "in" => match &rhs {
                CondValue::List(items) => items.iter().any(|i| i.equals(&lhs)),
                CondValue::Str(haystack) => match &lhs {
                    CondValue::Str(needle) => haystack.contains(needle.as_str()),
                    _ => return Err(CondError::BadMembership(self.condition.to_owned())),
                },
                _ => return Err(CondError::BadMembership(self.condition.to_owned())),
            },
            ordering => {
                let cmp = match (&lhs, &rhs) {
                    (CondValue::Int(a), CondValue::Int(b)) => a.cmp(b),
                    (CondValue::Str(a), CondValue::Str(b)) => a.cmp(b),
                    _ => {
                        return Err(CondError::Unordered {
                            condition: self.condition.to_owned(),
                            lhs: lhs.kind(),
                            rhs: rhs.kind(),
                        });
                    }
                };
                match ordering {
                    "<" => cmp.is_lt(),
                    "<=" => cmp.is_le(),
                    ">" => cmp.is_gt(),
                    ">=" => cmp.is_ge(),
                    _ => unreachable!("comparison operator"),
                }
            }
        };
        Ok(CondValue::Bool(result))
    }

    fn term(&mut self) -> Result<CondValue, CondError> {
        match self.peek() {
            Some(Token::Int(_)) => {
                let Token::Int(i) = self.next()? else {
                    unreachable!()
                };
                Ok(CondValue::Int(i))
            }
            Some(Token::Str(_)) => {
                let Token::Str(s) = self.next()? else {
                    unreachable!()
                };
                Ok(CondValue::Str(s))
            }
            Some(Token::Ident(w)) if w != "and" && w != "or" && w != "not" && w != "in" => {
                let Token::Ident(name) = self.next()? else {
                    unreachable!()
                };
                let value =
                    self.variables
                        .get(&name)
                        .ok_or_else(|| CondError::UnknownVariable {
                            condition: self.condition.to_owned(),
                            name: name.clone(),
                        })?;
                from_value(value, &name)
            }
            Some(Token::LParen) => {
                self.next()?;
                let inner = self.or_expr()?;
                match self.next()? {
                    Token::RParen => Ok(inner),
                    _ => self.unexpected(),
                }
            }
            Some(Token::LBracket) => {
                self.next()?;
                let mut items = Vec::new();
                loop {
                    if matches!(self.peek(), Some(Token::RBracket)) {
                        self.next()?;
                        break;
                    }
                    items.push(self.or_expr()?);
                    match self.peek() {
                        Some(Token::Comma) => {
                            self.next()?;
                        }
                        Some(Token::RBracket) => {}
                        _ => return self.unexpected(),
                    }
                }
                Ok(CondValue::List(items))
            }
            _ => self.unexpected(),
        }
    }
}

/// Evaluate `condition` against `variables`, returning its truthiness.
pub fn evaluate(condition: &str, variables: &Dict) -> Result<bool, CondError> {
    let mut tokens = Vec::new();
    for tok in Token::lexer(condition) {
        match tok {
            Ok(tok) => tokens.push(tok),
            Err(()) => return Err(CondError::UnrecognizedToken(condition.to_owned())),
        }
    }
    let mut parser = Parser {
        condition,
        tokens,
        pos: 0,
        variables,
    };
    let value = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return parser.unexpected().map(|v: CondValue| v.truthy());
    }
    Ok(value.truthy())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(src: &str) -> Dict {
        crate::value::parse_dict(src).unwrap()
    }

    #[test]
    fn equality_and_inequality() {
        let v = vars("{'OS': 'linux', 'jobs': 4}");
        assert!(evaluate("OS=='linux'", &v).unwrap());
        assert!(!evaluate("OS=='mac'", &v).unwrap());
        assert!(evaluate("OS!='mac'", &v).unwrap());
        assert!(evaluate("jobs==4", &v).unwrap());
        assert!(evaluate("jobs>=2 and jobs<8", &v).unwrap());
    }

    #[test]
    fn boolean_connectives() {
        let v = vars("{'a': 1, 'b': 0}");
        assert!(evaluate("a and not b", &v).unwrap());
        assert!(evaluate("b or a", &v).unwrap());
        assert!(!evaluate("b and a", &v).unwrap());
        assert!(evaluate("not (b and a)", &v).unwrap());
    }

    #[test]
    fn membership() {
        let v = vars("{'OS': 'linux', 'oses': ['linux', 'mac']}");
        assert!(evaluate("OS in oses", &v).unwrap());
        assert!(evaluate("OS in ['linux', 'freebsd']", &v).unwrap());
        assert!(!evaluate("'win' in oses", &v).unwrap());
        assert!(evaluate("'nux' in OS", &v).unwrap());
    }

    #[test]
    fn unknown_variable_is_fatal() {
        let v = Dict::new();
        let err = evaluate("MYSTERY==1", &v).unwrap_err();
        assert!(matches!(err, CondError::UnknownVariable { .. }));
    }

    #[test]
    fn cross_type_equality_is_false() {
        let v = vars("{'n': 1}");
        assert!(!evaluate("n=='1'", &v).unwrap());
        assert!(evaluate("n==1", &v).unwrap());
    }

    #[test]
    fn trailing_garbage_rejected() {
        let v = vars("{'a': 1}");
        assert!(evaluate("a == 1 garbage", &v).is_err());
    }
}
