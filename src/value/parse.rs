//! Parser for the build-description literal syntax.
//!
//! The on-disk format is a self-describing literal: single- or
//! double-quoted strings, decimal integers, `[...]` sequences and
//! `{...}` mappings with string keys, `#` line comments, and optional
//! trailing commas.

use logos::Logos;

use super::{Dict, Value};

/// Errors during parsing of a build description.
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum ParseError {
    #[error("unrecognized token at {0}:{1}")]
    UnrecognizedToken(usize, usize),

    #[error("unexpected {0} at {1}:{2}")]
    UnexpectedToken(String, usize, usize),

    #[error("unexpected end of file while {0}")]
    UnexpectedEof(String),

    #[error("trailing content after the top-level value at {0}:{1}")]
    TrailingContent(usize, usize),
}

fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[derive(Debug, PartialEq, Clone, logos::Logos)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"#[^\n]*")]
enum Token {
    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    #[regex(r"'(?:[^'\\\n]|\\.)*'", |lex| unescape(lex.slice()))]
    #[regex(r#""(?:[^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::LBrace => "'{'".to_owned(),
            Token::RBrace => "'}'".to_owned(),
            Token::LBracket => "'['".to_owned(),
            Token::RBracket => "']'".to_owned(),
            Token::Comma => "','".to_owned(),
            Token::Colon => "':'".to_owned(),
            Token::Str(s) => format!("string {s:?}"),
            Token::Int(i) => format!("integer {i}"),
        }
    }
}

/// (line, column), both 1-based, of a byte offset in the source.
fn line_col(src: &str, offset: usize) -> (usize, usize) {
    let upto = &src[..offset.min(src.len())];
    let line = upto.matches('\n').count() + 1;
    let col = offset - upto.rfind('\n').map(|p| p + 1).unwrap_or(0) + 1;
    (line, col)
}

struct Lexer<'s> {
    src: &'s str,
    inner: logos::Lexer<'s, Token>,
    peeked: Option<Token>,
}

impl<'s> Lexer<'s> {
    fn new(src: &'s str) -> Self {
        Self {
            src,
            inner: Token::lexer(src),
            peeked: None,
        }
    }

    fn pos(&self) -> (usize, usize) {
        line_col(self.src, self.inner.span().start)
    }

    fn peek(&mut self) -> Result<Option<&Token>, ParseError> {
        if self.peeked.is_none() {
            self.peeked = match self.inner.next() {
                None => None,
                Some(Ok(tok)) => Some(tok),
                Some(Err(())) => {
                    let (line, col) = self.pos();
                    return Err(ParseError::UnrecognizedToken(line, col));
                }
            };
        }
        Ok(self.peeked.as_ref())
    }

    fn next(&mut self, while_doing: &str) -> Result<Token, ParseError> {
        if let Some(tok) = self.peeked.take() {
            return Ok(tok);
        }
        match self.inner.next() {
            None => Err(ParseError::UnexpectedEof(while_doing.to_owned())),
            Some(Ok(tok)) => Ok(tok),
            Some(Err(())) => {
                let (line, col) = self.pos();
                Err(ParseError::UnrecognizedToken(line, col))
            }
        }
    }

    fn expect(&mut self, expected: &Token, while_doing: &str) -> Result<(), ParseError> {
        let tok = self.next(while_doing)?;
        if &tok == expected {
            Ok(())
        } else {
            let (line, col) = self.pos();
            Err(ParseError::UnexpectedToken(tok.describe(), line, col))
        }
    }
}

/// Parse a complete source text into a single value.
pub fn parse_value(src: &str) -> Result<Value, ParseError> {
    let mut lexer = Lexer::new(src);
    let value = parse_one(&mut lexer)?;
    if lexer.peek()?.is_some() {
        let (line, col) = lexer.pos();
        return Err(ParseError::TrailingContent(line, col));
    }
    Ok(value)
}

/// Parse a complete source text whose top-level value must be a mapping,
/// which is the shape of every build description.
pub fn parse_dict(src: &str) -> Result<Dict, ParseError> {
    match parse_value(src)? {
        Value::Dict(d) => Ok(d),
        other => Err(ParseError::UnexpectedToken(
            other.kind().to_owned(),
            1,
            1,
        )),
    }
}

fn parse_one(lexer: &mut Lexer<'_>) -> Result<Value, ParseError> {
    match lexer.next("parsing a value")? {
        Token::Str(s) => Ok(Value::Str(s)),
        Token::Int(i) => Ok(Value::Int(i)),
        Token::LBracket => parse_list(lexer),
        Token::LBrace => parse_dict_body(lexer).map(Value::Dict),
        tok => {
            let (line, col) = lexer.pos();
            Err(ParseError::UnexpectedToken(tok.describe(), line, col))
        }
    }
}

fn parse_list(lexer: &mut Lexer<'_>) -> Result<Value, ParseError> {
    let mut items = Vec::new();
    loop {
        match lexer.peek()? {
            Some(Token::RBracket) => {
                lexer.next("parsing a list")?;
                return Ok(Value::List(items));
            }
            Some(_) => {}
            None => return Err(ParseError::UnexpectedEof("parsing a list".to_owned())),
        }
        items.push(parse_one(lexer)?);
        match lexer.next("parsing a list")? {
            Token::Comma => {}
            Token::RBracket => return Ok(Value::List(items)),
            tok => {
                let (line, col) = lexer.pos();
                return Err(ParseError::UnexpectedToken(tok.describe(), line, col));
            }
        }
    }
}

fn parse_dict_body(lexer: &mut Lexer<'_>) -> Result<Dict, ParseError> {
    let mut dict = Dict::new();
    loop {
        let key = match lexer.next("parsing a dict")? {
            Token::RBrace => return Ok(dict),
            Token::Str(s) => s,
            tok => {
                let (line, col) = lexer.pos();
                return Err(ParseError::UnexpectedToken(tok.describe(), line, col));
            }
        };
        lexer.expect(&Token::Colon, "parsing a dict entry")?;
        let value = parse_one(lexer)?;
        // Duplicate keys follow the literal format's dict semantics:
        // the last occurrence wins.
        dict.insert(key, value);
        match lexer.next("parsing a dict")? {
            Token::Comma => {}
            Token::RBrace => return Ok(dict),
            tok => {
                let (line, col) = lexer.pos();
                return Err(ParseError::UnexpectedToken(tok.describe(), line, col));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;

    #[test]
    fn parses_nested_literals() {
        let src = r#"
# A tiny build description.
{
  'targets': [
    {
      'target_name': 'hello',
      'type': 'executable',
      'sources': ['hello.c'],  # trailing comma next line
    },
  ],
  'answer': 42,
}
"#;
        let value = parse_value(src).unwrap();
        expect![[r#"{'targets': [{'target_name': 'hello', 'type': 'executable', 'sources': ['hello.c']}], 'answer': 42}"#]]
            .assert_eq(&value.to_string());
    }

    #[test]
    fn string_escapes() {
        let value = parse_value(r#"'a\'b\\c\nd'"#).unwrap();
        assert_eq!(value, Value::Str("a'b\\c\nd".to_owned()));
        let value = parse_value(r#""say \"hi\"""#).unwrap();
        assert_eq!(value, Value::Str("say \"hi\"".to_owned()));
    }

    #[test]
    fn negative_integers() {
        assert_eq!(parse_value("-7").unwrap(), Value::Int(-7));
    }

    #[test]
    fn rejects_unbalanced_input() {
        assert!(matches!(
            parse_value("{'a': ["),
            Err(ParseError::UnexpectedEof(_))
        ));
        assert!(matches!(
            parse_value("{'a': 1} 2"),
            Err(ParseError::TrailingContent(..))
        ));
    }

    #[test]
    fn duplicate_keys_last_occurrence_wins() {
        assert_eq!(
            parse_value("{'a': 1, 'a': 2, 'b': 3}").unwrap(),
            parse_value("{'a': 2, 'b': 3}").unwrap()
        );
    }

    #[test]
    fn reports_position_of_bad_token() {
        let err = parse_value("{\n  'a': !\n}").unwrap_err();
        assert_eq!(err, ParseError::UnrecognizedToken(2, 8));
    }
}
