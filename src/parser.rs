//! Recursive-descent structural parser: token sequence to `Value` trees.
//!
//! `(` … `)` builds a `List`, `[` … `]` a `Vector`, `{` … `}` a `Map` of
//! key/value pairs, and `'X` is rewritten to `(quote X)`. Every other token is
//! classified by [`categorize`]. By default the parser is lenient: collections
//! left open at end of input are closed silently and stray closing brackets
//! are skipped. [`ParseConfig::strict`] turns both into `ParseError`s.

use std::collections::BTreeMap;

use crate::ast::{Value, sym};
use crate::lexer::{categorize, tokenize_with_config};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Parser configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseConfig {
    /// Strip `;` line comments (outside string literals) before tokenizing
    pub handle_comments: bool,
    /// Reject unbalanced or mismatched brackets instead of closing them silently
    pub strict: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: true,
            strict: false,
        }
    }
}

fn is_closer(token: &str) -> bool {
    matches!(token, ")" | "]" | "}")
}

struct Parser<'t> {
    tokens: &'t [String],
    pos: usize,
    config: ParseConfig,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [String], config: ParseConfig) -> Self {
        Parser {
            tokens,
            pos: 0,
            config,
        }
    }

    fn peek(&self) -> Option<&'t str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn error(&self, kind: ParseErrorKind, message: impl Into<String>) -> Error {
        Error::ParseError(ParseError::with_token_context(
            kind,
            message,
            self.tokens,
            self.pos,
        ))
    }

    /// Parse every top-level form in the token stream
    fn parse_all(&mut self) -> Result<Vec<Value>, Error> {
        let mut forms = Vec::new();
        while let Some(token) = self.peek() {
            if is_closer(token) {
                if self.config.strict {
                    return Err(self.error(
                        ParseErrorKind::TrailingContent,
                        format!("Unexpected closing '{token}'"),
                    ));
                }
                self.pos += 1;
                continue;
            }
            forms.push(self.parse_form(0)?);
        }
        Ok(forms)
    }

    fn parse_form(&mut self, depth: usize) -> Result<Value, Error> {
        if depth >= MAX_PARSE_DEPTH {
            return Err(self.error(
                ParseErrorKind::TooDeeplyNested,
                format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
            ));
        }
        let Some(token) = self.peek() else {
            return self.missing_form("Unexpected end of input");
        };
        self.pos += 1;

        match token {
            "(" => Ok(Value::List(self.parse_seq(")", depth)?)),
            "[" => Ok(Value::Vector(self.parse_seq("]", depth)?)),
            "{" => self.parse_map(depth),
            "'" => {
                let quoted = match self.peek() {
                    Some(next) if !is_closer(next) => self.parse_form(depth + 1)?,
                    _ => self.missing_form("Nothing to quote")?,
                };
                Ok(Value::List(vec![sym("quote"), quoted]))
            }
            closer if is_closer(closer) => {
                self.pos -= 1;
                Err(self.error(
                    ParseErrorKind::InvalidSyntax,
                    format!("Unexpected closing '{closer}'"),
                ))
            }
            atom => Ok(categorize(atom)),
        }
    }

    /// Lenient mode substitutes `nil` where a form is missing
    fn missing_form(&self, message: &str) -> Result<Value, Error> {
        if self.config.strict {
            Err(self.error(ParseErrorKind::Incomplete, message))
        } else {
            Ok(Value::Nil)
        }
    }

    /// Consume a closing token, checking it matches `close` in strict mode
    fn close(&mut self, token: &str, close: &str) -> Result<(), Error> {
        if token != close && self.config.strict {
            return Err(self.error(
                ParseErrorKind::InvalidSyntax,
                format!("Mismatched closing '{token}', expected '{close}'"),
            ));
        }
        self.pos += 1;
        Ok(())
    }

    fn parse_seq(&mut self, close: &str, depth: usize) -> Result<Vec<Value>, Error> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => {
                    if self.config.strict {
                        return Err(self.error(
                            ParseErrorKind::Incomplete,
                            format!("Unterminated collection, expected '{close}'"),
                        ));
                    }
                    return Ok(items);
                }
                Some(token) if is_closer(token) => {
                    self.close(token, close)?;
                    return Ok(items);
                }
                Some(_) => items.push(self.parse_form(depth + 1)?),
            }
        }
    }

    fn parse_map(&mut self, depth: usize) -> Result<Value, Error> {
        let mut map = BTreeMap::new();
        loop {
            let key = match self.peek() {
                None => {
                    self.missing_form("Unterminated map literal, expected '}'")?;
                    break;
                }
                Some(token) if is_closer(token) => {
                    self.close(token, "}")?;
                    break;
                }
                Some(_) => self.parse_map_key(depth)?,
            };
            let value = match self.peek() {
                Some(token) if !is_closer(token) => self.parse_form(depth + 1)?,
                _ => self.missing_form("Map literal key without a value")?,
            };
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }

    fn parse_map_key(&mut self, depth: usize) -> Result<String, Error> {
        Ok(match self.parse_form(depth + 1)? {
            Value::Keyword(name) | Value::String(name) | Value::Symbol(name) => name,
            other => other.to_string(),
        })
    }
}

/// Parse a token stream. No forms parse to `nil`, a single form is
/// returned as-is, and several forms are wrapped in a `List`.
pub fn parse_tokens(tokens: &[String], config: ParseConfig) -> Result<Value, Error> {
    let mut forms = Parser::new(tokens, config).parse_all()?;
    Ok(match forms.len() {
        0 => Value::Nil,
        1 => forms.remove(0),
        _ => Value::List(forms),
    })
}

/// Parse source text with the default (lenient) configuration
pub fn parse(source: &str) -> Result<Value, Error> {
    parse_with_config(source, ParseConfig::default())
}

pub fn parse_with_config(source: &str, config: ParseConfig) -> Result<Value, Error> {
    let tokens = tokenize_with_config(source, &config);
    parse_tokens(&tokens, config)
}

/// Parse source text into its sequence of top-level forms
pub fn parse_program(source: &str, config: ParseConfig) -> Result<Vec<Value>, Error> {
    let tokens = tokenize_with_config(source, &config);
    Parser::new(&tokens, config).parse_all()
}
