//! Tokenizer and atom categorizer.
//!
//! Tokenizing works on the raw text: the source is split on `"` so that odd
//! segments (string literal bodies) keep their whitespace, structural
//! characters in the remaining segments are padded with spaces, and the whole
//! thing is split on whitespace. Every structural character `( ) [ ] { } '`
//! becomes its own token even in dense input such as `[x]` or `'(1 2)`.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, one_of},
    combinator::{all_consuming, opt, recognize},
    sequence::{pair, preceded},
};

use crate::ast::{NumberType, Value};
use crate::parser::ParseConfig;

/// Characters that always form a token of their own outside string literals
pub(crate) const STRUCTURAL_CHARS: &str = "()[]{}'";

// Whitespace inside string literals is swapped for private-use sentinels
// before splitting and restored afterwards.
const PROTECTED_WHITESPACE: [(char, char); 4] = [
    (' ', '\u{E000}'),
    ('\n', '\u{E001}'),
    ('\t', '\u{E002}'),
    ('\r', '\u{E003}'),
];

fn protect(ch: char) -> char {
    PROTECTED_WHITESPACE
        .iter()
        .find(|(plain, _)| *plain == ch)
        .map_or(ch, |(_, sentinel)| *sentinel)
}

fn restore(ch: char) -> char {
    PROTECTED_WHITESPACE
        .iter()
        .find(|(_, sentinel)| *sentinel == ch)
        .map_or(ch, |(plain, _)| *plain)
}

/// Split source text into token strings using the default configuration
pub fn tokenize(source: &str) -> Vec<String> {
    tokenize_with_config(source, &ParseConfig::default())
}

/// Split source text into token strings
pub fn tokenize_with_config(source: &str, config: &ParseConfig) -> Vec<String> {
    let stripped;
    let source = if config.handle_comments {
        stripped = strip_comments(source);
        stripped.as_str()
    } else {
        source
    };

    let mut padded = String::with_capacity(source.len() * 2);
    for (i, segment) in source.split('"').enumerate() {
        if i > 0 {
            padded.push('"');
        }
        if i % 2 == 1 {
            padded.extend(segment.chars().map(protect));
        } else {
            for ch in segment.chars() {
                if STRUCTURAL_CHARS.contains(ch) {
                    padded.push(' ');
                    padded.push(ch);
                    padded.push(' ');
                } else {
                    padded.push(ch);
                }
            }
        }
    }

    padded
        .split_whitespace()
        .map(|token| token.chars().map(restore).collect())
        .collect()
}

/// Remove `;` line comments that appear outside string literals
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut in_string = false;
    let mut in_comment = false;

    for ch in source.chars() {
        if in_comment {
            if ch == '\n' {
                in_comment = false;
                out.push(ch);
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = !in_string;
                out.push(ch);
            }
            ';' if !in_string => in_comment = true,
            _ => out.push(ch),
        }
    }
    out
}

/// Recognize an optionally-signed decimal or exponential numeral
fn numeral(input: &str) -> IResult<&str, &str> {
    let digits = || take_while1(|c: char| c.is_ascii_digit());
    recognize((
        opt(one_of("+-")),
        alt((
            recognize(pair(digits(), opt(preceded(char('.'), opt(digits()))))),
            recognize(preceded(char('.'), digits())),
        )),
        opt((one_of("eE"), opt(one_of("+-")), digits())),
    ))
    .parse(input)
}

fn parse_number(token: &str) -> Option<NumberType> {
    let (_, text) = all_consuming(numeral).parse(token).ok()?;
    text.parse::<NumberType>().ok()
}

/// Classify a non-structural token as an atom. Never fails: anything that
/// is not a number, string, boolean, nil or keyword is a symbol.
pub fn categorize(token: &str) -> Value {
    if let Some(n) = parse_number(token) {
        return Value::Number(n);
    }
    if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
        return Value::String(token[1..token.len() - 1].to_owned());
    }
    match token {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        "nil" => Value::Nil,
        _ => match token.strip_prefix(':') {
            Some(name) => Value::Keyword(name.to_owned()),
            None => Value::Symbol(token.to_owned()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{kw, nil, sym, val};

    #[test]
    fn test_tokenize_data_driven() {
        let test_cases: Vec<(&str, Vec<&str>)> = vec![
            ("(+ 1 2)", vec!["(", "+", "1", "2", ")"]),
            ("((a))", vec!["(", "(", "a", ")", ")"]),
            ("  x  ", vec!["x"]),
            ("", vec![]),
            // Whitespace inside string literals is preserved
            (
                "(str \"hello  world\" x)",
                vec!["(", "str", "\"hello  world\"", "x", ")"],
            ),
            ("\"a\nb\"", vec!["\"a\nb\""]),
            // Parentheses inside strings are not split out
            ("\"(not a list)\"", vec!["\"(not a list)\""]),
            // Dense bracket, brace and quote syntax
            ("[x]", vec!["[", "x", "]"]),
            ("(fn [x y] x)", vec!["(", "fn", "[", "x", "y", "]", "x", ")"]),
            ("{:a 1}", vec!["{", ":a", "1", "}"]),
            ("'(1 2)", vec!["'", "(", "1", "2", ")"]),
            ("'x", vec!["'", "x"]),
            // Comments are stripped outside strings only
            ("(+ 1 2) ; trailing", vec!["(", "+", "1", "2", ")"]),
            ("\"a;b\" ; c", vec!["\"a;b\""]),
            ("; only a comment\n42", vec!["42"]),
        ];

        for (i, (input, expected)) in test_cases.into_iter().enumerate() {
            let actual = tokenize(input);
            let actual: Vec<&str> = actual.iter().map(String::as_str).collect();
            assert_eq!(actual, expected, "Tokenize test #{} ({input:?})", i + 1);
        }
    }

    #[test]
    fn test_comments_kept_when_disabled() {
        let config = ParseConfig {
            handle_comments: false,
            ..ParseConfig::default()
        };
        let tokens = tokenize_with_config("a ;b", &config);
        assert_eq!(tokens, vec!["a".to_owned(), ";b".to_owned()]);
    }

    #[test]
    fn test_categorize_data_driven() {
        let test_cases = vec![
            // Numbers
            ("42", val(42)),
            ("-5", val(-5)),
            ("+7", val(7)),
            ("3.25", val(3.25)),
            ("-0.5", val(-0.5)),
            (".5", val(0.5)),
            ("1.", val(1)),
            ("1e3", val(1000)),
            ("2.5E-1", val(0.25)),
            // Not numbers
            ("1a", sym("1a")),
            ("-", sym("-")),
            ("+", sym("+")),
            ("e10", sym("e10")),
            ("1e", sym("1e")),
            // Strings
            ("\"hello\"", val("hello")),
            ("\"\"", val("")),
            ("\"a\\nb\"", val("a\\nb")), // no escape processing
            ("\"", sym("\"")),
            // Literals
            ("true", val(true)),
            ("false", val(false)),
            ("nil", nil()),
            // Keywords
            (":else", kw("else")),
            (":a/b", kw("a/b")),
            // Symbols
            ("foo", sym("foo")),
            ("ns-b/value", sym("ns-b/value")),
            ("@counter", sym("@counter")),
            (".toUpperCase", sym(".toUpperCase")),
            (".-length", sym(".-length")),
            ("swap!", sym("swap!")),
        ];

        for (i, (token, expected)) in test_cases.into_iter().enumerate() {
            assert_eq!(
                categorize(token),
                expected,
                "Categorize test #{} ({token})",
                i + 1
            );
        }
    }
}
