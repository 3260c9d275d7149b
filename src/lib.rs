//! LispXP - an embeddable interpreter for a small Clojure-flavoured Lisp
//!
//! Source text goes in, a typed runtime [`Value`](ast::Value) comes out. The
//! interpreter is a plain tree-walker: the parsed program is itself a `Value`
//! tree (code is data), evaluated against lexically scoped environments.
//!
//! ```lisp
//! (def make-adder (fn [x] (fn [y] (+ x y))))
//! ((make-adder 5) 3)                         ; => 8
//! (loop [i 0 acc 0]
//!   (if (< i 10) (recur (+ i 1) (+ acc i)) acc))  ; => 45
//! (map (fn [x] (* x x)) [1 2 3])             ; => (1 4 9)
//! ```
//!
//! ## Namespaces
//!
//! Every top-level form runs in the current namespace. `(ns app (:require
//! [util :as u]))` switches namespaces and registers aliases, after which
//! `u/helper` resolves `helper` inside `util`. Required namespaces found on
//! disk are loaded lazily, after the requiring `ns` form completes, so
//! mutually requiring files never recurse into each other.
//!
//! ## Host interop
//!
//! Foreign objects and modules are exposed through a
//! [`HostProvider`](interop::HostProvider). `(.toUpperCase s)` invokes a
//! method, `(.-length s)` reads a property, and `(:import math)` in an `ns`
//! clause makes a host module's exports callable by bare name.
//!
//! ## Modules
//!
//! - `lexer` / `parser`: text to tokens to `Value` trees
//! - `evaluator`: expression evaluation, environments and special forms
//! - `namespace`: namespace registry and qualified symbol resolution
//! - `interop` / `loader`: the host-object and source-file collaborators
//! - `builtinops`: the built-in native function registry
//! - `program`: the top-level entry surface ([`Interpreter`](program::Interpreter))

use std::fmt;

/// Maximum nesting depth accepted by the parser
pub const MAX_PARSE_DEPTH: usize = 256;

/// Maximum number of nested closure calls before a runaway recursion is
/// reported as an error. `loop`/`recur` iteration and self-`recur` do not
/// consume depth, nor does expression nesting within one call.
///
/// Each nested call uses a few KiB of native stack (more in debug builds),
/// so programs that recurse this deep need a thread with a stack of about
/// [`EVAL_STACK_SIZE`].
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Native stack size that comfortably fits [`MAX_EVAL_DEPTH`] nested calls
pub const EVAL_STACK_SIZE: usize = 512 * 1024 * 1024;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (unexpected closing bracket, malformed map literal)
    InvalidSyntax,
    /// Input ended before a collection was closed (strict mode only)
    Incomplete,
    /// Closing brackets left over after the last complete form (strict mode only)
    TrailingContent,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet showing the tokens around the failure (max 100 chars)
    pub context: Option<String>,
    /// The problematic token encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError whose context is the tokens surrounding `position`
    pub fn with_token_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        tokens: &[String],
        position: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let position = position.min(tokens.len());
        let start = position.saturating_sub(5);
        let end = (position + 5).min(tokens.len());
        let mut context = String::new();
        if start > 0 {
            context.push_str("[...] ");
        }
        context.push_str(&tokens[start..end].join(" "));
        if end < tokens.len() {
            context.push_str(" [...]");
        }
        let context: String = context
            .chars()
            .take(MAX_CONTEXT)
            .collect::<String>()
            .replace('\n', "\\n");

        Self::new(kind, message, Some(context), tokens.get(position).cloned())
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Reserved for a stricter tokenizer; the current one never fails
    LexError(String),
    ParseError(ParseError),
    UndefinedSymbol(String),
    /// An `alias/member` symbol whose alias is not registered by `:require`
    UnknownNamespaceAlias(String),
    MemberNotFoundInNamespace {
        namespace: String,
        member: String,
    },
    ArityMismatch {
        expected: usize,
        got: usize,
        expression: Option<String>, // Optional expression context
    },
    SpecialFormError {
        form: String,
        message: String,
    },
    NotCallable(String),
    InvalidExpression(String),
    /// A host method that the interop provider could not find on its target
    MemberNotFound {
        target: String,
        member: String,
    },
    /// A failure raised by a native function or the host provider
    NativeCallError {
        function: String,
        message: String,
    },
    /// Argument type mismatch inside a native function
    TypeError(String),
    /// Generic runtime failure (raised by natives, limits and `error`)
    EvalError(String),
}

impl Error {
    /// Create an ArityMismatch without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityMismatch {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityMismatch with expression context
    pub fn arity_error_with_expr(expected: usize, got: usize, expression: String) -> Self {
        Error::ArityMismatch {
            expected,
            got,
            expression: Some(expression),
        }
    }

    pub fn special_form(form: &str, message: impl Into<String>) -> Self {
        Error::SpecialFormError {
            form: form.to_owned(),
            message: message.into(),
        }
    }

    /// Wrap a failure coming out of a native callable. Failures that are
    /// already native call errors keep their original function name.
    pub fn native_call(function: &str, error: Error) -> Self {
        match error {
            already @ Error::NativeCallError { .. } => already,
            other => Error::NativeCallError {
                function: function.to_owned(),
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::LexError(msg) => write!(f, "LexError: {msg}"),
            Error::ParseError(e) => {
                write!(f, "ParseError: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::UndefinedSymbol(name) => write!(f, "Undefined symbol: {name}"),
            Error::UnknownNamespaceAlias(alias) => {
                write!(f, "Unknown namespace alias: {alias}")
            }
            Error::MemberNotFoundInNamespace { namespace, member } => {
                write!(f, "No member '{member}' in namespace {namespace}")
            }
            Error::ArityMismatch {
                expected,
                got,
                expression,
            } => match expression {
                Some(expr) => write!(
                    f,
                    "ArityMismatch: expression {expr}: expected {expected} arguments, got {got}"
                ),
                None => write!(
                    f,
                    "ArityMismatch: function expected {expected} arguments but got {got}"
                ),
            },
            Error::SpecialFormError { form, message } => {
                write!(f, "SpecialFormError in '{form}': {message}")
            }
            Error::NotCallable(what) => write!(f, "Cannot apply non-function: {what}"),
            Error::InvalidExpression(msg) => write!(f, "Invalid expression: {msg}"),
            Error::MemberNotFound { target, member } => {
                write!(f, "Member '{member}' not found on {target}")
            }
            Error::NativeCallError { function, message } => {
                write!(f, "Error calling {function}: {message}")
            }
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod interop;
pub mod lexer;
pub mod loader;
pub mod namespace;
pub mod parser;
pub mod program;

pub use ast::Value;
pub use evaluator::{Environment, evaluate};
pub use namespace::NamespaceManager;
pub use program::{Interpreter, eval_top_level};
