//! Top-level entry surface: whole programs, files and interpreter state.

use crate::Error;
use crate::ast::Value;
use crate::evaluator::{Environment, create_global_env, evaluate};
use crate::interop::HostProvider;
use crate::loader::SourceLocator;
use crate::namespace::NamespaceManager;
use crate::parser::{ParseConfig, parse_program};
use std::path::Path;
use std::rc::Rc;

/// Evaluate every top-level form of `source` in the current namespace,
/// returning the value of the last one (`nil` for an empty program).
pub fn eval_source(source: &str, namespaces: &mut NamespaceManager) -> Result<Value, Error> {
    eval_source_with_config(source, namespaces, ParseConfig::default())
}

/// Same as [`eval_source`] with explicit parser settings.
///
/// Each form is evaluated in whichever namespace is current when it starts,
/// so an `(ns ...)` form redirects everything after it. Namespaces required
/// by a form are loaded right after that form, in require order, even when
/// the form itself fails afterwards.
pub fn eval_source_with_config(
    source: &str,
    namespaces: &mut NamespaceManager,
    config: ParseConfig,
) -> Result<Value, Error> {
    let mut result = Value::Nil;
    for form in parse_program(source, config)? {
        result = eval_form(&form, namespaces, config)?;
    }
    Ok(result)
}

fn eval_form(
    form: &Value,
    namespaces: &mut NamespaceManager,
    config: ParseConfig,
) -> Result<Value, Error> {
    let env = namespaces.current_env();
    let outcome = evaluate(form, &env, Some(namespaces));
    load_pending_namespaces(namespaces, config);
    outcome
}

fn load_pending_namespaces(namespaces: &mut NamespaceManager, config: ParseConfig) {
    for name in namespaces.take_pending_loads() {
        namespaces.evaluate_deferred_namespace(&name, |content, namespaces| {
            eval_source_with_config(content, namespaces, config)
        });
    }
}

/// An interpreter instance: a namespace registry over a global environment
/// populated with the builtins.
///
/// ```
/// use lispxp::Interpreter;
/// use lispxp::ast::Value;
///
/// let mut interp = Interpreter::new();
/// interp.eval_top_level("(defn square [x] (* x x))").unwrap();
/// assert_eq!(interp.eval_top_level("(square 7)").unwrap(), Value::from(49));
/// ```
#[derive(Debug)]
pub struct Interpreter {
    namespaces: NamespaceManager,
    config: ParseConfig,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter {
            namespaces: NamespaceManager::new(create_global_env()),
            config: ParseConfig::default(),
        }
    }

    /// Replace the host-interop provider
    pub fn with_host(self, host: Rc<dyn HostProvider>) -> Self {
        Interpreter {
            namespaces: self.namespaces.with_host(host),
            config: self.config,
        }
    }

    /// Replace the source locator used by `(:require ...)`
    pub fn with_locator(self, locator: impl SourceLocator + 'static) -> Self {
        Interpreter {
            namespaces: self.namespaces.with_locator(locator),
            config: self.config,
        }
    }

    pub fn with_config(mut self, config: ParseConfig) -> Self {
        self.config = config;
        self
    }

    /// The environment holding the builtins, shared by every namespace
    pub fn global_env(&self) -> &Environment {
        self.namespaces.base_env()
    }

    /// Environment of the current namespace
    pub fn current_env(&self) -> Environment {
        self.namespaces.current_env()
    }

    pub fn namespaces(&self) -> &NamespaceManager {
        &self.namespaces
    }

    pub fn namespaces_mut(&mut self) -> &mut NamespaceManager {
        &mut self.namespaces
    }

    /// Evaluate an already parsed expression in the current namespace,
    /// then load any namespaces it required
    pub fn evaluate(&mut self, expr: &Value) -> Result<Value, Error> {
        eval_form(expr, &mut self.namespaces, self.config)
    }

    /// Evaluate a whole program, returning the last value
    pub fn eval_top_level(&mut self, source: &str) -> Result<Value, Error> {
        eval_source_with_config(source, &mut self.namespaces, self.config)
    }

    /// Read and evaluate a source file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<Value, Error> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|err| Error::EvalError(format!("cannot read {}: {err}", path.display())))?;
        log::debug!("loading {}", path.display());
        self.eval_top_level(&source)
    }

    /// Drop all namespaces and definitions and start from fresh builtins.
    /// Host and locator settings are kept.
    pub fn reset_global_state(&mut self) {
        self.namespaces.reset(create_global_env());
    }
}

/// Evaluate `source` in a fresh interpreter
pub fn eval_top_level(source: &str) -> Result<Value, Error> {
    Interpreter::new().eval_top_level(source)
}
