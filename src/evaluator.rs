//! Tree-walking evaluator.
//!
//! Evaluation internally returns `Result<Value, Flow>`: besides errors, the
//! `Err` side carries the `recur` signal so that every intermediate call site
//! propagates it with `?` and only `loop` and closure application inspect it.

use crate::Error;
use crate::MAX_EVAL_DEPTH;
use crate::ast::Value;
use crate::builtinops::get_builtin_ops;
use crate::interop::{HostProvider, StandardHost};
use crate::namespace::NamespaceManager;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::{Arc, LazyLock};

pub mod environment;
pub mod intooperation;
pub(crate) mod special_forms;

pub use environment::Environment;
pub use intooperation::{NumIter, ValueIter};
use intooperation::OperationFn;

/// Expected number of arguments for a native function or special form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive range
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn validate(self, count: usize) -> Result<(), Error> {
        match self {
            Arity::Exact(n) if count != n => Err(Error::arity_error(n, count)),
            Arity::AtLeast(n) if count < n => Err(Error::arity_error(n, count)),
            Arity::Range(min, _) if count < min => Err(Error::arity_error(min, count)),
            Arity::Range(_, max) if count > max => Err(Error::arity_error(max, count)),
            _ => Ok(()),
        }
    }
}

/// Non-value outcome of an evaluation step
#[derive(Debug)]
pub(crate) enum Flow {
    Error(Error),
    /// Replacement bindings travelling to the nearest `loop` or closure call
    Recur(Vec<Value>),
}

impl From<Error> for Flow {
    fn from(error: Error) -> Self {
        Flow::Error(error)
    }
}

pub(crate) type EvalOutcome = Result<Value, Flow>;

/// Evaluate an expression.
///
/// Symbols are resolved through `namespaces` when one is supplied, which
/// enables `alias/member` references and imported host capabilities;
/// otherwise only `env` is consulted.
pub fn evaluate(
    expr: &Value,
    env: &Environment,
    namespaces: Option<&mut NamespaceManager>,
) -> Result<Value, Error> {
    into_result(eval_with_depth_tracking(expr, env, namespaces, 0))
}

/// Surface an outcome to callers outside the evaluator, where a pending
/// `recur` has nowhere left to go
fn into_result(outcome: EvalOutcome) -> Result<Value, Error> {
    match outcome {
        Ok(value) => Ok(value),
        Err(Flow::Error(error)) => Err(error),
        Err(Flow::Recur(args)) => Err(Error::InvalidExpression(format!(
            "recur with {} argument(s) outside of loop or function body",
            args.len()
        ))),
    }
}

/// Evaluate an expression. `depth` counts the closure calls in progress;
/// expression nesting is already bounded by the parser.
pub(crate) fn eval_with_depth_tracking(
    expr: &Value,
    env: &Environment,
    ns: Option<&mut NamespaceManager>,
    depth: usize,
) -> EvalOutcome {
    match expr {
        Value::Number(_)
        | Value::String(_)
        | Value::Boolean(_)
        | Value::Nil
        | Value::Keyword(_)
        | Value::Atom(_)
        | Value::HostObject(_) => Ok(expr.clone()),

        Value::Symbol(name) => eval_symbol(name, env, ns).map_err(Flow::from),

        Value::Vector(items) => Ok(Value::Vector(eval_args(items, env, ns, depth)?)),

        Value::Map(entries) => {
            let mut ns = ns;
            let mut evaluated = BTreeMap::new();
            for (key, value) in entries {
                let value = eval_with_depth_tracking(value, env, ns.as_deref_mut(), depth)?;
                evaluated.insert(key.clone(), value);
            }
            Ok(Value::Map(evaluated))
        }

        Value::List(elements) => eval_list(elements, env, ns, depth).map_err(|flow| match flow {
            Flow::Error(err) => Flow::Error(add_context(err, expr)),
            recur => recur,
        }),

        Value::NativeFunction { .. } | Value::Closure { .. } => Err(Error::InvalidExpression(
            format!("cannot evaluate a bare {}: {expr}", expr.type_name()),
        )
        .into()),
    }
}

fn eval_symbol(
    name: &str,
    env: &Environment,
    ns: Option<&mut NamespaceManager>,
) -> Result<Value, Error> {
    let resolve = |name: &str| match ns.as_deref() {
        Some(manager) => manager.resolve_symbol(name, env),
        None => env.get(name),
    };

    match name.strip_prefix('@') {
        Some(atom_name) if !atom_name.is_empty() => match resolve(atom_name)? {
            Value::Atom(cell) => Ok(cell.borrow().clone()),
            other => Err(Error::TypeError(format!(
                "cannot deref {atom_name}: expected atom, got {}",
                other.type_name()
            ))),
        },
        _ => resolve(name),
    }
}

/// Helper function to add expression context to errors
fn add_context(error: Error, expr: &Value) -> Error {
    const MARKER: &str = "\n  Context: ";
    let with_context = |msg: String| {
        if msg.contains(MARKER) {
            msg
        } else {
            format!("{msg}{MARKER}while evaluating: {expr}")
        }
    };
    match error {
        Error::EvalError(msg) => Error::EvalError(with_context(msg)),
        Error::TypeError(msg) => Error::TypeError(with_context(msg)),
        Error::NativeCallError { function, message } => Error::NativeCallError {
            function,
            message: with_context(message),
        },
        // Resolution, arity and special-form errors carry their own context
        other => other,
    }
}

/// Helper function to evaluate a list of argument expressions with depth tracking
fn eval_args(
    args: &[Value],
    env: &Environment,
    ns: Option<&mut NamespaceManager>,
    depth: usize,
) -> Result<Vec<Value>, Flow> {
    let mut ns = ns;
    args.iter()
        .map(|arg| eval_with_depth_tracking(arg, env, ns.as_deref_mut(), depth))
        .collect()
}

/// Evaluate a list expression: special form, host member sugar, or plain
/// application, in that order.
fn eval_list(
    elements: &[Value],
    env: &Environment,
    ns: Option<&mut NamespaceManager>,
    depth: usize,
) -> EvalOutcome {
    let mut ns = ns;
    let [head, tail @ ..] = elements else {
        return Ok(Value::List(vec![]));
    };

    if let Value::Symbol(name) = head {
        if let Some(form) = special_forms::find_special_form(name) {
            return form.invoke(tail, env, ns, depth);
        }

        if let Some(member) = host_member(name) {
            let [target_expr, arg_exprs @ ..] = tail else {
                return Err(Error::special_form(name, "missing target expression").into());
            };
            let target = eval_with_depth_tracking(target_expr, env, ns.as_deref_mut(), depth)?;
            let args = eval_args(arg_exprs, env, ns.as_deref_mut(), depth)?;
            return Ok(access_host_member(ns, &target, member, args)?);
        }
    }

    let func = eval_with_depth_tracking(head, env, ns.as_deref_mut(), depth)?;
    let args = eval_args(tail, env, ns.as_deref_mut(), depth)?;
    apply(func, args, ns, depth)
}

/// Apply a callable to already-evaluated arguments.
///
/// Closures are re-entered in place for every matching-arity `recur`
/// raised by their body, so self-recursion through `recur` runs in
/// constant stack space.
pub(crate) fn apply(
    callee: Value,
    args: Vec<Value>,
    ns: Option<&mut NamespaceManager>,
    depth: usize,
) -> EvalOutcome {
    match callee {
        Value::NativeFunction { id, arity, func } => {
            if let Some(primitive) = HIGHER_ORDER_FNS.get(id.as_str())
                && Arc::ptr_eq(primitive, &func)
            {
                return apply_higher_order(&id, args, ns, depth);
            }
            if let Some(expected) = arity
                && expected != args.len()
            {
                return Err(Error::arity_error_with_expr(expected, args.len(), id).into());
            }
            func(args).map_err(|err| Error::native_call(&id, err).into())
        }
        Value::Closure {
            params,
            body,
            env: captured,
        } => {
            if params.len() != args.len() {
                return Err(Error::arity_error(params.len(), args.len()).into());
            }
            if depth >= MAX_EVAL_DEPTH {
                return Err(Error::EvalError(format!(
                    "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH} nested calls)"
                ))
                .into());
            }
            let mut ns = ns;
            let mut args = args;
            loop {
                let call_env = captured.extend(&params, args);
                match eval_with_depth_tracking(&body, &call_env, ns.as_deref_mut(), depth + 1) {
                    Err(Flow::Recur(next)) if next.len() == params.len() => args = next,
                    Err(Flow::Recur(next)) => {
                        return Err(
                            Error::arity_error_with_expr(params.len(), next.len(), "recur".into())
                                .into(),
                        );
                    }
                    other => return other,
                }
            }
        }
        other => Err(Error::NotCallable(format!("{other}")).into()),
    }
}

/// Primitives that call back into `apply`, with their arities
const HIGHER_ORDER: [(&str, Arity); 5] = [
    ("map", Arity::Exact(2)),
    ("filter", Arity::Exact(2)),
    ("reduce", Arity::Range(2, 3)),
    ("apply", Arity::Exact(2)),
    ("swap!", Arity::AtLeast(2)),
];

/// Function objects bound for the higher-order primitives. `apply`
/// recognises them by identity and runs them with the caller's namespace
/// manager and call depth; the functions themselves only run when invoked
/// outside the evaluator.
static HIGHER_ORDER_FNS: LazyLock<HashMap<&'static str, Arc<OperationFn>>> =
    LazyLock::new(|| {
        HIGHER_ORDER
            .iter()
            .map(|&(name, _)| {
                let func: Arc<OperationFn> =
                    Arc::new(move |args: Vec<Value>| {
                        into_result(apply_higher_order(name, args, None, 0))
                    });
                (name, func)
            })
            .collect()
    });

fn expect_callable(form: &str, value: &Value) -> Result<(), Error> {
    if value.is_callable() {
        Ok(())
    } else {
        Err(Error::TypeError(format!(
            "{form} expects a function, got {}",
            value.type_name()
        )))
    }
}

fn expect_seq(form: &str, value: Value) -> Result<Vec<Value>, Error> {
    match value {
        Value::List(items) | Value::Vector(items) => Ok(items),
        Value::Nil => Ok(vec![]),
        other => Err(Error::TypeError(format!(
            "{form} expects a list or vector, got {}",
            other.type_name()
        ))),
    }
}

fn apply_higher_order(
    name: &str,
    args: Vec<Value>,
    ns: Option<&mut NamespaceManager>,
    depth: usize,
) -> EvalOutcome {
    if let Some((_, arity)) = HIGHER_ORDER.iter().find(|(id, _)| *id == name) {
        arity.validate(args.len()).map_err(|err| match err {
            Error::ArityMismatch { expected, got, .. } => {
                Error::arity_error_with_expr(expected, got, name.to_owned())
            }
            other => other,
        })?;
    }
    let mut ns = ns;
    let mut args = args.into_iter();
    let first = args.next().unwrap_or(Value::Nil);

    match name {
        "map" => {
            expect_callable(name, &first)?;
            let items = expect_seq(name, args.next().unwrap_or(Value::Nil))?;
            let mut mapped = Vec::with_capacity(items.len());
            for item in items {
                mapped.push(apply(first.clone(), vec![item], ns.as_deref_mut(), depth)?);
            }
            Ok(Value::List(mapped))
        }
        "filter" => {
            expect_callable(name, &first)?;
            let mut kept = Vec::new();
            for item in expect_seq(name, args.next().unwrap_or(Value::Nil))? {
                if apply(first.clone(), vec![item.clone()], ns.as_deref_mut(), depth)?
                    .is_truthy()
                {
                    kept.push(item);
                }
            }
            Ok(Value::List(kept))
        }
        "reduce" => {
            expect_callable(name, &first)?;
            // (reduce f coll) seeds the fold with the first element
            let initial = if args.len() == 2 { args.next() } else { None };
            let mut items = expect_seq(name, args.next().unwrap_or(Value::Nil))?.into_iter();
            let Some(mut acc) = initial.or_else(|| items.next()) else {
                return apply(first, vec![], ns, depth);
            };
            for item in items {
                acc = apply(first.clone(), vec![acc, item], ns.as_deref_mut(), depth)?;
            }
            Ok(acc)
        }
        "apply" => {
            let spread = expect_seq(name, args.next().unwrap_or(Value::Nil))?;
            apply(first, spread, ns, depth)
        }
        "swap!" => {
            let Value::Atom(cell) = first else {
                return Err(Error::TypeError("swap! expects an atom as first argument".into()).into());
            };
            let func = args.next().unwrap_or(Value::Nil);
            expect_callable(name, &func)?;
            let current = cell.borrow().clone();
            let updated = apply(
                func,
                std::iter::once(current).chain(args).collect(),
                ns,
                depth,
            )?;
            *cell.borrow_mut() = updated.clone();
            Ok(updated)
        }
        _ => Err(Error::UndefinedSymbol(name.to_owned()).into()),
    }
}

/// Host member access encoded in a call head
pub(crate) enum HostMember<'a> {
    Method(&'a str),
    Property(&'a str),
}

/// `.method` and `.-property` call sugar; the bare `.` and `.-` forms are
/// special forms handled before this.
fn host_member(name: &str) -> Option<HostMember<'_>> {
    if let Some(property) = name.strip_prefix(".-") {
        return (!property.is_empty()).then_some(HostMember::Property(property));
    }
    name.strip_prefix('.')
        .filter(|method| !method.is_empty() && !method.starts_with('.'))
        .map(HostMember::Method)
}

/// Forward a method call or property read to the host-interop provider
pub(crate) fn access_host_member(
    ns: Option<&mut NamespaceManager>,
    target: &Value,
    member: HostMember<'_>,
    args: Vec<Value>,
) -> Result<Value, Error> {
    let host: Rc<dyn HostProvider> = match ns {
        Some(manager) => manager.host(),
        None => Rc::new(StandardHost::new()),
    };
    match member {
        HostMember::Property(property) => Ok(host.read_property(target, property)),
        HostMember::Method(method) => {
            host.invoke_method(target, method, args)
                .map_err(|err| match err {
                    not_found @ Error::MemberNotFound { .. } => not_found,
                    other => Error::native_call(method, other),
                })
        }
    }
}

/// Create a global environment with built-in functions
pub fn create_global_env() -> Environment {
    let env = Environment::new();

    for builtin_op in get_builtin_ops() {
        let value = match builtin_op.arity {
            // Fixed arity is checked by apply before the call
            Arity::Exact(n) => Value::native(builtin_op.id, Some(n), builtin_op.func.clone()),
            arity => {
                let inner = builtin_op.func.clone();
                Value::native(
                    builtin_op.id,
                    None,
                    Arc::new(move |args: Vec<Value>| {
                        arity.validate(args.len())?;
                        inner(args)
                    }),
                )
            }
        };
        env.define(builtin_op.id, value);
    }
    for (name, func) in HIGHER_ORDER_FNS.iter() {
        env.define(*name, Value::native(name, None, func.clone()));
    }

    env
}

/// Create an atom holding `value`
pub fn new_atom(value: Value) -> Value {
    Value::Atom(Rc::new(RefCell::new(value)))
}
