//! Special-form registry.
//!
//! Each form receives its unevaluated arguments, the current environment and
//! a [`FormContext`] through which it re-enters the evaluator. Arity is
//! validated by [`SpecialForm::invoke`] before the handler runs, so handlers
//! only check the shape of their arguments.

use crate::Error;
use crate::ast::{Value, sym};
use crate::evaluator::{
    Arity, Environment, EvalOutcome, Flow, HostMember, access_host_member,
    eval_with_depth_tracking,
};
use crate::namespace::NamespaceManager;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::LazyLock;

/// Re-entrant evaluator callback handed to special forms
pub(crate) type EvalFn =
    fn(&Value, &Environment, Option<&mut NamespaceManager>, usize) -> EvalOutcome;

type Handler = fn(&[Value], &Environment, &mut FormContext<'_>) -> EvalOutcome;

/// Evaluation context threaded through special-form handlers
pub(crate) struct FormContext<'a> {
    eval: EvalFn,
    ns: Option<&'a mut NamespaceManager>,
    depth: usize,
}

impl FormContext<'_> {
    /// Evaluate a sub-expression at the current call depth
    fn eval(&mut self, expr: &Value, env: &Environment) -> EvalOutcome {
        (self.eval)(expr, env, self.ns.as_deref_mut(), self.depth)
    }

    /// Evaluate a body in order, returning the last value (`nil` if empty)
    fn eval_body(&mut self, body: &[Value], env: &Environment) -> EvalOutcome {
        let mut result = Value::Nil;
        for expr in body {
            result = self.eval(expr, env)?;
        }
        Ok(result)
    }
}

pub(crate) struct SpecialForm {
    pub(crate) name: &'static str,
    pub(crate) arity: Arity,
    handler: Handler,
}

impl SpecialForm {
    pub(crate) fn invoke(
        &self,
        args: &[Value],
        env: &Environment,
        ns: Option<&mut NamespaceManager>,
        depth: usize,
    ) -> EvalOutcome {
        log::trace!("special form {} with {} argument(s)", self.name, args.len());
        if let Err(Error::ArityMismatch { expected, got, .. }) = self.arity.validate(args.len()) {
            let requirement = match self.arity {
                Arity::Exact(_) => "exactly",
                Arity::AtLeast(_) => "at least",
                Arity::Range(min, _) if got < min => "at least",
                _ => "at most",
            };
            return Err(Error::special_form(
                self.name,
                format!("expected {requirement} {expected} argument(s), got {got}"),
            )
            .into());
        }
        let mut cx = FormContext {
            eval: eval_with_depth_tracking,
            ns,
            depth,
        };
        (self.handler)(args, env, &mut cx)
    }
}

static SPECIAL_FORMS: LazyLock<HashMap<&'static str, SpecialForm>> = LazyLock::new(|| {
    let forms = [
        ("def", Arity::Exact(2), eval_def as Handler),
        ("defn", Arity::AtLeast(3), eval_defn),
        ("defun", Arity::AtLeast(3), eval_defn),
        ("define", Arity::AtLeast(3), eval_defn),
        ("fn", Arity::Exact(2), eval_fn),
        ("let", Arity::AtLeast(2), eval_let),
        ("loop", Arity::Exact(2), eval_loop),
        ("recur", Arity::Any, eval_recur),
        ("if", Arity::Range(2, 3), eval_if),
        ("quote", Arity::Exact(1), eval_quote),
        ("do", Arity::Any, eval_do),
        ("cond", Arity::Any, eval_cond),
        ("and", Arity::Any, eval_and),
        ("or", Arity::Any, eval_or),
        ("when", Arity::AtLeast(1), eval_when),
        ("set!", Arity::Exact(2), eval_set),
        ("ns", Arity::AtLeast(1), eval_ns),
        (".", Arity::AtLeast(2), eval_dot),
        (".-", Arity::Exact(2), eval_dot_property),
    ];
    forms
        .into_iter()
        .map(|(name, arity, handler)| {
            (
                name,
                SpecialForm {
                    name,
                    arity,
                    handler,
                },
            )
        })
        .collect()
});

pub(crate) fn find_special_form(name: &str) -> Option<&'static SpecialForm> {
    SPECIAL_FORMS.get(name)
}

fn form_error(form: &str, message: impl Into<String>) -> Flow {
    Error::special_form(form, message).into()
}

/// Parameter names from a `[a b]` vector or `(a b)` list
fn parse_params(form: &str, params: &Value) -> Result<Vec<String>, Flow> {
    let Some(items) = params.as_seq() else {
        return Err(form_error(
            form,
            format!("parameters must be a vector, got {}", params.type_name()),
        ));
    };
    let mut names: Vec<String> = Vec::with_capacity(items.len());
    for param in items {
        let Value::Symbol(name) = param else {
            return Err(form_error(
                form,
                format!("parameter must be a symbol, got {param}"),
            ));
        };
        if names.contains(name) {
            return Err(form_error(form, format!("Duplicate parameter name: {name}")));
        }
        names.push(name.clone());
    }
    Ok(names)
}

/// `[name value ...]` binding pairs from a vector or list
fn parse_bindings<'v>(form: &str, bindings: &'v Value) -> Result<Vec<(&'v str, &'v Value)>, Flow> {
    let Some(items) = bindings.as_seq() else {
        return Err(form_error(
            form,
            format!("bindings must be a vector, got {}", bindings.type_name()),
        ));
    };
    if items.len() % 2 != 0 {
        return Err(form_error(form, "bindings require an even number of forms"));
    }
    items
        .chunks(2)
        .map(|pair| match pair {
            [Value::Symbol(name), value] => Ok((name.as_str(), value)),
            [other, _] => Err(form_error(
                form,
                format!("binding name must be a symbol, got {other}"),
            )),
            _ => Err(form_error(form, "bindings require an even number of forms")),
        })
        .collect()
}

fn make_closure(params: Vec<String>, body: Value, env: &Environment) -> Value {
    Value::Closure {
        params,
        body: Rc::new(body),
        env: env.clone(),
    }
}

fn eval_def(args: &[Value], env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    let [name, expr] = args else {
        return Err(form_error("def", "expected a name and a value"));
    };
    let Value::Symbol(name) = name else {
        return Err(form_error("def", format!("first argument must be a symbol, got {name}")));
    };
    let value = cx.eval(expr, env)?;
    env.define(name.as_str(), value.clone());
    Ok(value)
}

/// `(defn name [docstring] [params] body...)`
fn eval_defn(args: &[Value], env: &Environment, _cx: &mut FormContext<'_>) -> EvalOutcome {
    let Value::Symbol(name) = &args[0] else {
        return Err(form_error("defn", format!("name must be a symbol, got {}", args[0])));
    };
    let rest = match &args[1..] {
        [Value::String(_), rest @ ..] if rest.len() >= 2 => rest,
        rest => rest,
    };
    let [params, body @ ..] = rest else {
        return Err(form_error("defn", "missing parameter vector"));
    };
    let params = parse_params("defn", params)?;
    let body = match body {
        [single] => single.clone(),
        many => {
            let mut exprs = Vec::with_capacity(many.len() + 1);
            exprs.push(sym("do"));
            exprs.extend_from_slice(many);
            Value::List(exprs)
        }
    };

    // The closure captures `env`, so defining into it makes recursion work
    let closure = make_closure(params, body, env);
    env.define(name.as_str(), closure.clone());
    Ok(closure)
}

fn eval_fn(args: &[Value], env: &Environment, _cx: &mut FormContext<'_>) -> EvalOutcome {
    let [params, body] = args else {
        return Err(form_error("fn", "expected a parameter vector and a body"));
    };
    Ok(make_closure(parse_params("fn", params)?, body.clone(), env))
}

fn eval_let(args: &[Value], env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    let bindings = parse_bindings("let", &args[0])?;
    let let_env = Environment::with_parent(env);
    for (name, expr) in bindings {
        let value = cx.eval(expr, &let_env)?;
        let_env.define(name, value);
    }
    cx.eval_body(&args[1..], &let_env)
}

/// `(loop [bindings] body)`: the body is re-run in the same frame for every
/// matching `recur`, so iteration never grows the stack.
fn eval_loop(args: &[Value], env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    let [bindings, body] = args else {
        return Err(form_error("loop", "expected bindings and a body"));
    };
    let bindings = parse_bindings("loop", bindings)?;
    let loop_env = Environment::with_parent(env);
    let mut names = Vec::with_capacity(bindings.len());
    for (name, expr) in bindings {
        let value = cx.eval(expr, &loop_env)?;
        loop_env.define(name, value);
        names.push(name);
    }

    loop {
        match cx.eval(body, &loop_env) {
            Err(Flow::Recur(values)) if values.len() == names.len() => {
                for (name, value) in names.iter().zip(values) {
                    loop_env.set(name, value)?;
                }
            }
            Err(Flow::Recur(values)) => {
                return Err(
                    Error::arity_error_with_expr(names.len(), values.len(), "recur".into()).into(),
                );
            }
            other => return other,
        }
    }
}

fn eval_recur(args: &[Value], env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(cx.eval(arg, env)?);
    }
    Err(Flow::Recur(values))
}

fn eval_if(args: &[Value], env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    let condition = cx.eval(&args[0], env)?;
    if condition.is_truthy() {
        cx.eval(&args[1], env)
    } else {
        match args.get(2) {
            Some(else_expr) => cx.eval(else_expr, env),
            None => Ok(Value::Nil),
        }
    }
}

fn eval_quote(args: &[Value], _env: &Environment, _cx: &mut FormContext<'_>) -> EvalOutcome {
    Ok(args[0].clone())
}

fn eval_do(args: &[Value], env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    cx.eval_body(args, env)
}

fn eval_cond(args: &[Value], env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    if args.len() % 2 != 0 {
        return Err(form_error("cond", "requires an even number of forms"));
    }
    for pair in args.chunks(2) {
        let matched = match &pair[0] {
            Value::Keyword(k) if k == "else" => true,
            test => cx.eval(test, env)?.is_truthy(),
        };
        if matched {
            return cx.eval(&pair[1], env);
        }
    }
    Ok(Value::Nil)
}

fn eval_and(args: &[Value], env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    let mut result = Value::Boolean(true);
    for arg in args {
        result = cx.eval(arg, env)?;
        if !result.is_truthy() {
            break;
        }
    }
    Ok(result)
}

fn eval_or(args: &[Value], env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    let mut result = Value::Nil;
    for arg in args {
        result = cx.eval(arg, env)?;
        if result.is_truthy() {
            break;
        }
    }
    Ok(result)
}

fn eval_when(args: &[Value], env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    if cx.eval(&args[0], env)?.is_truthy() {
        cx.eval_body(&args[1..], env)
    } else {
        Ok(Value::Nil)
    }
}

fn eval_set(args: &[Value], env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    let [Value::Symbol(name), expr] = args else {
        return Err(form_error("set!", format!("target must be a symbol, got {}", args[0])));
    };
    let value = cx.eval(expr, env)?;
    env.set(name, value.clone())?;
    Ok(value)
}

/// Name of a namespace, module or member written as a symbol or string
fn name_of(value: &Value) -> Option<&str> {
    match value {
        Value::Symbol(name) | Value::String(name) => Some(name),
        _ => None,
    }
}

/// `(ns name (:require a [b] [c :as d]) (:import math [string upper]))`
///
/// Every clause is validated before the namespace is switched, so a
/// malformed form leaves the current namespace untouched.
fn eval_ns(args: &[Value], _env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    let Some(manager) = cx.ns.as_deref_mut() else {
        return Err(form_error("ns", "no namespace manager available"));
    };
    let Some(name) = name_of(&args[0]) else {
        return Err(form_error("ns", format!("namespace name must be a symbol, got {}", args[0])));
    };

    let mut requires = Vec::new();
    let mut imports = Vec::new();
    for clause in &args[1..] {
        let Value::List(items) = clause else {
            return Err(form_error("ns", format!("unexpected clause {clause}")));
        };
        match items.split_first() {
            Some((Value::Keyword(kind), specs)) if kind == "require" => {
                for spec in specs {
                    requires.push(parse_require_spec(spec)?);
                }
            }
            Some((Value::Keyword(kind), specs)) if kind == "import" => {
                for spec in specs {
                    imports.push(parse_import_spec(spec)?);
                }
            }
            _ => return Err(form_error("ns", format!("unknown clause {clause}"))),
        }
    }
    for (module, names) in &imports {
        manager.select_exports(module, names.as_deref())?;
    }

    manager.switch_to(name);
    for (namespace, alias) in requires {
        manager.add_require(namespace, alias);
    }
    for (module, names) in imports {
        manager.add_import(module, names.as_deref())?;
    }
    Ok(Value::Nil)
}

/// `ns-b`, `[ns-b]` or `[ns-b :as b]` to (namespace, alias)
fn parse_require_spec(spec: &Value) -> Result<(&str, &str), Flow> {
    if let Some(namespace) = name_of(spec) {
        return Ok((namespace, namespace));
    }
    let parsed = match spec.as_seq() {
        Some([namespace]) => name_of(namespace).map(|ns| (ns, ns)),
        Some([namespace, Value::Keyword(as_kw), alias]) if as_kw == "as" => {
            name_of(namespace).zip(name_of(alias))
        }
        _ => None,
    };
    parsed.ok_or_else(|| form_error("ns", format!("malformed :require spec {spec}")))
}

/// `math` imports every export, `[math sqrt pow]` only the listed ones
fn parse_import_spec(spec: &Value) -> Result<(&str, Option<Vec<String>>), Flow> {
    let malformed = || form_error("ns", format!("malformed :import spec {spec}"));
    if let Some(module) = name_of(spec) {
        return Ok((module, None));
    }
    let Some([module, names @ ..]) = spec.as_seq() else {
        return Err(malformed());
    };
    let module = name_of(module).ok_or_else(malformed)?;
    let names = names
        .iter()
        .map(|name| name_of(name).map(str::to_owned).ok_or_else(malformed))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((module, Some(names)))
}

/// `(. target method args...)`; a `-name` member reads a property
fn eval_dot(args: &[Value], env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    let Some(member) = name_of(&args[1]) else {
        return Err(form_error(".", format!("member must be a symbol, got {}", args[1])));
    };
    let target = cx.eval(&args[0], env)?;
    let mut call_args = Vec::with_capacity(args.len() - 2);
    for arg in &args[2..] {
        call_args.push(cx.eval(arg, env)?);
    }
    let member = match member.strip_prefix('-') {
        Some(property) if !property.is_empty() => HostMember::Property(property),
        _ => HostMember::Method(member),
    };
    Ok(access_host_member(
        cx.ns.as_deref_mut(),
        &target,
        member,
        call_args,
    )?)
}

/// `(.- target property)`
fn eval_dot_property(args: &[Value], env: &Environment, cx: &mut FormContext<'_>) -> EvalOutcome {
    let property = match &args[1] {
        Value::Keyword(name) => name.as_str(),
        other => name_of(other).ok_or_else(|| {
            form_error(".-", format!("property must be a symbol, got {other}"))
        })?,
    };
    let target = cx.eval(&args[0], env)?;
    Ok(access_host_member(
        cx.ns.as_deref_mut(),
        &target,
        HostMember::Property(property),
        vec![],
    )?)
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    #[test]
    fn test_registry_contents() {
        let expected = [
            ("def", Arity::Exact(2)),
            ("defn", Arity::AtLeast(3)),
            ("define", Arity::AtLeast(3)),
            ("fn", Arity::Exact(2)),
            ("loop", Arity::Exact(2)),
            ("if", Arity::Range(2, 3)),
            ("quote", Arity::Exact(1)),
            ("ns", Arity::AtLeast(1)),
            (".-", Arity::Exact(2)),
        ];
        for (name, arity) in expected {
            let form = find_special_form(name).unwrap_or_else(|| panic!("{name} not registered"));
            assert_eq!(form.name, name);
            assert_eq!(form.arity, arity, "arity of {name}");
        }
        assert!(find_special_form("recur").is_some());
        assert!(find_special_form("map").is_none());
        assert!(find_special_form("+").is_none());
    }

    #[test]
    fn test_arity_checked_before_side_effects() {
        let env = crate::evaluator::create_global_env();
        let args = [sym("x"), Value::from(1), Value::from(2)];
        let form = find_special_form("def").unwrap_or_else(|| panic!("def not registered"));
        match form.invoke(&args, &env, None, 0) {
            Err(Flow::Error(Error::SpecialFormError { form, message })) => {
                assert_eq!(form, "def");
                assert!(message.contains("exactly 2"), "{message}");
            }
            other => panic!("expected SpecialFormError, got {other:?}"),
        }
        assert!(env.lookup("x").is_none());
    }

    #[test]
    fn test_malformed_ns_keeps_current_namespace() {
        let cases = [
            "(ns other (:bogus x))",
            "(ns other (:require [a b]))",
            "(ns other (:require ns-b) 42)",
            "(ns other (:import no-such-module))",
            "(ns other (:import [math no-such-fn]))",
        ];
        for source in cases {
            let mut manager = NamespaceManager::new(crate::evaluator::create_global_env());
            let env = manager.current_env();
            let form = crate::parser::parse(source).unwrap();
            assert!(
                crate::evaluator::evaluate(&form, &env, Some(&mut manager)).is_err(),
                "{source}"
            );
            assert_eq!(manager.current_name(), "user", "{source}");
            assert_eq!(manager.namespace_names(), vec!["user"], "{source}");
        }
    }

    #[test]
    fn test_require_and_import_specs() {
        let cases = vec![
            (sym("ns-b"), ("ns-b", "ns-b")),
            (Value::Vector(vec![sym("ns-b")]), ("ns-b", "ns-b")),
            (
                Value::Vector(vec![sym("ns-b"), Value::Keyword("as".into()), sym("b")]),
                ("ns-b", "b"),
            ),
        ];
        for (spec, expected) in cases {
            assert!(matches!(parse_require_spec(&spec), Ok(found) if found == expected));
        }
        assert!(parse_require_spec(&Value::Vector(vec![sym("a"), sym("b")])).is_err());

        assert!(matches!(parse_import_spec(&sym("math")), Ok(("math", None))));
        let listed = Value::Vector(vec![sym("math"), sym("sqrt"), sym("pow")]);
        match parse_import_spec(&listed) {
            Ok(("math", Some(names))) => assert_eq!(names, vec!["sqrt", "pow"]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_import_spec(&Value::from(1)).is_err());
    }
}
