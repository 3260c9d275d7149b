//! Built-in operations registry.
//!
//! Every native function bound into the global environment at startup is
//! declared here once, as a [`BuiltinOp`] carrying its identifier, its
//! erased implementation and its [`Arity`]. Implementations are ordinary
//! strongly-typed Rust functions wired through the same adapter layer used
//! for host registration (see [`crate::evaluator::intooperation`]), so
//! argument conversion failures surface uniformly as `TypeError`.
//!
//! ```lisp
//! (+ 1 2 3)                 ; => 6
//! (conj [1 2] 3)            ; => [1 2 3]
//! (get {:a 1} :b "none")    ; => "none"
//! (str "n=" 42)             ; => "n=42"
//! ```
//!
//! ## Functions vs Special Forms
//!
//! Everything in this registry receives evaluated arguments. Forms that
//! control evaluation (`if`, `let`, `loop`, ...) live in the special-form
//! registry, and the primitives that call back into the evaluator (`map`,
//! `filter`, `reduce`, `apply`, `swap!`) are dispatched by the evaluator
//! itself.
//!
//! ## Adding New Operations
//!
//! 1. Implement the function with typed parameters (`NumberType`, `&str`,
//!    `Value`, or one of the sequence iterators for rest arguments)
//! 2. Add a [`BuiltinOp`] entry with its identifier and arity
//! 3. Add cases to the data-driven tests below

use crate::Error;
use crate::ast::{NumberType, Value};
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use crate::evaluator::{Arity, NumIter, ValueIter, new_atom};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

/// Definition of a built-in operation
#[derive(Clone)]
pub struct BuiltinOp {
    /// Name the operation is bound to in the global environment
    pub id: &'static str,
    pub func: Arc<OperationFn>,
    /// Expected number of arguments
    pub arity: Arity,
}

impl std::fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinOp")
            .field("id", &self.id)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        // Identifiers are unique within the registry
        self.id == other.id
    }
}

//
// Builtin Function Implementations
//

// Macro to generate chained numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $op:tt) => {
        fn $name(first: NumberType, rest: NumIter<'_>) -> bool {
            // All adjacent pairs must satisfy the comparison
            let mut prev = first;
            for current in rest {
                if !(prev $op current) {
                    return false;
                }
                prev = current;
            }
            true
        }
    };
}

numeric_comparison!(builtin_lt, <);
numeric_comparison!(builtin_gt, >);
numeric_comparison!(builtin_le, <=);
numeric_comparison!(builtin_ge, >=);

fn builtin_add(args: NumIter<'_>) -> NumberType {
    args.sum()
}

fn builtin_sub(first: NumberType, rest: NumIter<'_>) -> NumberType {
    let mut iter = rest.peekable();
    if iter.peek().is_none() {
        return -first;
    }
    iter.fold(first, |acc, n| acc - n)
}

fn builtin_mul(args: NumIter<'_>) -> NumberType {
    args.product()
}

fn builtin_div(first: NumberType, rest: NumIter<'_>) -> Result<NumberType, Error> {
    fn checked_div(a: NumberType, b: NumberType) -> Result<NumberType, Error> {
        if b == 0.0 {
            Err(Error::EvalError("Division by zero".into()))
        } else {
            Ok(a / b)
        }
    }

    let mut iter = rest.peekable();
    if iter.peek().is_none() {
        return checked_div(1.0, first);
    }
    iter.try_fold(first, checked_div)
}

/// Floored modulo: the result takes the sign of the divisor
fn builtin_mod(a: NumberType, b: NumberType) -> Result<NumberType, Error> {
    if b == 0.0 {
        return Err(Error::EvalError("Division by zero".into()));
    }
    Ok(((a % b) + b) % b)
}

fn builtin_inc(n: NumberType) -> NumberType {
    n + 1.0
}

fn builtin_dec(n: NumberType) -> NumberType {
    n - 1.0
}

fn builtin_abs(n: NumberType) -> NumberType {
    n.abs()
}

fn builtin_max(first: NumberType, rest: NumIter<'_>) -> NumberType {
    rest.fold(first, NumberType::max)
}

fn builtin_min(first: NumberType, rest: NumIter<'_>) -> NumberType {
    rest.fold(first, NumberType::min)
}

/// Deep, type-tagged equality over all arguments
fn builtin_equal(first: Value, mut rest: ValueIter<'_>) -> bool {
    rest.all(|value| *value == first)
}

fn builtin_not_equal(first: Value, rest: ValueIter<'_>) -> bool {
    !builtin_equal(first, rest)
}

fn builtin_not(value: Value) -> bool {
    !value.is_truthy()
}

fn builtin_list(args: ValueIter<'_>) -> Value {
    Value::List(args.cloned().collect())
}

fn builtin_vector(args: ValueIter<'_>) -> Value {
    Value::Vector(args.cloned().collect())
}

fn builtin_first(mut seq: ValueIter<'_>) -> Value {
    seq.next().cloned().unwrap_or(Value::Nil)
}

fn builtin_rest(mut seq: ValueIter<'_>) -> Value {
    seq.next();
    Value::List(seq.cloned().collect())
}

/// Convert a number into a collection index
fn to_index(n: NumberType) -> Option<usize> {
    (n >= 0.0 && n.fract() == 0.0).then_some(n as usize)
}

fn builtin_nth(mut seq: ValueIter<'_>, index: NumberType) -> Result<Value, Error> {
    let len = seq.len();
    to_index(index)
        .and_then(|i| seq.nth(i))
        .cloned()
        .ok_or_else(|| Error::EvalError(format!("Index {index} out of bounds for length {len}")))
}

fn builtin_count(value: Value) -> Result<NumberType, Error> {
    let count = match &value {
        Value::String(s) => s.chars().count(),
        Value::List(items) | Value::Vector(items) => items.len(),
        Value::Map(entries) => entries.len(),
        Value::Nil => 0,
        other => {
            return Err(Error::TypeError(format!(
                "count expects a collection or string, got {}",
                other.type_name()
            )));
        }
    };
    Ok(count as NumberType)
}

fn builtin_cons(first: Value, rest: ValueIter<'_>) -> Value {
    let mut items = Vec::with_capacity(rest.len() + 1);
    items.push(first);
    items.extend(rest.cloned());
    Value::List(items)
}

/// Vectors grow at the end, lists (and `nil`) at the front
fn builtin_conj(coll: Value, items: ValueIter<'_>) -> Result<Value, Error> {
    match coll {
        Value::Vector(mut elements) => {
            elements.extend(items.cloned());
            Ok(Value::Vector(elements))
        }
        Value::List(elements) => {
            let mut result: Vec<Value> = items.cloned().collect();
            result.reverse();
            result.extend(elements);
            Ok(Value::List(result))
        }
        Value::Nil => builtin_conj(Value::List(Vec::new()), items),
        other => Err(Error::TypeError(format!(
            "conj expects a list or vector, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_concat(colls: ValueIter<'_>) -> Result<Value, Error> {
    let mut result = Vec::new();
    for coll in colls {
        match coll {
            Value::List(items) | Value::Vector(items) => result.extend_from_slice(items),
            Value::Nil => {}
            other => {
                return Err(Error::TypeError(format!(
                    "concat expects lists or vectors, got {}",
                    other.type_name()
                )));
            }
        }
    }
    Ok(Value::List(result))
}

fn builtin_is_empty(value: Value) -> Result<bool, Error> {
    match &value {
        Value::Nil => Ok(true),
        Value::String(s) => Ok(s.is_empty()),
        Value::List(items) | Value::Vector(items) => Ok(items.is_empty()),
        Value::Map(entries) => Ok(entries.is_empty()),
        other => Err(Error::TypeError(format!(
            "empty? expects a collection or string, got {}",
            other.type_name()
        ))),
    }
}

/// Map key named by a string or keyword
fn map_key(key: &Value) -> Option<&str> {
    match key {
        Value::String(k) | Value::Keyword(k) => Some(k),
        _ => None,
    }
}

/// `(get coll key)` / `(get coll key default)`
fn builtin_get(coll: Value, key: Value, mut default: ValueIter<'_>) -> Value {
    let found = match (&coll, &key) {
        (Value::Map(entries), key) => map_key(key).and_then(|k| entries.get(k)),
        (Value::List(items) | Value::Vector(items), Value::Number(n)) => {
            to_index(*n).and_then(|i| items.get(i))
        }
        _ => None,
    };
    found
        .or_else(|| default.next())
        .cloned()
        .unwrap_or(Value::Nil)
}

fn expect_map<'a>(name: &str, value: &'a Value) -> Result<Option<&'a BTreeMap<String, Value>>, Error> {
    match value {
        Value::Map(entries) => Ok(Some(entries)),
        Value::Nil => Ok(None),
        other => Err(Error::TypeError(format!(
            "{name} expects a map, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_keys(map: Value) -> Result<Value, Error> {
    Ok(expect_map("keys", &map)?.map_or(Value::Nil, |entries| {
        Value::List(entries.keys().cloned().map(Value::String).collect())
    }))
}

fn builtin_vals(map: Value) -> Result<Value, Error> {
    Ok(expect_map("vals", &map)?.map_or(Value::Nil, |entries| {
        Value::List(entries.values().cloned().collect())
    }))
}

/// `(assoc coll k v ...)` on maps, vectors (index up to the length) or `nil`
fn builtin_assoc(coll: Value, pairs: ValueIter<'_>) -> Result<Value, Error> {
    let pairs: Vec<&Value> = pairs.collect();
    if pairs.len() % 2 != 0 {
        return Err(Error::EvalError(
            "assoc expects an even number of key/value arguments".into(),
        ));
    }
    let coll = match coll {
        Value::Nil => Value::Map(BTreeMap::new()),
        other => other,
    };
    match coll {
        Value::Map(mut entries) => {
            for pair in pairs.chunks(2) {
                let Some(key) = map_key(pair[0]) else {
                    return Err(Error::TypeError(format!(
                        "map keys must be strings or keywords, got {}",
                        pair[0].type_name()
                    )));
                };
                entries.insert(key.to_owned(), pair[1].clone());
            }
            Ok(Value::Map(entries))
        }
        Value::Vector(mut items) => {
            for pair in pairs.chunks(2) {
                let index = match pair[0] {
                    Value::Number(n) => to_index(*n).filter(|i| *i <= items.len()),
                    _ => None,
                };
                match index {
                    Some(i) if i == items.len() => items.push(pair[1].clone()),
                    Some(i) => items[i] = pair[1].clone(),
                    None => {
                        return Err(Error::EvalError(format!(
                            "assoc index {} out of bounds for length {}",
                            pair[0],
                            items.len()
                        )));
                    }
                }
            }
            Ok(Value::Vector(items))
        }
        other => Err(Error::TypeError(format!(
            "assoc expects a map or vector, got {}",
            other.type_name()
        ))),
    }
}

/// `(range end)`, `(range start end)` or `(range start end step)`
fn builtin_range(first: NumberType, mut rest: NumIter<'_>) -> Result<Value, Error> {
    let (start, end, step) = match (rest.next(), rest.next()) {
        (None, _) => (0.0, first, 1.0),
        (Some(end), None) => (first, end, 1.0),
        (Some(end), Some(step)) => (first, end, step),
    };
    if step == 0.0 {
        return Err(Error::EvalError("range step must not be zero".into()));
    }
    let count = ((end - start) / step).ceil();
    if !count.is_finite() && !count.is_nan() {
        return Err(Error::EvalError("range is unbounded".into()));
    }
    // NaN bounds and ranges running the wrong way are empty
    let count = if count > 0.0 { count } else { 0.0 };
    if count > MAX_RANGE_LEN as NumberType {
        return Err(Error::EvalError(format!(
            "range of {count} elements exceeds the maximum of {MAX_RANGE_LEN}"
        )));
    }
    // Indexed elements stay exact where repeated addition would stall
    let items = (0..count as usize)
        .map(|i| Value::Number(start + i as NumberType * step))
        .collect();
    Ok(Value::List(items))
}

const MAX_RANGE_LEN: usize = 10_000_000;

macro_rules! type_predicate {
    ($name:ident, $pattern:pat) => {
        fn $name(value: Value) -> bool {
            matches!(value, $pattern)
        }
    };
}

type_predicate!(builtin_is_nil, Value::Nil);
type_predicate!(builtin_is_number, Value::Number(_));
type_predicate!(builtin_is_string, Value::String(_));
type_predicate!(builtin_is_keyword, Value::Keyword(_));
type_predicate!(builtin_is_symbol, Value::Symbol(_));
type_predicate!(builtin_is_list, Value::List(_));
type_predicate!(builtin_is_vector, Value::Vector(_));
type_predicate!(builtin_is_map, Value::Map(_));

fn builtin_is_fn(value: Value) -> bool {
    value.is_callable()
}

/// Text of a value as `str` and `println` render it: strings without
/// quotes, `nil` as nothing
fn display_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Nil => String::new(),
        other => other.to_string(),
    }
}

fn builtin_str(args: ValueIter<'_>) -> String {
    args.map(display_text).collect()
}

/// `(subs s start)` / `(subs s start end)`, indexed by character
fn builtin_subs(s: &str, start: NumberType, mut end: NumIter<'_>) -> Result<String, Error> {
    let len = s.chars().count();
    let end = end.next();
    let bounds = to_index(start).zip(end.map_or(Some(len), to_index));
    match bounds {
        Some((start, end)) if start <= end && end <= len => {
            Ok(s.chars().skip(start).take(end - start).collect())
        }
        _ => Err(Error::EvalError(format!(
            "subs range {start}..{} out of bounds for length {len}",
            end.map_or_else(|| len.to_string(), |e| e.to_string())
        ))),
    }
}

fn builtin_upper_case(s: &str) -> String {
    s.to_uppercase()
}

fn builtin_lower_case(s: &str) -> String {
    s.to_lowercase()
}

fn builtin_atom(value: Value) -> Value {
    new_atom(value)
}

fn builtin_deref(atom: Value) -> Result<Value, Error> {
    match atom {
        Value::Atom(cell) => Ok(cell.borrow().clone()),
        other => Err(Error::TypeError(format!(
            "deref expected atom, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_reset(atom: Value, value: Value) -> Result<Value, Error> {
    match atom {
        Value::Atom(cell) => {
            *cell.borrow_mut() = value.clone();
            Ok(value)
        }
        other => Err(Error::TypeError(format!(
            "reset! expected atom, got {}",
            other.type_name()
        ))),
    }
}

fn join_display(args: ValueIter<'_>) -> String {
    args.map(display_text).collect::<Vec<_>>().join(" ")
}

fn builtin_println(args: ValueIter<'_>) -> Value {
    println!("{}", join_display(args));
    Value::Nil
}

fn builtin_print(args: ValueIter<'_>) -> Value {
    print!("{}", join_display(args));
    Value::Nil
}

fn builtin_error(args: ValueIter<'_>) -> Result<Value, Error> {
    let message = join_display(args);
    if message.is_empty() {
        return Err(Error::EvalError("Error".into()));
    }
    Err(Error::EvalError(message))
}

#[cfg(feature = "json")]
mod json {
    use crate::Error;
    use crate::ast::{NumberType, Value};
    use serde_json::Value as JsonValue;

    fn to_json(value: &Value) -> Result<JsonValue, Error> {
        Ok(match value {
            Value::Nil => JsonValue::Null,
            Value::Boolean(b) => JsonValue::Bool(*b),
            // Integral numbers encode without a fractional part
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                JsonValue::from(*n as i64)
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .ok_or_else(|| Error::EvalError(format!("cannot encode {n} as JSON")))?,
            Value::String(s) | Value::Keyword(s) | Value::Symbol(s) => JsonValue::String(s.clone()),
            Value::List(items) | Value::Vector(items) => {
                JsonValue::Array(items.iter().map(to_json).collect::<Result<_, _>>()?)
            }
            Value::Map(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), to_json(v)?)))
                    .collect::<Result<_, Error>>()?,
            ),
            other => {
                return Err(Error::TypeError(format!(
                    "cannot encode {} as JSON",
                    other.type_name()
                )));
            }
        })
    }

    fn from_json(json: JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Nil,
            JsonValue::Bool(b) => Value::Boolean(b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(NumberType::NAN)),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Vector(items.into_iter().map(from_json).collect()),
            JsonValue::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, from_json(v)))
                    .collect(),
            ),
        }
    }

    pub(super) fn builtin_json_encode(value: Value) -> Result<String, Error> {
        serde_json::to_string(&to_json(&value)?)
            .map_err(|e| Error::EvalError(format!("JSON encoding failed: {e}")))
    }

    pub(super) fn builtin_json_decode(text: &str) -> Result<Value, Error> {
        serde_json::from_str(text)
            .map(from_json)
            .map_err(|e| Error::EvalError(format!("Invalid JSON: {e}")))
    }
}

/// Global registry of all built-in operations.
///
/// The registry is a single contiguous collection of `BuiltinOp` values
/// for ease of auditing, built once at initialization time via a
/// `LazyLock`.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn builtin_fixed<Args, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoOperation<Args>,
    {
        <F as IntoOperation<Args>>::into_operation(f)
    }

    fn builtin_variadic<Args, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoVariadicOperation<Args>,
    {
        <F as IntoVariadicOperation<Args>>::into_variadic_operation(f)
    }

    fn op(id: &'static str, arity: Arity, func: Arc<OperationFn>) -> BuiltinOp {
        BuiltinOp { id, func, arity }
    }

    type Num = NumberType;
    type Values = ValueIter<'static>;
    type Nums = NumIter<'static>;

    #[cfg_attr(not(feature = "json"), expect(unused_mut))]
    let mut ops = vec![
        // Arithmetic
        op("+", Arity::Any, builtin_variadic::<(Nums,), _>(builtin_add)),
        op("-", Arity::AtLeast(1), builtin_variadic::<(Num, Nums), _>(builtin_sub)),
        op("*", Arity::Any, builtin_variadic::<(Nums,), _>(builtin_mul)),
        op("/", Arity::AtLeast(1), builtin_variadic::<(Num, Nums), _>(builtin_div)),
        op("mod", Arity::Exact(2), builtin_fixed::<(Num, Num), _>(builtin_mod)),
        op("inc", Arity::Exact(1), builtin_fixed::<(Num,), _>(builtin_inc)),
        op("dec", Arity::Exact(1), builtin_fixed::<(Num,), _>(builtin_dec)),
        op("abs", Arity::Exact(1), builtin_fixed::<(Num,), _>(builtin_abs)),
        op("max", Arity::AtLeast(1), builtin_variadic::<(Num, Nums), _>(builtin_max)),
        op("min", Arity::AtLeast(1), builtin_variadic::<(Num, Nums), _>(builtin_min)),
        // Comparison
        op("=", Arity::AtLeast(1), builtin_variadic::<(Value, Values), _>(builtin_equal)),
        op("not=", Arity::AtLeast(1), builtin_variadic::<(Value, Values), _>(builtin_not_equal)),
        op("<", Arity::AtLeast(1), builtin_variadic::<(Num, Nums), _>(builtin_lt)),
        op(">", Arity::AtLeast(1), builtin_variadic::<(Num, Nums), _>(builtin_gt)),
        op("<=", Arity::AtLeast(1), builtin_variadic::<(Num, Nums), _>(builtin_le)),
        op(">=", Arity::AtLeast(1), builtin_variadic::<(Num, Nums), _>(builtin_ge)),
        // Logic
        op("not", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_not)),
        // Collections
        op("list", Arity::Any, builtin_variadic::<(Values,), _>(builtin_list)),
        op("vector", Arity::Any, builtin_variadic::<(Values,), _>(builtin_vector)),
        op("first", Arity::Exact(1), builtin_fixed::<(Values,), _>(builtin_first)),
        op("rest", Arity::Exact(1), builtin_fixed::<(Values,), _>(builtin_rest)),
        op("nth", Arity::Exact(2), builtin_fixed::<(Values, Num), _>(builtin_nth)),
        op("count", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_count)),
        op("cons", Arity::Exact(2), builtin_fixed::<(Value, Values), _>(builtin_cons)),
        op("conj", Arity::AtLeast(1), builtin_variadic::<(Value, Values), _>(builtin_conj)),
        op("concat", Arity::Any, builtin_variadic::<(Values,), _>(builtin_concat)),
        op("empty?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_is_empty)),
        op("get", Arity::Range(2, 3), builtin_variadic::<(Value, Value, Values), _>(builtin_get)),
        op("keys", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_keys)),
        op("vals", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_vals)),
        op("assoc", Arity::AtLeast(3), builtin_variadic::<(Value, Values), _>(builtin_assoc)),
        op("range", Arity::Range(1, 3), builtin_variadic::<(Num, Nums), _>(builtin_range)),
        // Predicates
        op("nil?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_is_nil)),
        op("number?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_is_number)),
        op("string?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_is_string)),
        op("keyword?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_is_keyword)),
        op("symbol?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_is_symbol)),
        op("fn?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_is_fn)),
        op("list?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_is_list)),
        op("vector?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_is_vector)),
        op("map?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_is_map)),
        // Strings
        op("str", Arity::Any, builtin_variadic::<(Values,), _>(builtin_str)),
        op("subs", Arity::Range(2, 3), builtin_variadic::<(&str, Num, Nums), _>(builtin_subs)),
        op("upper-case", Arity::Exact(1), builtin_fixed::<(&str,), _>(builtin_upper_case)),
        op("lower-case", Arity::Exact(1), builtin_fixed::<(&str,), _>(builtin_lower_case)),
        // Atoms
        op("atom", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_atom)),
        op("deref", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_deref)),
        op("reset!", Arity::Exact(2), builtin_fixed::<(Value, Value), _>(builtin_reset)),
        // I/O and errors
        op("println", Arity::Any, builtin_variadic::<(Values,), _>(builtin_println)),
        op("print", Arity::Any, builtin_variadic::<(Values,), _>(builtin_print)),
        op("error", Arity::Any, builtin_variadic::<(Values,), _>(builtin_error)),
    ];

    #[cfg(feature = "json")]
    ops.extend([
        op("json-encode", Arity::Exact(1), builtin_fixed::<(Value,), _>(json::builtin_json_encode)),
        op("json-decode", Arity::Exact(1), builtin_fixed::<(&str,), _>(json::builtin_json_decode)),
    ]);

    ops
});

/// Lazy static map from id to BuiltinOp (private - use find_builtin)
static BUILTIN_INDEX: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.id, op)).collect()
});

/// Get all builtin operations (for internal use by evaluator)
pub(crate) fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by the name it is bound to
pub fn find_builtin(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_INDEX.get(id).copied()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{kw, nil, val, vector};

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> Option<Value> {
        Some(val(value))
    }

    /// Invoke a builtin through the registry the way the global
    /// environment binds it: arity first, then the erased function.
    fn call_builtin(name: &str, args: &[Value]) -> Result<Value, Error> {
        let op = find_builtin(name).unwrap_or_else(|| panic!("builtin not found: {name}"));
        op.arity.validate(args.len())?;
        (op.func)(args.to_vec())
    }

    fn map_of(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_builtin_ops_registry() {
        let not_op = find_builtin("not").unwrap();
        assert_eq!(not_op.arity, Arity::Exact(1));
        assert_eq!(find_builtin("+").unwrap().arity, Arity::Any);
        assert_eq!(find_builtin("get").unwrap().arity, Arity::Range(2, 3));

        let result = (find_builtin("+").unwrap().func)(vec![val(1), val(2)]).unwrap();
        assert_eq!(result, val(3));

        // Identifiers are unique
        let all_ops = get_builtin_ops();
        let index: HashMap<_, _> = all_ops.iter().map(|op| (op.id, op)).collect();
        assert_eq!(index.len(), all_ops.len());

        // Special forms and evaluator-dispatched primitives are not builtins
        for id in ["if", "quote", "def", "map", "reduce", "swap!", "unknown"] {
            assert!(find_builtin(id).is_none(), "{id} should not be a builtin");
        }
    }

    /// Macro to create test cases, invoking builtins via the registry.
    macro_rules! test {
        ($name:expr, $args:expr, $expected:expr) => {
            ($name, call_builtin($name, $args), $expected)
        };
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_builtin_function_implementations() {
        type TestCase = (&'static str, Result<Value, Error>, Option<Value>);

        let int_list = val([1, 2, 3]);
        let int_vec = vector(vec![1, 2, 3]);
        let many_ones: Vec<Value> = (0..100).map(|_| val(1)).collect();
        let all_fives: Vec<Value> = (0..10).map(|_| val(5)).collect();
        let mut mostly_fives = all_fives.clone();
        mostly_fives.push(val(6));
        let person = map_of(&[("name", val("Ada")), ("age", val(36))]);

        let test_cases: Vec<TestCase> = vec![
            // =================================================================
            // ARITHMETIC
            // =================================================================
            test!("+", &[], success(0)), // Identity
            test!("+", &[val(5)], success(5)),
            test!("+", &[val(1), val(2), val(3)], success(6)),
            test!("+", &[val(0.5), val(0.25)], success(0.75)),
            test!("+", &many_ones, success(100)),
            test!("+", &[val("not a number")], None),
            test!("+", &[val(1), val(true)], None),
            test!("-", &[val(5)], success(-5)), // Unary minus
            test!("-", &[val(10), val(3), val(2)], success(5)),
            test!("-", &[], None),
            test!("-", &[val(5), nil()], None),
            test!("*", &[], success(1)), // Identity
            test!("*", &[val(2), val(3), val(4)], success(24)),
            test!("*", &[val(2), nil()], None),
            test!("/", &[val(10), val(4)], success(2.5)),
            test!("/", &[val(4)], success(0.25)), // Reciprocal
            test!("/", &[val(100), val(5), val(2)], success(10)),
            test!("/", &[val(1), val(0)], None), // Division by zero
            test!("/", &[val(0)], None),
            test!("mod", &[val(7), val(3)], success(1)),
            test!("mod", &[val(-7), val(3)], success(2)), // Floored
            test!("mod", &[val(7), val(-3)], success(-2)),
            test!("mod", &[val(7), val(0)], None),
            test!("inc", &[val(41)], success(42)),
            test!("dec", &[val(0)], success(-1)),
            test!("abs", &[val(-3)], success(3)),
            test!("inc", &[val("1")], None),
            test!("max", &[val(1), val(3), val(2)], success(3)),
            test!("min", &[val(-5), val(-1), val(-10)], success(-10)),
            test!("max", &[], None),
            test!("min", &[val(1), val(true)], None),
            // =================================================================
            // COMPARISON
            // =================================================================
            test!("=", &[val(12), val(12)], success(true)),
            test!("=", &[val(8), val(3)], success(false)),
            test!("=", &all_fives, success(true)),
            test!("=", &mostly_fives, success(false)),
            test!("=", &[val(1)], success(true)),
            test!("=", &[val(1), val("1")], success(false)), // Type-tagged
            test!("=", &[int_list.clone(), val([1, 2, 3])], success(true)), // Deep
            test!("=", &[kw("a"), kw("a")], success(true)),
            test!("=", &[nil(), val(false)], success(false)),
            test!("=", &[], None),
            test!("not=", &[val(1), val(2)], success(true)),
            test!("not=", &[val("a"), val("a")], success(false)),
            test!("<", &[val(1), val(2), val(3)], success(true)), // Chaining
            test!("<", &[val(1), val(3), val(2)], success(false)),
            test!(">", &[val(9), val(6), val(2)], success(true)),
            test!(">", &[val(4), val(4)], success(false)),
            test!("<=", &[val(3), val(3)], success(true)),
            test!(">=", &[val(2), val(6)], success(false)),
            test!("<", &[val(1)], success(true)),
            test!(">", &[val("a"), val(3)], None),
            // =================================================================
            // LOGIC
            // =================================================================
            test!("not", &[val(true)], success(false)),
            test!("not", &[nil()], success(true)),
            test!("not", &[val(0)], success(false)), // 0 is truthy
            test!("not", &[val("")], success(false)),
            test!("not", &[], None),
            test!("not", &[val(true), val(false)], None),
            // =================================================================
            // COLLECTIONS
            // =================================================================
            test!("list", &[], success(Vec::<Value>::new())),
            test!("list", &[val(1), val("a")], success([val(1), val("a")])),
            test!("vector", &[val(1), val(2)], Some(vector(vec![1, 2]))),
            test!("first", std::slice::from_ref(&int_list), success(1)),
            test!("first", std::slice::from_ref(&int_vec), success(1)),
            test!("first", &[nil()], Some(nil())),
            test!("first", &[val(Vec::<Value>::new())], Some(nil())),
            test!("first", &[val(42)], None),
            test!("rest", std::slice::from_ref(&int_vec), success([2, 3])),
            test!("rest", &[nil()], success(Vec::<Value>::new())),
            test!("nth", &[int_list.clone(), val(1)], success(2)),
            test!("nth", &[int_list.clone(), val(3)], None), // Out of bounds
            test!("nth", &[int_list.clone(), val(-1)], None),
            test!("nth", &[int_list.clone(), val(0.5)], None),
            test!("count", std::slice::from_ref(&int_vec), success(3)),
            test!("count", &[val("héllo")], success(5)), // Characters, not bytes
            test!("count", &[nil()], success(0)),
            test!("count", std::slice::from_ref(&person), success(2)),
            test!("count", &[val(1)], None),
            test!("cons", &[val(0), int_vec.clone()], success([0, 1, 2, 3])),
            test!("cons", &[val(0), nil()], success([0])),
            test!("cons", &[val(1), val(2)], None),
            test!("conj", &[int_vec.clone(), val(4)], Some(vector(vec![1, 2, 3, 4]))),
            test!("conj", &[int_list.clone(), val(0)], success([0, 1, 2, 3])),
            test!("conj", &[val([1]), val(2), val(3)], success([3, 2, 1])),
            test!("conj", &[nil(), val(1)], success([1])),
            test!("conj", &[val("s"), val(1)], None),
            test!("concat", &[int_list.clone(), int_vec.clone()], success([1, 2, 3, 1, 2, 3])),
            test!("concat", &[], success(Vec::<Value>::new())),
            test!("concat", &[nil(), val([1])], success([1])),
            test!("concat", &[val(1)], None),
            test!("empty?", &[nil()], success(true)),
            test!("empty?", &[vector(Vec::<Value>::new())], success(true)),
            test!("empty?", &[val("")], success(true)),
            test!("empty?", std::slice::from_ref(&int_list), success(false)),
            test!("empty?", &[val(0)], None),
            test!("get", &[person.clone(), kw("name")], success("Ada")),
            test!("get", &[person.clone(), val("age")], success(36)),
            test!("get", &[person.clone(), kw("missing")], Some(nil())),
            test!("get", &[person.clone(), kw("missing"), val("none")], success("none")),
            test!("get", &[int_vec.clone(), val(2)], success(3)),
            test!("get", &[int_vec.clone(), val(9), val(0)], success(0)),
            test!("get", &[nil(), kw("a")], Some(nil())),
            test!("get", &[person.clone()], None),
            test!("keys", std::slice::from_ref(&person), success(["age", "name"])),
            test!("vals", std::slice::from_ref(&person), success([val(36), val("Ada")])),
            test!("keys", &[nil()], Some(nil())),
            test!("keys", &[val(1)], None),
            test!(
                "assoc",
                &[person.clone(), kw("age"), val(37)],
                Some(map_of(&[("name", val("Ada")), ("age", val(37))]))
            ),
            test!("assoc", &[nil(), kw("a"), val(1)], Some(map_of(&[("a", val(1))]))),
            test!("assoc", &[int_vec.clone(), val(0), val(9)], Some(vector(vec![9, 2, 3]))),
            test!("assoc", &[int_vec.clone(), val(3), val(4)], Some(vector(vec![1, 2, 3, 4]))),
            test!("assoc", &[int_vec.clone(), val(5), val(4)], None),
            test!("assoc", &[person.clone(), kw("a")], None),
            test!("assoc", &[person.clone(), val(1), val(2)], None),
            test!("range", &[val(4)], success([0, 1, 2, 3])),
            test!("range", &[val(2), val(5)], success([2, 3, 4])),
            test!("range", &[val(10), val(0), val(-3)], success([10, 7, 4, 1])),
            test!("range", &[val(0)], success(Vec::<Value>::new())),
            test!("range", &[val(0), val(5), val(0)], None),
            test!("range", &[val(5), val(0)], success(Vec::<Value>::new())),
            test!("range", &[val(0), val(1), val(0.25)], success([0.0, 0.25, 0.5, 0.75])),
            // Magnitudes where adding the step no longer changes the value
            test!(
                "range",
                &[val(1e16), val(1e16 + 4.0)],
                success([1e16, 1e16 + 1.0, 1e16 + 2.0, 1e16 + 3.0])
            ),
            test!("range", &[val(0), val(1e12)], None),
            test!("range", &[val(0), val(f64::INFINITY)], None),
            // =================================================================
            // PREDICATES
            // =================================================================
            test!("nil?", &[nil()], success(true)),
            test!("nil?", &[val(false)], success(false)),
            test!("number?", &[val(1)], success(true)),
            test!("string?", &[val("s")], success(true)),
            test!("string?", &[kw("s")], success(false)),
            test!("keyword?", &[kw("s")], success(true)),
            test!("symbol?", &[crate::ast::sym("s")], success(true)),
            test!("list?", std::slice::from_ref(&int_list), success(true)),
            test!("list?", std::slice::from_ref(&int_vec), success(false)),
            test!("vector?", std::slice::from_ref(&int_vec), success(true)),
            test!("map?", std::slice::from_ref(&person), success(true)),
            test!("fn?", &[val(1)], success(false)),
            // =================================================================
            // STRINGS
            // =================================================================
            test!("str", &[], success("")),
            test!("str", &[val("n="), val(42)], success("n=42")),
            test!("str", &[val("a"), nil(), val(true), kw("k")], success("atrue:k")),
            test!("str", &[val(2.5)], success("2.5")),
            test!("subs", &[val("hello"), val(1)], success("ello")),
            test!("subs", &[val("hello"), val(1), val(3)], success("el")),
            test!("subs", &[val("hello"), val(3), val(9)], None),
            test!("subs", &[val("hello"), val(3), val(1)], None),
            test!("upper-case", &[val("abc")], success("ABC")),
            test!("lower-case", &[val("ABC")], success("abc")),
            test!("upper-case", &[val(1)], None),
            test!("upper-case", &[kw("ok")], success("OK")),
            // =================================================================
            // ATOMS AND ERRORS
            // =================================================================
            test!("deref", &[val(1)], None),
            test!("reset!", &[val(1), val(2)], None),
            test!("error", &[], None),
            test!("error", &[val("boom")], None),
        ];

        for (test_expr, result, expected) in test_cases {
            match (result, expected) {
                (Ok(actual), Some(expected_val)) => {
                    assert_eq!(actual, expected_val, "Failed for test case: {test_expr}");
                }
                (Err(_), None) => {} // Expected error
                (actual, expected) => panic!(
                    "Unexpected result for test case: {test_expr}\nGot: {actual:?}, Expected: {expected:?}"
                ),
            }
        }
    }

    #[test]
    fn test_atom_builtins_share_cell() {
        let atom = call_builtin("atom", &[val(1)]).unwrap();
        assert_eq!(call_builtin("deref", std::slice::from_ref(&atom)).unwrap(), val(1));
        assert_eq!(call_builtin("reset!", &[atom.clone(), val(5)]).unwrap(), val(5));
        assert_eq!(call_builtin("deref", &[atom]).unwrap(), val(5));
    }

    #[test]
    fn test_division_by_zero_message() {
        match call_builtin("/", &[val(1), val(0)]).unwrap_err() {
            Error::EvalError(msg) => assert_eq!(msg, "Division by zero"),
            other => panic!("Expected EvalError, got {other:?}"),
        }
    }

    #[test]
    fn test_error_message_construction() {
        type ErrorTest = (Vec<Value>, &'static str);
        let test_cases: Vec<ErrorTest> = vec![
            (vec![], "Error"),
            (vec![val("Simple message")], "Simple message"),
            (
                vec![val("Code:"), val(404), val("Not Found")],
                "Code: 404 Not Found",
            ),
            (
                vec![val(true), val(42), val("mixed"), kw("k")],
                "true 42 mixed :k",
            ),
        ];

        for (args, expected_msg) in test_cases {
            match call_builtin("error", &args).unwrap_err() {
                Error::EvalError(msg) => {
                    assert_eq!(msg, expected_msg, "Failed for args: {args:?}");
                }
                _ => panic!("Expected EvalError for args: {args:?}"),
            }
        }
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_builtins() {
        let data = map_of(&[
            ("n", val(1)),
            ("xs", vector(vec![val(1.5), val(true), nil()])),
        ]);
        let encoded = call_builtin("json-encode", &[data]).unwrap();
        assert_eq!(encoded, val(r#"{"n":1,"xs":[1.5,true,null]}"#));

        let decoded = call_builtin("json-decode", &[encoded]).unwrap();
        assert_eq!(
            decoded,
            map_of(&[
                ("n", val(1)),
                ("xs", vector(vec![val(1.5), val(true), nil()])),
            ])
        );

        assert!(call_builtin("json-decode", &[val("{not json")]).is_err());
        assert!(call_builtin("json-encode", &[call_builtin("atom", &[val(1)]).unwrap()]).is_err());
    }
}
