//! This module defines the core [`Value`] type, which is both the runtime data
//! representation and the program AST (code is data). It covers numbers,
//! strings, booleans, nil, symbols, keywords, lists, vectors, maps, native
//! functions, closures, atoms and opaque host objects. Ergonomic helper
//! functions such as [`val`], [`sym`], [`kw`] and [`nil`] are provided for
//! convenient tree construction in both code and tests, along with conversion
//! traits for common Rust types. `Display` renders the readable surface syntax
//! so that any tree without closure or host leaves parses back to itself.

use crate::Error;
use crate::evaluator::Environment;
use crate::evaluator::intooperation::OperationFn;
use crate::interop::HostObject;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

/// Type alias for number values in interpreter
pub(crate) type NumberType = f64;

/// Core value type of the interpreter
///
/// `List` and `Vector` preserve element order. `Symbol` and `Keyword`
/// compare by name. Equality is deep and type-tagged: `Number(1)` never
/// equals `String("1")`. Closures, atoms and host objects compare by identity.
#[derive(Clone)]
pub enum Value {
    Number(NumberType),
    String(String),
    Boolean(bool),
    Nil,
    Symbol(String),
    /// Keyword name, stored without the leading colon
    Keyword(String),
    List(Vec<Value>),
    Vector(Vec<Value>),
    /// Map literal `{:a 1}`; keys are plain strings
    Map(BTreeMap<String, Value>),
    /// Native callable supplied by the builtin registry or the host
    NativeFunction {
        id: String,
        /// Fixed arity checked before the call, `None` for variadic natives
        arity: Option<usize>,
        func: Arc<OperationFn>,
    },
    /// User-defined function (params, body, captured environment)
    Closure {
        params: Vec<String>,
        body: Rc<Value>,
        env: Environment,
    },
    /// Identity-distinct mutable reference cell
    Atom(Rc<RefCell<Value>>),
    /// Opaque handle into the host-interop provider
    HostObject(Rc<HostObject>),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String(\"{s}\")"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::Nil => write!(f, "Nil"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Keyword(k) => write!(f, "Keyword({k})"),
            Value::List(items) => write_debug_seq(f, "List", items),
            Value::Vector(items) => write_debug_seq(f, "Vector", items),
            Value::Map(map) => {
                write!(f, "Map(")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v:?}")?;
                }
                write!(f, ")")
            }
            Value::NativeFunction { id, arity, .. } => match arity {
                Some(n) => write!(f, "NativeFunction({id}/{n})"),
                None => write!(f, "NativeFunction({id})"),
            },
            // The captured environment is deliberately not printed: it may
            // contain this very closure.
            Value::Closure { params, body, .. } => {
                write!(f, "Closure(params={params:?}, body={body:?})")
            }
            Value::Atom(cell) => {
                with_atom_contents(cell, |inner| write!(f, "Atom({inner:?})"))
                    .unwrap_or_else(|| write!(f, "Atom(...)"))
            }
            Value::HostObject(obj) => write!(f, "HostObject({})", obj.type_name()),
        }
    }
}

thread_local! {
    /// Atoms whose contents are being formatted on this thread
    static ATOMS_BEING_PRINTED: RefCell<Vec<*const RefCell<Value>>> =
        const { RefCell::new(Vec::new()) };
}

/// Run `print` on the contents of `cell` unless that atom is already being
/// printed further up, which happens once an atom holds itself.
fn with_atom_contents(
    cell: &Rc<RefCell<Value>>,
    print: impl FnOnce(&Value) -> std::fmt::Result,
) -> Option<std::fmt::Result> {
    struct Entered;
    impl Drop for Entered {
        fn drop(&mut self) {
            ATOMS_BEING_PRINTED.with(|active| active.borrow_mut().pop());
        }
    }

    let ptr = Rc::as_ptr(cell);
    let reentered = ATOMS_BEING_PRINTED.with(|active| {
        let mut active = active.borrow_mut();
        let reentered = active.contains(&ptr);
        if !reentered {
            active.push(ptr);
        }
        reentered
    });
    if reentered {
        return None;
    }
    let _entered = Entered;
    Some(print(&cell.borrow()))
}

fn write_debug_seq(
    f: &mut std::fmt::Formatter<'_>,
    name: &str,
    items: &[Value],
) -> std::fmt::Result {
    write!(f, "{name}(")?;
    for (i, v) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{v:?}")?;
    }
    write!(f, ")")
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<NumberType> for Value {
    fn from(n: NumberType) -> Self {
        Value::Number(n)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Number(n as NumberType)
            }
        }
    };
}

// Generate From implementations for integer types
impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(i64);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);
impl_from_integer!(usize);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::List(arr.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::List(slice.iter().cloned().map(|x| x.into()).collect())
    }
}

// Fallible conversions from `Value` back into primitive Rust types.

impl std::convert::TryInto<NumberType> for Value {
    type Error = Error;

    fn try_into(self) -> Result<NumberType, Error> {
        if let Value::Number(n) = self {
            Ok(n)
        } else {
            Err(Error::TypeError(format!(
                "expected number, got {}",
                self.type_name()
            )))
        }
    }
}

impl std::convert::TryInto<bool> for Value {
    type Error = Error;

    fn try_into(self) -> Result<bool, Error> {
        if let Value::Boolean(b) = self {
            Ok(b)
        } else {
            Err(Error::TypeError(format!(
                "expected boolean, got {}",
                self.type_name()
            )))
        }
    }
}

///   Helper function for creating symbols - works great in mixed lists!
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating keywords; `name` excludes the colon
pub fn kw<S: AsRef<str>>(name: S) -> Value {
    Value::Keyword(name.as_ref().to_owned())
}

/// Helper function for creating Values - works great in mixed lists!
/// Accepts any type that can be converted to Value
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for the nil value
pub fn nil() -> Value {
    Value::Nil
}

/// Helper function for creating vectors from anything convertible
pub fn vector<T: Into<Value>>(items: Vec<T>) -> Value {
    Value::Vector(items.into_iter().map(Into::into).collect())
}

/// Keys that can be written back as `:key` without changing the token stream
fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && !key
            .chars()
            .any(|c| c.is_whitespace() || "()[]{}\"';".contains(c))
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            // Strings are written back verbatim: the lexer performs no escape processing
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Nil => write!(f, "nil"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Keyword(k) => write!(f, ":{k}"),
            Value::List(elements) => write_seq(f, "(", ")", elements),
            Value::Vector(elements) => write_seq(f, "[", "]", elements),
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    if is_plain_key(key) {
                        write!(f, ":{key} {value}")?;
                    } else {
                        write!(f, "\"{key}\" {value}")?;
                    }
                }
                write!(f, "}}")
            }
            Value::NativeFunction { id, .. } => write!(f, "#<native-fn:{id}>"),
            Value::Closure { params, .. } => write!(f, "#<fn [{}]>", params.join(" ")),
            Value::Atom(cell) => with_atom_contents(cell, |inner| write!(f, "#<atom {inner}>"))
                .unwrap_or_else(|| write!(f, "#<atom ...>")),
            Value::HostObject(obj) => write!(f, "#<host:{}>", obj.type_name()),
        }
    }
}

fn write_seq(
    f: &mut std::fmt::Formatter<'_>,
    open: &str,
    close: &str,
    elements: &[Value],
) -> std::fmt::Result {
    write!(f, "{open}")?;
    for (i, elem) in elements.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{elem}")?;
    }
    write!(f, "{close}")
}

impl Value {
    /// Everything except `nil` and `false` is truthy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::NativeFunction { .. } | Value::Closure { .. })
    }

    /// Elements of a list or vector, `None` for anything else
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Vector(items) => Some(items),
            _ => None,
        }
    }

    /// Short type label used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Nil => "nil",
            Value::Symbol(_) => "symbol",
            Value::Keyword(_) => "keyword",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::NativeFunction { .. } => "native function",
            Value::Closure { .. } => "closure",
            Value::Atom(_) => "atom",
            Value::HostObject(_) => "host object",
        }
    }

    /// Build a native function value from an erased callable
    pub fn native(id: &str, arity: Option<usize>, func: Arc<OperationFn>) -> Value {
        Value::NativeFunction {
            id: id.to_owned(),
            arity,
            func,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::NativeFunction { id: id1, .. }, Value::NativeFunction { id: id2, .. }) => {
                // Compare natives by id string, not function pointer
                id1 == id2
            }
            (
                Value::Closure {
                    params: p1,
                    body: b1,
                    env: e1,
                },
                Value::Closure {
                    params: p2,
                    body: b2,
                    env: e2,
                },
            ) => p1 == p2 && b1 == b2 && e1 == e2,
            (Value::Atom(a), Value::Atom(b)) => Rc::ptr_eq(a, b),
            (Value::HostObject(a), Value::HostObject(b)) => Rc::ptr_eq(a, b),
            _ => false, // Different variants are never equal
        }
    }
}
