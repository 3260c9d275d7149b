//! Host interop: foreign objects and modules exposed to programs.
//!
//! A [`HostProvider`] answers three questions for the evaluator: how to
//! invoke a method on a value (`(.toUpperCase s)`), how to read a property
//! (`(.-length s)`), and which module backs a namespace or an `(:import ...)`
//! clause. [`StandardHost`] is the default provider; embedders wrap it or
//! implement the trait themselves to expose application objects.

use crate::Error;
use crate::ast::{NumberType, Value};
use crate::evaluator::Environment;
use crate::evaluator::intooperation::{IntoOperation, OperationFn};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::{Arc, LazyLock};

/// Method implementation attached to a [`HostObject`]
pub type HostMethod = dyn Fn(&HostObject, Vec<Value>) -> Result<Value, Error>;

/// An opaque foreign object with a property table and named methods.
///
/// ```
/// use lispxp::ast::Value;
/// use lispxp::interop::HostObject;
///
/// let counter = HostObject::new("Counter")
///     .with_property("count", Value::from(0))
///     .with_method("increment", |this, _args| {
///         let next = match this.property("count") {
///             Some(Value::Number(n)) => n + 1.0,
///             _ => 1.0,
///         };
///         this.set_property("count", Value::from(next));
///         Ok(Value::from(next))
///     })
///     .into_value();
/// ```
pub struct HostObject {
    type_name: String,
    properties: RefCell<BTreeMap<String, Value>>,
    methods: HashMap<String, Rc<HostMethod>>,
}

impl HostObject {
    pub fn new(type_name: impl Into<String>) -> Self {
        HostObject {
            type_name: type_name.into(),
            properties: RefCell::new(BTreeMap::new()),
            methods: HashMap::new(),
        }
    }

    pub fn with_property(self, name: impl Into<String>, value: Value) -> Self {
        self.properties.borrow_mut().insert(name.into(), value);
        self
    }

    pub fn with_method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&HostObject, Vec<Value>) -> Result<Value, Error> + 'static,
    {
        self.methods.insert(name.into(), Rc::new(method));
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.properties.borrow().get(name).cloned()
    }

    /// Properties stay mutable after the object is shared with programs
    pub fn set_property(&self, name: impl Into<String>, value: Value) {
        self.properties.borrow_mut().insert(name.into(), value);
    }

    pub fn method(&self, name: &str) -> Option<Rc<HostMethod>> {
        self.methods.get(name).cloned()
    }

    pub fn into_value(self) -> Value {
        Value::HostObject(Rc::new(self))
    }
}

impl std::fmt::Debug for HostObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        methods.sort_unstable();
        f.debug_struct("HostObject")
            .field("type_name", &self.type_name)
            .field("properties", &self.properties.borrow().keys().collect::<Vec<_>>())
            .field("methods", &methods)
            .finish()
    }
}

/// One named export of a [`HostModule`]
#[derive(Clone)]
pub enum HostExport {
    Function {
        func: Arc<OperationFn>,
        arity: Option<usize>,
    },
    Value(Value),
}

impl std::fmt::Debug for HostExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostExport::Function { arity, .. } => write!(f, "Function(arity: {arity:?})"),
            HostExport::Value(value) => write!(f, "Value({value:?})"),
        }
    }
}

impl HostExport {
    /// The export as a bindable value; functions become natives named `id`
    pub fn to_value(&self, id: &str) -> Value {
        match self {
            HostExport::Function { func, arity } => Value::native(id, *arity, func.clone()),
            HostExport::Value(value) => value.clone(),
        }
    }
}

/// A named set of exports backing an `(:import ...)` clause or a
/// namespace of the same name
#[derive(Clone)]
pub struct HostModule {
    name: String,
    exports: BTreeMap<String, HostExport>,
}

impl HostModule {
    pub fn new(name: impl Into<String>) -> Self {
        HostModule {
            name: name.into(),
            exports: BTreeMap::new(),
        }
    }

    /// Export a strongly-typed Rust function, converted like any builtin
    pub fn with_function<F, Args>(mut self, name: &str, func: F) -> Self
    where
        F: IntoOperation<Args> + 'static,
    {
        self.exports.insert(
            name.to_owned(),
            HostExport::Function {
                func: func.into_operation(),
                arity: None,
            },
        );
        self
    }

    pub fn with_value(mut self, name: &str, value: Value) -> Self {
        self.exports.insert(name.to_owned(), HostExport::Value(value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn export(&self, name: &str) -> Option<&HostExport> {
        self.exports.get(name)
    }

    pub fn exports(&self) -> impl Iterator<Item = (&str, &HostExport)> {
        self.exports.iter().map(|(name, export)| (name.as_str(), export))
    }
}

impl std::fmt::Debug for HostModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostModule")
            .field("name", &self.name)
            .field("exports", &self.exports.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The foreign system behind `.method` / `.-property` access and host modules
pub trait HostProvider {
    /// Invoke `method` on `target`. An unknown method is
    /// [`Error::MemberNotFound`].
    fn invoke_method(&self, target: &Value, method: &str, args: Vec<Value>)
    -> Result<Value, Error>;

    /// Read `property` from `target`; a missing property is `nil`, never an error
    fn read_property(&self, target: &Value, property: &str) -> Value;

    fn find_module(&self, name: &str) -> Option<Rc<HostModule>>;

    /// Bind every export of `module` into `env`
    fn wrap_module(&self, module: &HostModule, env: &Environment) {
        for (name, export) in module.exports() {
            env.define(name, export.to_value(name));
        }
    }
}

fn member_not_found(target: &Value, member: &str) -> Error {
    let target = match target {
        Value::HostObject(obj) => obj.type_name().to_owned(),
        other => other.type_name().to_owned(),
    };
    Error::MemberNotFound {
        target,
        member: member.to_owned(),
    }
}

//
// String methods. Each takes the receiver as its first argument.
//

fn string_to_upper(s: &str) -> String {
    s.to_uppercase()
}

fn string_to_lower(s: &str) -> String {
    s.to_lowercase()
}

fn string_trim(s: &str) -> String {
    s.trim().to_owned()
}

fn string_length(s: &str) -> NumberType {
    s.chars().count() as NumberType
}

fn string_includes(s: &str, needle: &str) -> bool {
    s.contains(needle)
}

fn string_starts_with(s: &str, prefix: &str) -> bool {
    s.starts_with(prefix)
}

fn string_ends_with(s: &str, suffix: &str) -> bool {
    s.ends_with(suffix)
}

fn string_split(s: &str, separator: &str) -> Value {
    Value::List(s.split(separator).map(Value::from).collect())
}

static STRING_METHODS: LazyLock<HashMap<&'static str, Arc<OperationFn>>> = LazyLock::new(|| {
    fn method<Args, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoOperation<Args>,
    {
        <F as IntoOperation<Args>>::into_operation(f)
    }

    HashMap::from([
        ("toUpperCase", method::<(&str,), _>(string_to_upper)),
        ("toLowerCase", method::<(&str,), _>(string_to_lower)),
        ("trim", method::<(&str,), _>(string_trim)),
        ("length", method::<(&str,), _>(string_length)),
        ("includes", method::<(&str, &str), _>(string_includes)),
        ("startsWith", method::<(&str, &str), _>(string_starts_with)),
        ("endsWith", method::<(&str, &str), _>(string_ends_with)),
        ("split", method::<(&str, &str), _>(string_split)),
    ])
});

fn math_module() -> HostModule {
    fn sqrt(x: NumberType) -> NumberType {
        x.sqrt()
    }
    fn pow(base: NumberType, exp: NumberType) -> NumberType {
        base.powf(exp)
    }
    fn floor(x: NumberType) -> NumberType {
        x.floor()
    }
    fn ceil(x: NumberType) -> NumberType {
        x.ceil()
    }
    fn round(x: NumberType) -> NumberType {
        x.round()
    }
    fn sin(x: NumberType) -> NumberType {
        x.sin()
    }
    fn cos(x: NumberType) -> NumberType {
        x.cos()
    }

    HostModule::new("math")
        .with_function::<_, (NumberType,)>("sqrt", sqrt)
        .with_function::<_, (NumberType, NumberType)>("pow", pow)
        .with_function::<_, (NumberType,)>("floor", floor)
        .with_function::<_, (NumberType,)>("ceil", ceil)
        .with_function::<_, (NumberType,)>("round", round)
        .with_function::<_, (NumberType,)>("sin", sin)
        .with_function::<_, (NumberType,)>("cos", cos)
        .with_value("PI", Value::Number(std::f64::consts::PI))
        .with_value("E", Value::Number(std::f64::consts::E))
}

/// Default host provider: string methods, host-object dispatch and a table
/// of host modules (`math` is always present)
#[derive(Debug)]
pub struct StandardHost {
    modules: HashMap<String, Rc<HostModule>>,
}

impl Default for StandardHost {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardHost {
    pub fn new() -> Self {
        let mut host = StandardHost {
            modules: HashMap::new(),
        };
        host.register_module(math_module());
        host
    }

    /// Add or replace a module
    pub fn register_module(&mut self, module: HostModule) {
        self.modules
            .insert(module.name().to_owned(), Rc::new(module));
    }

    pub fn with_module(mut self, module: HostModule) -> Self {
        self.register_module(module);
        self
    }
}

impl HostProvider for StandardHost {
    fn invoke_method(
        &self,
        target: &Value,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, Error> {
        match target {
            Value::HostObject(obj) => match obj.method(method) {
                Some(func) => func(obj, args),
                None => Err(member_not_found(target, method)),
            },
            Value::String(_) => {
                let Some(func) = STRING_METHODS.get(method) else {
                    return Err(member_not_found(target, method));
                };
                let mut call_args = Vec::with_capacity(args.len() + 1);
                call_args.push(target.clone());
                call_args.extend(args);
                // Report arity without the receiver
                func(call_args).map_err(|err| match err {
                    Error::ArityMismatch { expected, got, .. } => {
                        Error::arity_error(expected.saturating_sub(1), got.saturating_sub(1))
                    }
                    other => other,
                })
            }
            _ => Err(member_not_found(target, method)),
        }
    }

    fn read_property(&self, target: &Value, property: &str) -> Value {
        let found = match (target, property) {
            (Value::HostObject(obj), _) => obj.property(property),
            (Value::String(s), "length") => Some(Value::from(s.chars().count())),
            (Value::List(items) | Value::Vector(items), "length") => Some(Value::from(items.len())),
            (Value::Map(entries), _) => entries.get(property).cloned(),
            _ => None,
        };
        found.unwrap_or(Value::Nil)
    }

    fn find_module(&self, name: &str) -> Option<Rc<HostModule>> {
        self.modules.get(name).cloned()
    }
}
