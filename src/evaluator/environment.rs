use crate::Error;
use crate::ast::Value;
use crate::evaluator::Arity;
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Frame {
    bindings: HashMap<String, Value>,
    parent: Option<Environment>,
}

/// A chain of binding frames implementing lexical scope.
///
/// `Environment` is a cheap handle: cloning it shares the frame, it never
/// copies bindings. Closures capture the handle, so every closure created in
/// the same scope observes later `set!`/`define` mutations of that scope.
#[derive(Clone, Default)]
pub struct Environment(Rc<RefCell<Frame>>);

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Bindings may contain closures over this very frame
        let frame = self.0.borrow();
        write!(
            f,
            "Environment({} bindings, parent: {})",
            frame.bindings.len(),
            frame.parent.is_some()
        )
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty child frame whose lookups fall back to `parent`
    pub fn with_parent(parent: &Environment) -> Self {
        Environment(Rc::new(RefCell::new(Frame {
            bindings: HashMap::new(),
            parent: Some(parent.clone()),
        })))
    }

    /// Insert or overwrite a binding in this frame only
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().bindings.insert(name.into(), value);
    }

    /// Search this frame, then the parent chain
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let frame = self.0.borrow();
        match frame.bindings.get(name) {
            Some(value) => Some(value.clone()),
            None => frame.parent.as_ref().and_then(|parent| parent.lookup(name)),
        }
    }

    pub fn get(&self, name: &str) -> Result<Value, Error> {
        self.lookup(name)
            .ok_or_else(|| Error::UndefinedSymbol(name.to_owned()))
    }

    /// Look a name up in this frame only, without walking to the parents
    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.0.borrow().bindings.get(name).cloned()
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.0.borrow().bindings.contains_key(name)
    }

    /// Remove a binding from this frame, returning it if present
    pub(crate) fn remove_local(&self, name: &str) -> Option<Value> {
        self.0.borrow_mut().bindings.remove(name)
    }

    /// Assign to the nearest existing binding of `name`.
    ///
    /// Assignment never creates a binding: an unbound name is an
    /// `UndefinedSymbol` error.
    pub fn set(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut frame = self.0.borrow_mut();
        if let Some(slot) = frame.bindings.get_mut(name) {
            *slot = value;
            return Ok(());
        }
        match &frame.parent {
            Some(parent) => parent.set(name, value),
            None => Err(Error::UndefinedSymbol(name.to_owned())),
        }
    }

    /// Build a child frame binding each parameter to its argument.
    ///
    /// Missing trailing arguments bind to `nil` and surplus arguments are
    /// ignored; callers that need exact arity check it beforehand.
    pub fn extend(&self, params: &[String], args: Vec<Value>) -> Environment {
        let child = Environment::with_parent(self);
        {
            let mut frame = child.0.borrow_mut();
            let mut args = args.into_iter();
            for param in params {
                frame
                    .bindings
                    .insert(param.clone(), args.next().unwrap_or(Value::Nil));
            }
        }
        child
    }

    pub fn parent(&self) -> Option<Environment> {
        self.0.borrow().parent.clone()
    }

    /// Drop every binding and the parent link of this frame.
    ///
    /// A closure defined in a frame holds that frame, so top-level `defn`s
    /// form reference cycles; clearing the frame breaks them.
    pub(crate) fn clear(&self) {
        let mut frame = self.0.borrow_mut();
        frame.bindings.clear();
        frame.parent = None;
    }

    /// Register a raw native function over the owned argument vector.
    ///
    /// This is the low-level API. For most new code, prefer
    /// [`Environment::register_builtin_operation`], which converts
    /// arguments and results automatically.
    ///
    /// # Example
    /// ```
    /// use lispxp::evaluator::create_global_env;
    /// use lispxp::ast::Value;
    /// use lispxp::Error;
    ///
    /// fn arg_count(args: Vec<Value>) -> Result<Value, Error> {
    ///     Ok(Value::from(args.len()))
    /// }
    ///
    /// let env = create_global_env();
    /// env.register_builtin_function("arg-count", arg_count);
    /// ```
    pub fn register_builtin_function(
        &self,
        name: &str,
        func: fn(Vec<Value>) -> Result<Value, Error>,
    ) {
        let wrapped: Arc<OperationFn> = Arc::new(func);
        self.define(name, Value::native(name, None, wrapped));
    }

    /// Register a strongly-typed Rust function as a fixed-arity native.
    ///
    /// ```rust,ignore
    /// fn hypot(a: f64, b: f64) -> f64 { (a * a + b * b).sqrt() }
    /// env.register_builtin_operation::<_, (f64, f64)>("hypot", hypot);
    /// ```
    ///
    /// Supported parameter types are `f64`, `bool`, `&str` (a keyword passes
    /// its name), `Value` and the sequence views `ValueIter` and `NumIter`,
    /// which accept a list, a vector or `nil`. Any return
    /// type `R: Into<Value>` or `Result<R, Error>` works. Conversion
    /// failures surface as `TypeError`, a wrong argument count as
    /// `ArityMismatch`.
    pub fn register_builtin_operation<F, Args>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args> + 'static,
    {
        self.define(name, Value::native(name, None, func.into_operation()));
    }

    /// Register a native whose trailing parameter is a rest iterator.
    ///
    /// The provided [`Arity`] validates the total argument count at call
    /// time, since it is not always derivable from the Rust signature.
    pub fn register_variadic_builtin_operation<F, Args>(&self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args> + 'static,
    {
        let inner = func.into_variadic_operation();
        let wrapped: Arc<OperationFn> = Arc::new(move |args: Vec<Value>| {
            arity.validate(args.len())?;
            inner(args)
        });
        self.define(name, Value::native(name, None, wrapped));
    }

    /// Get all bindings in this environment and its parents
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();

        // Start with parent bindings (so they can be overridden by local bindings)
        if let Some(parent) = self.parent() {
            for (name, value) in parent.get_all_bindings() {
                bindings.insert(name, value);
            }
        }

        for (name, value) in &self.0.borrow().bindings {
            bindings.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}
