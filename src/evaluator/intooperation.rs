//! Typed native functions.
//!
//! Builtins, host methods, host module exports and embedder natives are
//! plain Rust functions over typed parameters. The traits here erase them
//! into the single `OperationFn` shape stored in `Value::NativeFunction`,
//! converting each argument on the way in and the result on the way out.

use crate::Error;
use crate::ast::{NumberType, Value};
use std::iter::FusedIterator;
use std::sync::Arc;

/// Erased native function. The argument vector is handed over by value so
/// conversions can move payloads out instead of cloning them.
pub type OperationFn = dyn Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync;

/// A parameter type a native can declare for one positional argument.
///
/// `Param<'a>` is what the native actually receives. It may borrow from
/// the argument slot (`&str`, sequence views) or take the value out of it.
pub trait FromArg {
    type Param<'a>;

    fn from_arg<'a>(slot: &'a mut Value) -> Result<Self::Param<'a>, Error>;
}

/// A parameter type that gathers all arguments after the fixed ones
pub trait FromRest {
    type Param<'a>;

    fn from_rest<'a>(rest: &'a [Value]) -> Result<Self::Param<'a>, Error>;
}

fn take(slot: &mut Value) -> Value {
    std::mem::replace(slot, Value::Nil)
}

impl FromArg for Value {
    type Param<'a> = Value;

    fn from_arg<'a>(slot: &'a mut Value) -> Result<Value, Error> {
        Ok(take(slot))
    }
}

impl FromArg for NumberType {
    type Param<'a> = NumberType;

    fn from_arg<'a>(slot: &'a mut Value) -> Result<NumberType, Error> {
        <Value as TryInto<NumberType>>::try_into(take(slot))
    }
}

impl FromArg for bool {
    type Param<'a> = bool;

    fn from_arg<'a>(slot: &'a mut Value) -> Result<bool, Error> {
        <Value as TryInto<bool>>::try_into(take(slot))
    }
}

/// Strings borrow in place. A keyword stands for its name, so
/// `(upper-case :ok)` is `"OK"`.
impl FromArg for &str {
    type Param<'a> = &'a str;

    fn from_arg<'a>(slot: &'a mut Value) -> Result<&'a str, Error> {
        match slot {
            Value::String(s) | Value::Keyword(s) => Ok(s.as_str()),
            other => Err(Error::TypeError(format!(
                "expected string, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Elements of a sequence argument. Lists and vectors are interchangeable
/// and `nil` is the empty sequence.
fn sequence_items(slot: &mut Value) -> Result<&[Value], Error> {
    match slot {
        Value::List(items) | Value::Vector(items) => Ok(items.as_slice()),
        Value::Nil => Ok(&[]),
        other => Err(Error::TypeError(format!(
            "expected a list or vector, got {}",
            other.type_name()
        ))),
    }
}

/// Borrowed view over a sequence argument or over the rest arguments
#[derive(Debug, Clone)]
pub struct ValueIter<'a>(std::slice::Iter<'a, Value>);

impl<'a> ValueIter<'a> {
    fn over(items: &'a [Value]) -> Result<Self, Error> {
        Ok(ValueIter(items.iter()))
    }
}

impl<'a> Iterator for ValueIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<&'a Value> {
        self.0.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

/// Numbers of a sequence argument or of the rest arguments. Every element
/// is checked before the native runs, so a stray non-number is a
/// `TypeError` rather than a partial result.
#[derive(Debug, Clone)]
pub struct NumIter<'a>(std::slice::Iter<'a, Value>);

impl<'a> NumIter<'a> {
    fn over(items: &'a [Value]) -> Result<Self, Error> {
        if let Some(bad) = items.iter().find(|v| !matches!(v, Value::Number(_))) {
            return Err(Error::TypeError(format!(
                "expected number, got {}",
                bad.type_name()
            )));
        }
        Ok(NumIter(items.iter()))
    }
}

impl Iterator for NumIter<'_> {
    type Item = NumberType;

    fn next(&mut self) -> Option<NumberType> {
        // all elements were checked in `over`
        self.0.by_ref().find_map(|v| match v {
            Value::Number(n) => Some(*n),
            _ => None,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl ExactSizeIterator for ValueIter<'_> {}
impl ExactSizeIterator for NumIter<'_> {}
impl FusedIterator for ValueIter<'_> {}
impl FusedIterator for NumIter<'_> {}

// `ValueIter<'static>` and `NumIter<'static>` name the parameter kind in
// registration signatures; natives receive the borrowed view.
macro_rules! sequence_param {
    ($iter:ident) => {
        impl FromArg for $iter<'static> {
            type Param<'a> = $iter<'a>;

            fn from_arg<'a>(slot: &'a mut Value) -> Result<$iter<'a>, Error> {
                $iter::over(sequence_items(slot)?)
            }
        }

        impl FromRest for $iter<'static> {
            type Param<'a> = $iter<'a>;

            fn from_rest<'a>(rest: &'a [Value]) -> Result<$iter<'a>, Error> {
                $iter::over(rest)
            }
        }
    };
}

sequence_param!(ValueIter);
sequence_param!(NumIter);

/// Result types a native may return: anything convertible into a `Value`,
/// or a `Result` of one.
pub trait IntoValueResult {
    fn into_value_result(self) -> Result<Value, Error>;
}

impl<T: Into<Value>> IntoValueResult for Result<T, Error> {
    fn into_value_result(self) -> Result<Value, Error> {
        self.map(Into::into)
    }
}

impl<T: Into<Value>> IntoValueResult for T {
    fn into_value_result(self) -> Result<Value, Error> {
        Ok(self.into())
    }
}

/// Erase a native with a fixed parameter list. `Args` is the tuple of
/// parameter kinds, e.g. `(NumberType, &str)`.
pub trait IntoOperation<Args> {
    fn into_operation(self) -> Arc<OperationFn>;
}

/// Erase a native whose last parameter collects the remaining arguments
/// (`ValueIter` or `NumIter`), after zero or more fixed ones.
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self) -> Arc<OperationFn>;
}

macro_rules! fixed_arity {
    ($n:literal; $( $slot:ident : $A:ident ),*) => {
        impl<F, R, $( $A ),*> IntoOperation<( $( $A, )* )> for F
        where
            F: for<'a> Fn( $( <$A as FromArg>::Param<'a> ),* ) -> R + Send + Sync + 'static,
            $( $A: FromArg, )*
            R: IntoValueResult,
        {
            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |args: Vec<Value>| {
                    let mut slots: [Value; $n] = args
                        .try_into()
                        .map_err(|args: Vec<Value>| Error::arity_error($n, args.len()))?;
                    let [ $( $slot ),* ] = &mut slots;
                    let result: R = (self)( $( <$A as FromArg>::from_arg($slot)? ),* );
                    result.into_value_result()
                })
            }
        }
    };
}

fixed_arity!(0;);
fixed_arity!(1; a: A);
fixed_arity!(2; a: A, b: B);
fixed_arity!(3; a: A, b: B, c: C);
fixed_arity!(4; a: A, b: B, c: C, d: D);
fixed_arity!(5; a: A, b: B, c: C, d: D, e: E);

macro_rules! fixed_then_rest {
    ($n:literal; $( $slot:ident : $A:ident ),*) => {
        impl<F, R, I, $( $A ),*> IntoVariadicOperation<( $( $A, )* I, )> for F
        where
            F: for<'a> Fn( $( <$A as FromArg>::Param<'a>, )* <I as FromRest>::Param<'a> ) -> R
                + Send
                + Sync
                + 'static,
            $( $A: FromArg, )*
            I: FromRest,
            R: IntoValueResult,
        {
            fn into_variadic_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let len = args.len();
                    let Some(([ $( $slot ),* ], rest)) = args.split_first_chunk_mut::<$n>() else {
                        return Err(Error::arity_error($n, len));
                    };
                    let result: R = (self)(
                        $( <$A as FromArg>::from_arg($slot)?, )*
                        <I as FromRest>::from_rest(rest)?,
                    );
                    result.into_value_result()
                })
            }
        }
    };
}

fixed_then_rest!(0;);
fixed_then_rest!(1; a: A);
fixed_then_rest!(2; a: A, b: B);
fixed_then_rest!(3; a: A, b: B, c: C);
