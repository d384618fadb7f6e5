//! Handlers and the callable-capability check.
use std::fmt;
use std::rc::Rc;

use crate::Value;

/// Anything that can be invoked as a promise handler.
///
/// An `Err` return is a thrown error: the engine turns it into a rejection
/// of whichever promise the handler was feeding.
pub trait Callable {
    fn call(&self, argument: Value) -> Result<Value, Value>;
}

impl<F> Callable for F
where
    F: Fn(Value) -> Result<Value, Value>,
{
    fn call(&self, argument: Value) -> Result<Value, Value> {
        self(argument)
    }
}

/// A shared reference to a [`Callable`].
#[derive(Clone)]
pub struct Handler(Rc<dyn Callable>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, Value> + 'static,
    {
        Self(Rc::new(f))
    }

    /// Wraps an object exposing an invoke capability.
    pub fn from_callable<C: Callable + 'static>(callable: C) -> Self {
        Self(Rc::new(callable))
    }

    /// The callable check: `Some` only for values that can be invoked.
    pub fn from_value(value: &Value) -> Option<Handler> {
        match value {
            Value::Function(handler) => Some(handler.clone()),
            _ => None,
        }
    }

    pub fn call(&self, argument: Value) -> Result<Value, Value> {
        self.0.call(argument)
    }

    pub fn ptr_eq(&self, other: &Handler) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler {{ ... }}")
    }
}

pub fn is_callable(value: &Value) -> bool {
    Handler::from_value(value).is_some()
}
