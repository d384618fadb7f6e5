//! The dynamic payload carried through promise settlement.
//!
//! A [`Value`] is what a promise fulfills with or rejects with. The engine
//! only cares about three shapes: promises (adopted), thenables (adopted),
//! and everything else (stored as-is).
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::{Error, Handler, Promise, Thenable};

/// A key of a keyed collection handed to the combinators.
///
/// Keys are kept exactly as given; they do not have to be dense indices.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Index(usize),
    Name(Rc<str>),
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.into())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name.into())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(index) => write!(f, "{index}"),
            Key::Name(name) => f.write_str(name),
        }
    }
}

/// An ordered key→value mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    entries: BTreeMap<Key, Value>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<Key>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<&Value> {
        self.entries.get(&key.into())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.entries.iter()
    }
}

impl<K: Into<Key>, V: Into<Value>> FromIterator<(K, V)> for Table {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Table::new();
        for (key, value) in iter {
            table.insert(key, value);
        }
        table
    }
}

/// A settlement value or rejection reason.
///
/// `Nil` is the distinct absent-value marker: a settlement with no value
/// stores `Nil`, which displays as `nil` but never compares equal to the
/// string `"nil"`.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Table(Rc<Table>),
    Function(Handler),
    Promise(Promise),
    Thenable(Rc<dyn Thenable>),
    /// An opaque object owned by the host, e.g. a decoded image.
    Host(Rc<dyn Any>),
    Error(Rc<Error>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(promise) => Some(promise),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&Error> {
        match self {
            Value::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Downcasts a host object.
    pub fn as_host<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Host(object) => object.downcast_ref(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            (Value::Thenable(a), Value::Thenable(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            (Value::Host(a), Value::Host(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("Nil"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Value::Table(table) => f.debug_map().entries(table.iter()).finish(),
            Value::Function(handler) => write!(f, "{handler:?}"),
            Value::Promise(promise) => write!(f, "{promise:?}"),
            Value::Thenable(_) => f.write_str("Thenable"),
            Value::Host(_) => f.write_str("Host"),
            Value::Error(err) => write!(f, "Error({err:?})"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Table(table) => {
                f.write_str("{")?;
                for (i, (key, value)) in table.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Value::Function(_) => f.write_str("function"),
            Value::Promise(_) => f.write_str("promise"),
            Value::Thenable(_) => f.write_str("thenable"),
            Value::Host(_) => f.write_str("host object"),
            Value::Error(err) => write!(f, "{err}"),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes.into())
    }
}

impl From<Table> for Value {
    fn from(table: Table) -> Self {
        Value::Table(Rc::new(table))
    }
}

impl From<Handler> for Value {
    fn from(handler: Handler) -> Self {
        Value::Function(handler)
    }
}

impl From<Promise> for Value {
    fn from(promise: Promise) -> Self {
        Value::Promise(promise)
    }
}

impl From<Error> for Value {
    fn from(err: Error) -> Self {
        Value::Error(Rc::new(err))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Nil, Into::into)
    }
}
