//! `all`, `all_settled`, `any` and `race`.
//!
//! Each takes `(key, value)` pairs, coerces every value with
//! [`Promise::resolve`] and reports results under the original keys.
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::{Error, Handler, Key, Promise, Table, Value};

/// Index-keyed combinator input from a plain sequence.
pub fn keyed<I>(values: I) -> Vec<(Key, Value)>
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| (Key::Index(index), value.into()))
        .collect()
}

fn collect<I, K>(entries: I) -> Vec<(Key, Value)>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<Key>,
{
    entries
        .into_iter()
        .map(|(key, value)| (key.into(), value))
        .collect()
}

/// Counts outstanding entries and collects their results.
struct Tally {
    remaining: Cell<usize>,
    table: RefCell<Table>,
}

impl Tally {
    fn new(count: usize) -> Rc<Self> {
        Rc::new(Self {
            remaining: Cell::new(count),
            table: RefCell::new(Table::new()),
        })
    }

    /// Records one result; returns the full table once the last one arrives.
    fn record(&self, key: Key, value: Value) -> Option<Table> {
        self.table.borrow_mut().insert(key, value);
        let remaining = self.remaining.get().saturating_sub(1);
        self.remaining.set(remaining);
        (remaining == 0).then(|| self.table.take())
    }
}

fn settled_record(status: &str, field: &str, payload: Value) -> Value {
    let mut record = Table::new();
    record.insert("status", status);
    record.insert(field, payload);
    record.into()
}

impl Promise {
    /// Fulfills with every value once all fulfill; rejects with the first
    /// rejection.
    pub fn all<I, K>(entries: I) -> Promise
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Key>,
    {
        let entries = collect(entries);
        let (promise, resolve, reject) = Promise::with_resolvers();
        if entries.is_empty() {
            resolve.call(Table::new());
            return promise;
        }
        let tally = Tally::new(entries.len());
        for (key, value) in entries {
            let (tally, resolve) = (tally.clone(), resolve.clone());
            let on_fulfilled = Handler::new(move |value| {
                if let Some(values) = tally.record(key.clone(), value) {
                    resolve.call(values);
                }
                Ok(Value::Nil)
            });
            Promise::resolve(value).next(Some(on_fulfilled), Some(reject.clone().into_handler()));
        }
        promise
    }

    /// Fulfills once everything settled with a `{status, value | reason}`
    /// record per key. Never rejects.
    pub fn all_settled<I, K>(entries: I) -> Promise
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Key>,
    {
        let entries = collect(entries);
        let (promise, resolve, _) = Promise::with_resolvers();
        if entries.is_empty() {
            resolve.call(Table::new());
            return promise;
        }
        let tally = Tally::new(entries.len());
        for (key, value) in entries {
            let settle = {
                let resolve = resolve.clone();
                let tally = tally.clone();
                Rc::new(move |record: Value| {
                    if let Some(records) = tally.record(key.clone(), record) {
                        resolve.call(records);
                    }
                })
            };
            let on_rejected = settle.clone();
            Promise::resolve(value).next(
                Some(Handler::new(move |value| {
                    settle(settled_record("fulfilled", "value", value));
                    Ok(Value::Nil)
                })),
                Some(Handler::new(move |reason| {
                    on_rejected(settled_record("rejected", "reason", reason));
                    Ok(Value::Nil)
                })),
            );
        }
        promise
    }

    /// Fulfills with the first fulfillment; rejects with
    /// [`Error::Aggregate`] of every reason once all reject.
    pub fn any<I, K>(entries: I) -> Promise
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Key>,
    {
        let entries = collect(entries);
        let (promise, resolve, reject) = Promise::with_resolvers();
        if entries.is_empty() {
            reject.call(Error::Aggregate(Table::new()));
            return promise;
        }
        let tally = Tally::new(entries.len());
        for (key, value) in entries {
            let (tally, reject) = (tally.clone(), reject.clone());
            let on_rejected = Handler::new(move |reason| {
                if let Some(reasons) = tally.record(key.clone(), reason) {
                    reject.call(Error::Aggregate(reasons));
                }
                Ok(Value::Nil)
            });
            Promise::resolve(value).next(Some(resolve.clone().into_handler()), Some(on_rejected));
        }
        promise
    }

    /// Settles like the first entry to settle. With no entries it stays
    /// pending forever.
    pub fn race<I, K>(entries: I) -> Promise
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Key>,
    {
        let (promise, resolve, reject) = Promise::with_resolvers();
        for (_, value) in collect(entries) {
            Promise::resolve(value).next(
                Some(resolve.clone().into_handler()),
                Some(reject.clone().into_handler()),
            );
        }
        promise
    }
}
