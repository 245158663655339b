//! Live structured values.
//!
//! [`Value`] is the in-memory form of everything that crosses the mesh:
//! primitives, byte blobs, containers, and callable procedure references.
//! Containers ([`ValueList`], [`ValueMap`]) and procedures ([`Callback`])
//! are cheap cloneable shared handles, so one value graph can contain the
//! same node twice — or contain itself. The marshaling layer relies on
//! handle identity to preserve that sharing across the wire.
//!
//! # Example
//!
//! ```
//! use agentwire::value::{Value, ValueMap};
//!
//! let map = ValueMap::new();
//! map.insert("self", Value::Map(map.clone()));
//!
//! // the cycle is real: `self` points back to the same map
//! let inner = map.get("self").unwrap();
//! assert!(inner.as_map().unwrap().ptr_eq(&map));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

/// Depth at which [`Value`]'s `Debug` output is truncated, so that cyclic
/// graphs can still be printed.
const DEBUG_DEPTH_LIMIT: usize = 8;

/// Acquire a mutex, recovering the inner value if a panicking holder
/// poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A callable procedure reference.
///
/// Invocation is synchronous and infallible from the caller's point of
/// view; results travel through callback arguments by convention, with a
/// `{code, message}` map as the first argument signalling an error.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn(Vec<Value>) + Send + Sync>);

impl Callback {
    /// Wrap a closure as a callable procedure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the procedure with the given arguments.
    pub fn call(&self, args: Vec<Value>) {
        (self.0)(args)
    }

    /// Whether two handles refer to the same procedure.
    pub fn ptr_eq(&self, other: &Callback) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn ptr_id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<procedure>")
    }
}

/// A shared, mutable, ordered sequence of values.
#[derive(Clone, Default)]
pub struct ValueList(Arc<Mutex<Vec<Value>>>);

impl ValueList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a list from existing elements.
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Arc::new(Mutex::new(items)))
    }

    /// Append an element.
    pub fn push(&self, value: Value) {
        lock(&self.0).push(value);
    }

    /// Element at `index`, if present.
    pub fn get(&self, index: usize) -> Option<Value> {
        lock(&self.0).get(index).cloned()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    /// Whether the list has no elements.
    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    /// Snapshot of the current elements.
    pub fn to_vec(&self) -> Vec<Value> {
        lock(&self.0).clone()
    }

    /// Whether two handles refer to the same list.
    pub fn ptr_eq(&self, other: &ValueList) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn ptr_id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

/// A shared, mutable mapping from string keys to values.
#[derive(Clone, Default)]
pub struct ValueMap(Arc<Mutex<BTreeMap<String, Value>>>);

impl ValueMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any previous value under `key`.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        lock(&self.0).insert(key.into(), value);
    }

    /// Value under `key`, if present.
    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.0).get(key).cloned()
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        lock(&self.0).contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    /// Snapshot of the current entries, in key order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        lock(&self.0)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Whether two handles refer to the same map.
    pub fn ptr_eq(&self, other: &ValueMap) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn ptr_id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

/// A live structured value.
#[derive(Clone)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Opaque byte blob.
    Bin(Bytes),
    /// Shared ordered sequence.
    List(ValueList),
    /// Shared string-keyed mapping.
    Map(ValueMap),
    /// Callable procedure reference.
    Func(Callback),
}

impl Value {
    /// Wrap a closure as a procedure value.
    pub fn callback<F>(f: F) -> Value
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        Value::Func(Callback::new(f))
    }

    /// Whether this is `Null`.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer content, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float content, if any.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean content, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String content, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Byte-blob content, if any.
    pub fn as_bin(&self) -> Option<&Bytes> {
        match self {
            Value::Bin(v) => Some(v),
            _ => None,
        }
    }

    /// List handle, if this is a list.
    pub fn as_list(&self) -> Option<&ValueList> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// Map handle, if this is a map.
    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Procedure handle, if this is a procedure.
    pub fn as_func(&self) -> Option<&Callback> {
        match self {
            Value::Func(v) => Some(v),
            _ => None,
        }
    }

    /// Short name of this value's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bin(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Func(_) => "procedure",
        }
    }
}

/// Structural equality.
///
/// Containers compare element-wise (identity short-circuits); procedures
/// compare by identity. Comparing graphs that contain cycles recurses
/// forever — compare cyclic structures by identity instead.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bin(a), Value::Bin(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.ptr_eq(b) || a.to_vec() == b.to_vec(),
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b) || a.entries() == b.entries(),
            (Value::Func(a), Value::Func(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

#[derive(Clone, Copy)]
struct Depth<'a>(&'a Value, usize);

impl fmt::Debug for Depth<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Depth(value, depth) = *self;
        if depth >= DEBUG_DEPTH_LIMIT {
            return f.write_str("...");
        }
        match value {
            Value::Null => f.write_str("Null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Bin(v) => write!(f, "Bin({} bytes)", v.len()),
            Value::List(list) => {
                let items = list.to_vec();
                f.debug_list()
                    .entries(items.iter().map(|item| Depth(item, depth + 1)))
                    .finish()
            }
            Value::Map(map) => {
                let entries = map.entries();
                f.debug_map()
                    .entries(entries.iter().map(|(k, v)| (k, Depth(v, depth + 1))))
                    .finish()
            }
            Value::Func(_) => f.write_str("<procedure>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Depth(self, 0).fmt(f)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bin(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bin(Bytes::from(v))
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(ValueList::from_vec(v))
    }
}

impl From<ValueList> for Value {
    fn from(v: ValueList) -> Self {
        Value::List(v)
    }
}

impl From<ValueMap> for Value {
    fn from(v: ValueMap) -> Self {
        Value::Map(v)
    }
}

impl From<Callback> for Value {
    fn from(v: Callback) -> Self {
        Value::Func(v)
    }
}
