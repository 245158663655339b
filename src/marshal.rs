//! Freeze / liven marshaling.
//!
//! [`freeze`] translates a live [`Value`] graph - possibly containing
//! shared subgraphs, cycles, and procedures - into an acyclic
//! [`WireValue`]. [`liven`] reverses it, rebuilding sharing and cycles and
//! turning procedure handles into invocation proxies.
//!
//! Freezing is a pre-order depth-first walk that carries the path from the
//! message root. A container or procedure is recorded as seen *before* its
//! children are visited, so a node that contains itself is caught on the
//! way down and encoded as a `{"$": path}` back-reference to its first
//! occurrence. Procedures become `{"$": key}` handles via the caller's
//! `store` function.
//!
//! Livening attaches every container to its parent slot *before* filling
//! in the children. Back-references always point at an earlier-visited
//! node, so they can be resolved by walking the partially rebuilt graph
//! from the root.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, WireError};
use crate::value::{Callback, Value, ValueList, ValueMap};
use crate::wire::{WireValue, ESCAPE_KEY};

/// One step in a back-reference path from the message root.
#[derive(Debug, Clone, PartialEq)]
enum PathSeg {
    /// Map entry, by original (unescaped) key.
    Key(String),
    /// List element, by index.
    Index(usize),
}

impl PathSeg {
    fn to_wire(&self) -> WireValue {
        match self {
            PathSeg::Key(key) => WireValue::Str(key.clone()),
            PathSeg::Index(index) => WireValue::Int(*index as i64),
        }
    }
}

/// Translate a live value graph into its wire form.
///
/// `store` is called once per procedure encountered (in traversal order)
/// and must return the integer handle the far side will use to invoke it.
///
/// # Errors
///
/// Propagates `store` failures (e.g. key-space exhaustion).
pub fn freeze<S>(value: &Value, store: &mut S) -> Result<WireValue>
where
    S: FnMut(Callback) -> Result<u32>,
{
    let mut seen = HashMap::new();
    let mut path = Vec::new();
    freeze_node(value, &mut path, &mut seen, store)
}

fn freeze_node<S>(
    value: &Value,
    path: &mut Vec<PathSeg>,
    seen: &mut HashMap<usize, Vec<PathSeg>>,
    store: &mut S,
) -> Result<WireValue>
where
    S: FnMut(Callback) -> Result<u32>,
{
    // identity applies to containers and procedures only
    if let Some(id) = node_id(value) {
        if let Some(first) = seen.get(&id) {
            return Ok(backref(first));
        }
        seen.insert(id, path.clone());
    }

    match value {
        Value::Null => Ok(WireValue::Null),
        Value::Bool(v) => Ok(WireValue::Bool(*v)),
        Value::Int(v) => Ok(WireValue::Int(*v)),
        Value::Float(v) => Ok(WireValue::Float(*v)),
        Value::Str(v) => Ok(WireValue::Str(v.clone())),
        Value::Bin(v) => Ok(WireValue::Bin(v.clone())),

        Value::Func(cb) => Ok(WireValue::handle(store(cb.clone())?)),

        Value::List(list) => {
            let items = list.to_vec();
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                path.push(PathSeg::Index(index));
                let frozen = freeze_node(item, path, seen, store)?;
                path.pop();
                out.push(frozen);
            }
            Ok(WireValue::Array(out))
        }

        Value::Map(map) => {
            let mut out = BTreeMap::new();
            for (key, item) in map.entries() {
                path.push(PathSeg::Key(key.clone()));
                let frozen = freeze_node(&item, path, seen, store)?;
                path.pop();
                out.insert(escape_key(&key), frozen);
            }
            Ok(WireValue::Map(out))
        }
    }
}

fn node_id(value: &Value) -> Option<usize> {
    match value {
        Value::List(list) => Some(list.ptr_id()),
        Value::Map(map) => Some(map.ptr_id()),
        Value::Func(cb) => Some(cb.ptr_id()),
        _ => None,
    }
}

fn backref(path: &[PathSeg]) -> WireValue {
    let mut map = BTreeMap::new();
    map.insert(
        ESCAPE_KEY.to_owned(),
        WireValue::Array(path.iter().map(PathSeg::to_wire).collect()),
    );
    WireValue::Map(map)
}

/// Escape a genuine map key for the wire: keys beginning with `"$"` get
/// one extra `"$"` so they cannot collide with the escape forms.
fn escape_key(key: &str) -> String {
    if key.starts_with('$') {
        format!("${key}")
    } else {
        key.to_owned()
    }
}

/// Strip the wire escape from a map key.
fn unescape_key(key: &str) -> String {
    key.strip_prefix('$').unwrap_or(key).to_owned()
}

/// Translate a wire value back into a live value graph.
///
/// `proxy` is called once per `{"$": key}` procedure handle and must
/// return the local proxy value standing in for the far-side procedure.
///
/// # Errors
///
/// Returns [`WireError::Protocol`] for malformed escapes and unresolvable
/// back-references.
pub fn liven<P>(wire: &WireValue, proxy: &mut P) -> Result<Value>
where
    P: FnMut(u32) -> Value,
{
    let mut builder = Liven { root: None };
    builder.build(wire, Slot::Root, proxy)?;
    builder
        .root
        .ok_or_else(|| WireError::Protocol("liven produced no value".to_owned()))
}

/// Destination of the node currently being rebuilt.
enum Slot<'a> {
    Root,
    Append(&'a ValueList),
    Entry(&'a ValueMap, String),
}

struct Liven {
    root: Option<Value>,
}

impl Liven {
    fn assign(&mut self, slot: Slot<'_>, value: Value) {
        match slot {
            Slot::Root => self.root = Some(value),
            Slot::Append(list) => list.push(value),
            Slot::Entry(map, key) => map.insert(key, value),
        }
    }

    fn build<P>(&mut self, wire: &WireValue, slot: Slot<'_>, proxy: &mut P) -> Result<()>
    where
        P: FnMut(u32) -> Value,
    {
        match wire {
            WireValue::Null => self.assign(slot, Value::Null),
            WireValue::Bool(v) => self.assign(slot, Value::Bool(*v)),
            WireValue::Int(v) => self.assign(slot, Value::Int(*v)),
            WireValue::Float(v) => self.assign(slot, Value::Float(*v)),
            WireValue::Str(v) => self.assign(slot, Value::Str(v.clone())),
            WireValue::Bin(v) => self.assign(slot, Value::Bin(v.clone())),

            WireValue::Array(items) => {
                let list = ValueList::new();
                // attach before filling so back-references into this list
                // resolve while later elements are still being built
                self.assign(slot, Value::List(list.clone()));
                for item in items {
                    self.build(item, Slot::Append(&list), proxy)?;
                }
            }

            WireValue::Map(entries) => {
                if let Some(inner) = wire.escape_payload() {
                    let value = self.resolve_escape(inner, proxy)?;
                    self.assign(slot, value);
                    return Ok(());
                }

                let map = ValueMap::new();
                self.assign(slot, Value::Map(map.clone()));
                for (key, item) in entries {
                    self.build(item, Slot::Entry(&map, unescape_key(key)), proxy)?;
                }
            }
        }
        Ok(())
    }

    fn resolve_escape<P>(&self, inner: &WireValue, proxy: &mut P) -> Result<Value>
    where
        P: FnMut(u32) -> Value,
    {
        match inner {
            WireValue::Int(key) => {
                let key = u32::try_from(*key).map_err(|_| {
                    WireError::Protocol(format!("procedure handle {key} out of range"))
                })?;
                Ok(proxy(key))
            }
            WireValue::Array(segs) => self.resolve_backref(segs),
            other => Err(WireError::Protocol(format!(
                "malformed escape payload of kind {}",
                other.kind_name()
            ))),
        }
    }

    fn resolve_backref(&self, segs: &[WireValue]) -> Result<Value> {
        let mut node = self
            .root
            .clone()
            .ok_or_else(|| WireError::Protocol("back-reference before any node".to_owned()))?;

        for seg in segs {
            node = match (seg, &node) {
                (WireValue::Str(key), Value::Map(map)) => map.get(key).ok_or_else(|| {
                    WireError::Protocol(format!("back-reference through missing key {key:?}"))
                })?,
                (WireValue::Int(index), Value::List(list)) => {
                    let index = usize::try_from(*index).map_err(|_| {
                        WireError::Protocol(format!("back-reference index {index} out of range"))
                    })?;
                    list.get(index).ok_or_else(|| {
                        WireError::Protocol(format!("back-reference past index {index}"))
                    })?
                }
                (seg, node) => {
                    return Err(WireError::Protocol(format!(
                        "back-reference step {seg:?} does not apply to {}",
                        node.kind_name()
                    )))
                }
            };
        }

        Ok(node)
    }
}
