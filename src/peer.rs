//! Peer - the local view of the remote agent.
//!
//! A [`Peer`] sits on top of a [`Transport`]: it runs the `["ready", cb]`
//! handshake, keeps the callback table for procedures this side has sent
//! out, keeps the proxy table for procedures the far side publishes, and
//! dispatches every inbound message to the right callable.
//!
//! One dispatch task per peer consumes the transport events, so inbound
//! handling is serialized; `send` and proxy invocations may come from any
//! task.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──connect──► Connecting ──ready reply──► Live
//!                        │                       │
//!                        └───────disconnect──────┴──► Disconnected ──connect──► ...
//! ```
//!
//! The proxy table survives disconnects - application code holding a proxy
//! keeps a valid handle across reconnects on the same peer. The callback
//! table does not: every stored callback is flushed with an `EDISCONNECT`
//! fault when the transport goes away.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{broadcast, mpsc};

use crate::error::{Fault, FaultKind, Result, WireError};
use crate::marshal::{freeze, liven};
use crate::registry::ProcedureRegistry;
use crate::transport::{Transport, TransportEvent, TransportShared};
use crate::value::{lock, Callback, Value, ValueList};
use crate::wire::WireValue;

/// The reserved handshake dispatch identifier.
pub const READY: &str = "ready";

/// Broadcast capacity for peer events.
const EVENT_CAPACITY: usize = 64;

/// Connection state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// No transport has ever been bound.
    Idle,
    /// Transport bound, awaiting the reply to our `ready`.
    Connecting,
    /// Proxies installed; the far side can be invoked.
    Live,
    /// Transport gone; `connect` may be called again.
    Disconnected,
}

/// Observable peer events.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Handshake complete; the proxy table is populated.
    Connect,
    /// The transport's outbound queue drained after back-pressure.
    Drain,
    /// A protocol violation or dropped frame. Not itself terminal.
    Error(Fault),
    /// The transport is gone and all callbacks have been flushed.
    Disconnect(Option<Fault>),
}

/// Tagged dispatch identifier, decoded from the head of an inbound
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchId {
    /// The reserved handshake identifier.
    Ready,
    /// A procedure published by this side.
    Name(String),
    /// A callback handle this side registered earlier.
    Callback(u32),
}

impl DispatchId {
    /// Decode a dispatch identifier from the head of a message.
    fn from_value(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::Str(s) if s == READY => Ok(DispatchId::Ready),
            Value::Str(s) => Ok(DispatchId::Name(s.clone())),
            Value::Int(key) => u32::try_from(*key)
                .map(DispatchId::Callback)
                .map_err(|_| format!("callback key {key} out of range")),
            other => Err(format!(
                "dispatch id must be a string or integer, got {}",
                other.kind_name()
            )),
        }
    }
}

/// Table of single-shot callbacks this side has handed to the far side.
struct CallbackTable {
    entries: HashMap<u32, Callback>,
    /// Next allocation candidate; `None` while no transport is bound.
    next_key: Option<u32>,
}

impl CallbackTable {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_key: None,
        }
    }

    /// Fresh table for a new connection.
    fn reset(&mut self) {
        self.entries.clear();
        self.next_key = Some(1);
    }

    /// Register a callback under the next free key.
    ///
    /// Starts at `next_key` and scans forward with 32-bit wrap-around;
    /// fails only when every key is live.
    fn store(&mut self, callback: Callback) -> Result<u32> {
        let start = self.next_key.ok_or(WireError::NotConnected)?;
        let mut key = start;
        while self.entries.contains_key(&key) {
            key = key.wrapping_add(1);
            if key == start {
                return Err(WireError::KeySpaceExhausted);
            }
        }
        self.entries.insert(key, callback);
        self.next_key = Some(key.wrapping_add(1));
        Ok(key)
    }

    /// Consume the callback under `key`. The freed key becomes the next
    /// allocation preference.
    fn take(&mut self, key: u32) -> Option<Callback> {
        let callback = self.entries.remove(&key)?;
        self.next_key = Some(key);
        Some(callback)
    }

    /// Remove every stored callback and unset the key counter.
    fn flush(&mut self) -> Vec<Callback> {
        self.next_key = None;
        self.entries.drain().map(|(_, callback)| callback).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Local view of the remote agent.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    pub(crate) fn new(registry: Arc<ProcedureRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(PeerInner {
                registry,
                callbacks: Mutex::new(CallbackTable::new()),
                proxies: Mutex::new(BTreeMap::new()),
                state: Mutex::new(PeerState::Idle),
                link: Mutex::new(None),
                events,
            }),
        }
    }

    /// Bind a transport and start the handshake.
    ///
    /// Resets the callback table, spawns the dispatch task, and sends
    /// `["ready", cb]`. The peer transitions to [`PeerState::Connecting`];
    /// [`PeerEvent::Connect`] fires once the far side has replied with its
    /// published names.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if a transport is already bound, or if the handshake message
    /// cannot be queued.
    pub fn connect(&self, transport: Transport) -> Result<()> {
        let (shared, events) = transport.into_parts();

        {
            let mut link = lock(&self.inner.link);
            if link.is_some() {
                return Err(WireError::Protocol(
                    "peer already has a transport bound".to_owned(),
                ));
            }
            *link = Some(shared.clone());
        }

        lock(&self.inner.callbacks).reset();
        *lock(&self.inner.state) = PeerState::Connecting;

        tokio::spawn(dispatch_loop(self.inner.clone(), shared, events));

        let ready_cb = PeerInner::ready_callback(Arc::downgrade(&self.inner));
        self.send(vec![Value::from(READY), Value::Func(ready_cb)])?;
        Ok(())
    }

    /// Freeze a message and hand it to the transport.
    ///
    /// Returns the transport's "safe to keep writing" signal.
    pub fn send(&self, message: Vec<Value>) -> Result<bool> {
        self.inner.send(message)
    }

    /// Invoke a published far-side procedure by name.
    ///
    /// Equivalent to calling the proxy from [`Peer::api`].
    ///
    /// # Errors
    ///
    /// Fails if no proxy under `name` is installed.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Result<()> {
        let proxy = lock(&self.inner.proxies)
            .get(name)
            .cloned()
            .ok_or_else(|| WireError::Protocol(format!("no proxy for {name:?}")))?;
        if let Value::Func(proxy) = proxy {
            proxy.call(args);
        }
        Ok(())
    }

    /// Snapshot of the proxy table: far-side name → local proxy.
    ///
    /// Proxy identity is stable across reconnects of this peer.
    pub fn api(&self) -> BTreeMap<String, Value> {
        lock(&self.inner.proxies).clone()
    }

    /// Idempotent teardown.
    ///
    /// With no transport bound this only emits [`PeerEvent::Error`].
    /// Otherwise the transport is closed, every stored callback is invoked
    /// once with `fault` (or an `EDISCONNECT` fault), the table is
    /// cleared, and [`PeerEvent::Disconnect`] fires last.
    pub fn disconnect(&self, fault: Option<Fault>) {
        let link = lock(&self.inner.link).take();
        match link {
            None => {
                let fault = fault.unwrap_or_else(Fault::not_connected);
                self.inner.emit(PeerEvent::Error(fault));
            }
            Some(link) => {
                link.close();
                self.inner.finish_disconnect(fault);
            }
        }
    }

    /// Subscribe to peer events.
    pub fn events(&self) -> broadcast::Receiver<PeerEvent> {
        self.inner.events.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> PeerState {
        *lock(&self.inner.state)
    }

    /// Number of callbacks currently awaiting invocation by the far side.
    pub fn pending_callbacks(&self) -> usize {
        lock(&self.inner.callbacks).len()
    }
}

struct PeerInner {
    registry: Arc<ProcedureRegistry>,
    callbacks: Mutex<CallbackTable>,
    proxies: Mutex<BTreeMap<String, Value>>,
    state: Mutex<PeerState>,
    link: Mutex<Option<Arc<TransportShared>>>,
    events: broadcast::Sender<PeerEvent>,
}

impl PeerInner {
    fn send(&self, message: Vec<Value>) -> Result<bool> {
        let link = lock(&self.link).clone().ok_or(WireError::NotConnected)?;
        let value = Value::List(ValueList::from_vec(message));
        let wire = freeze(&value, &mut |cb| lock(&self.callbacks).store(cb))?;
        link.send(&wire)
    }

    fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    fn protocol_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("protocol violation: {message}");
        self.emit(PeerEvent::Error(Fault::new(FaultKind::Protocol, message)));
    }

    /// Dispatch one inbound message.
    fn handle_message(self: &Arc<Self>, wire: WireValue) {
        if *lock(&self.state) == PeerState::Disconnected {
            return; // nothing is delivered past the disconnect
        }

        let items = match wire {
            WireValue::Array(items) if !items.is_empty() => items,
            other => {
                self.protocol_error(format!(
                    "message must be a non-empty array, got {}",
                    other.kind_name()
                ));
                return;
            }
        };

        let weak = Arc::downgrade(self);
        let livened = liven(&WireValue::Array(items), &mut |key| {
            Self::callback_proxy(weak.clone(), key)
        });
        let message = match livened {
            Ok(Value::List(list)) => list.to_vec(),
            Ok(other) => {
                self.protocol_error(format!(
                    "message livened to {}, expected a list",
                    other.kind_name()
                ));
                return;
            }
            Err(err) => {
                self.protocol_error(err.to_string());
                return;
            }
        };

        let mut parts = message.into_iter();
        let head = match parts.next() {
            Some(head) => head,
            None => return, // unreachable given the non-empty check
        };
        let args: Vec<Value> = parts.collect();

        let id = match DispatchId::from_value(&head) {
            Ok(id) => id,
            Err(detail) => {
                self.protocol_error(detail);
                return;
            }
        };

        tracing::debug!("dispatching {id:?} with {} args", args.len());

        match id {
            DispatchId::Ready => match args.first() {
                Some(Value::Func(reply)) => {
                    let names: Vec<Value> =
                        self.registry.names().map(Value::from).collect();
                    reply.call(vec![Value::from(names)]);
                }
                _ => self.protocol_error("ready carried no reply procedure"),
            },

            DispatchId::Name(name) => match self.registry.get(&name) {
                Some(procedure) => procedure.call(args),
                None => self.protocol_error(format!("unknown procedure {name:?}")),
            },

            DispatchId::Callback(key) => {
                // single-shot: consumed on first dispatch. Taken out of the
                // lock before invocation so the callback can send freely.
                let callback = lock(&self.callbacks).take(key);
                match callback {
                    Some(callback) => callback.call(args),
                    None => self.protocol_error(format!("unknown callback key {key}")),
                }
            }
        }
    }

    /// Local proxy for a far-side callback handle.
    fn callback_proxy(inner: Weak<PeerInner>, key: u32) -> Value {
        Value::callback(move |args| match inner.upgrade() {
            Some(inner) => inner.invoke_remote(Value::from(key), args, false),
            None => orphan_invocation(args),
        })
    }

    /// Local proxy for a far-side published procedure.
    fn name_proxy(inner: Weak<PeerInner>, name: String) -> Value {
        Value::callback(move |args| match inner.upgrade() {
            Some(inner) => inner.invoke_remote(Value::from(name.as_str()), args, true),
            None => orphan_invocation(args),
        })
    }

    /// Send `[id, ...args]`, or apply the not-connected policy: the last
    /// argument, if a procedure, hears about it; otherwise the call is
    /// silently dropped.
    fn invoke_remote(&self, id: Value, args: Vec<Value>, require_live: bool) {
        let bound = lock(&self.link).is_some();
        let live = *lock(&self.state) == PeerState::Live;
        if !bound || (require_live && !live) {
            orphan_invocation(args);
            return;
        }

        let mut message = Vec::with_capacity(args.len() + 1);
        message.push(id);
        message.extend(args);
        if let Err(err) = self.send(message) {
            // transport raced away between the check and the send
            tracing::debug!("remote invocation dropped: {err}");
        }
    }

    /// The callback invoked by the far side's reply to our `ready`.
    fn ready_callback(inner: Weak<PeerInner>) -> Callback {
        Callback::new(move |args| {
            let Some(inner) = inner.upgrade() else { return };
            match args.into_iter().next() {
                Some(Value::List(names)) => inner.install_proxies(names.to_vec()),
                _ => inner.protocol_error("ready reply did not carry a name list"),
            }
        })
    }

    /// Install proxies for newly announced names, go live, emit `Connect`.
    ///
    /// Names already present keep their existing proxy, so identities held
    /// by the application stay valid across reconnects.
    fn install_proxies(self: &Arc<Self>, names: Vec<Value>) {
        {
            let mut proxies = lock(&self.proxies);
            for name in names {
                let Value::Str(name) = name else {
                    self.protocol_error(format!(
                        "published name must be a string, got {}",
                        name.kind_name()
                    ));
                    continue;
                };
                if !proxies.contains_key(&name) {
                    let proxy = Self::name_proxy(Arc::downgrade(self), name.clone());
                    proxies.insert(name, proxy);
                }
            }
        }
        *lock(&self.state) = PeerState::Live;
        self.emit(PeerEvent::Connect);
    }

    /// Whether `own` is still the transport this peer is bound to.
    fn is_current(&self, own: &Arc<TransportShared>) -> bool {
        lock(&self.link)
            .as_ref()
            .is_some_and(|link| Arc::ptr_eq(link, own))
    }

    /// Transport-initiated teardown. No-op unless `own` is still the
    /// bound transport - a stale event from a superseded binding must not
    /// touch the current one.
    fn teardown(&self, own: &Arc<TransportShared>, fault: Option<Fault>) {
        {
            let mut link = lock(&self.link);
            match link.as_ref() {
                Some(current) if Arc::ptr_eq(current, own) => {
                    link.take();
                }
                _ => return,
            }
        }
        own.close();
        self.finish_disconnect(fault);
    }

    /// Flush every stored callback with the fault, then emit `Disconnect`.
    fn finish_disconnect(&self, fault: Option<Fault>) {
        let flushed = lock(&self.callbacks).flush();
        if !flushed.is_empty() {
            let fault_value = fault
                .clone()
                .unwrap_or_else(|| Fault::disconnected("transport lost"))
                .to_value();
            for callback in flushed {
                callback.call(vec![fault_value.clone()]);
            }
        }
        *lock(&self.state) = PeerState::Disconnected;
        self.emit(PeerEvent::Disconnect(fault));
    }
}

/// Not-connected policy for proxy invocations: notify the trailing
/// callback if there is one, otherwise drop silently.
fn orphan_invocation(args: Vec<Value>) {
    if let Some(Value::Func(callback)) = args.last() {
        callback.call(vec![Fault::not_connected().to_value()]);
    }
}

/// Per-peer dispatch task: serializes all inbound handling for one
/// transport binding.
async fn dispatch_loop(
    inner: Arc<PeerInner>,
    own: Arc<TransportShared>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        if !inner.is_current(&own) {
            // leftovers from a binding the peer has already dropped
            if matches!(event, TransportEvent::Disconnect(_)) {
                break;
            }
            continue;
        }
        match event {
            TransportEvent::Message(wire) => inner.handle_message(wire),
            TransportEvent::Drain => inner.emit(PeerEvent::Drain),
            TransportEvent::Error(fault) => inner.emit(PeerEvent::Error(fault)),
            TransportEvent::Disconnect(fault) => {
                inner.teardown(&own, fault);
                break;
            }
        }
    }
}
