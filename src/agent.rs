//! Agent - local endpoint publishing a set of named procedures.
//!
//! An [`Agent`] binds a name→procedure registry and manufactures [`Peer`]s
//! for transports. The connect path wraps [`Peer::connect`] with the
//! handshake timeout: whichever of connect, error, or the timer fires
//! first resolves the call, and the other outcomes are ignored.
//!
//! # Example
//!
//! ```ignore
//! use agentwire::{Agent, Transport, Value};
//!
//! #[tokio::main]
//! async fn main() -> agentwire::Result<()> {
//!     let agent = Agent::builder()
//!         .procedure("add", |args| {
//!             let x = args[0].as_int().unwrap_or(0);
//!             let y = args[1].as_int().unwrap_or(0);
//!             if let Some(cb) = args[2].as_func() {
//!                 cb.call(vec![Value::Null, Value::Int(x + y)]);
//!             }
//!         })
//!         .build()?;
//!
//!     let peer = agent.connect(Transport::new(reader, writer)).await?;
//!     peer.invoke("echo", vec![Value::from("hi"), Value::callback(|reply| {
//!         println!("reply: {reply:?}");
//!     })])?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::{Result, WireError};
use crate::peer::{Peer, PeerEvent};
use crate::registry::ProcedureRegistry;
use crate::transport::Transport;
use crate::value::{Callback, Value};

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder for configuring an agent.
pub struct AgentBuilder {
    procedures: Vec<(String, Callback)>,
    connect_timeout: Duration,
}

impl AgentBuilder {
    /// Create a builder with an empty registry.
    pub fn new() -> Self {
        Self {
            procedures: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Publish a procedure under `name`.
    ///
    /// Names are validated when the agent is built; registering the
    /// reserved name `"ready"` makes [`AgentBuilder::build`] fail.
    pub fn procedure<F>(mut self, name: &str, procedure: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        self.procedures
            .push((name.to_owned(), Callback::new(procedure)));
        self
    }

    /// Override the handshake timeout (default 10 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Finish the agent.
    ///
    /// # Errors
    ///
    /// Fails if a registered procedure uses a reserved name.
    pub fn build(self) -> Result<Agent> {
        let mut registry = ProcedureRegistry::new();
        for (name, procedure) in self.procedures {
            registry.insert(name, procedure)?;
        }
        Ok(Agent {
            registry: Arc::new(registry),
            connect_timeout: self.connect_timeout,
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Local endpoint publishing named procedures.
///
/// Cheap to clone; all clones share one registry. The agent does not
/// retain the peers it produces.
#[derive(Clone)]
pub struct Agent {
    registry: Arc<ProcedureRegistry>,
    connect_timeout: Duration,
}

impl Agent {
    /// Start building an agent.
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// Produce a fresh, unbound peer for this agent's registry.
    pub fn peer(&self) -> Peer {
        Peer::new(self.registry.clone())
    }

    /// Produce a peer, bind the transport, and await the handshake.
    ///
    /// # Errors
    ///
    /// [`WireError::ConnectTimeout`] if the far side does not reply within
    /// the configured timeout; the first error or disconnect otherwise.
    pub async fn connect(&self, transport: Transport) -> Result<Peer> {
        let peer = self.peer();
        self.connect_peer(&peer, transport).await?;
        Ok(peer)
    }

    /// Bind a transport to an existing peer and await the handshake.
    ///
    /// This is the reconnect path: the peer keeps its proxy table, so
    /// proxies handed out before a disconnect stay valid.
    pub async fn connect_peer(&self, peer: &Peer, transport: Transport) -> Result<()> {
        let mut events = peer.events();
        peer.connect(transport)?;

        let outcome = tokio::time::timeout(self.connect_timeout, async {
            loop {
                match events.recv().await {
                    Ok(PeerEvent::Connect) => return Ok(()),
                    Ok(PeerEvent::Error(fault)) => {
                        return Err(WireError::Protocol(fault.message))
                    }
                    Ok(PeerEvent::Disconnect(_)) => return Err(WireError::Disconnected),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(WireError::Disconnected)
                    }
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::debug!("handshake timed out after {:?}", self.connect_timeout);
                Err(WireError::ConnectTimeout)
            }
        }
    }
}
