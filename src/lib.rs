//! # agentwire
//!
//! A symmetric, bidirectional, message-oriented RPC mesh between two peer
//! agents connected by any duplex binary byte stream.
//!
//! Each [`Agent`] publishes a set of named procedures. After the in-band
//! handshake, each side holds a [`Peer`] with local proxies for the far
//! side's procedures and may invoke them while serving its own. Arguments
//! are arbitrary structured [`Value`]s - including live procedure
//! references (callbacks) and cyclic object graphs, both of which survive
//! the trip: procedures arrive as invocable proxies, cycles arrive as
//! cycles.
//!
//! ## Layers
//!
//! - [`protocol`] - 4-byte big-endian length-prefix framing
//! - [`transport`] - framed MessagePack channel over `AsyncRead`/`AsyncWrite`
//! - [`marshal`] - freeze/liven between live value graphs and wire values
//! - [`peer`] - handshake, dispatch, and the single-shot callback table
//! - [`agent`] - registry binding and connection lifecycle
//!
//! ## Example
//!
//! ```ignore
//! use agentwire::{Agent, Transport, Value};
//!
//! #[tokio::main]
//! async fn main() -> agentwire::Result<()> {
//!     let agent = Agent::builder()
//!         .procedure("add", |args| {
//!             let (x, y) = (args[0].as_int().unwrap(), args[1].as_int().unwrap());
//!             if let Some(cb) = args[2].as_func() {
//!                 cb.call(vec![Value::Null, Value::Int(x + y)]);
//!             }
//!         })
//!         .build()?;
//!
//!     // any duplex byte stream works: TCP, unix socket, pipe, ...
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:4000").await?;
//!     let (reader, writer) = stream.into_split();
//!     let peer = agent.connect(Transport::new(reader, writer)).await?;
//!
//!     peer.invoke("add", vec![
//!         Value::Int(2),
//!         Value::Int(3),
//!         Value::callback(|reply| println!("2 + 3 = {:?}", reply[1])),
//!     ])?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod codec;
pub mod error;
pub mod marshal;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod value;
pub mod wire;

mod writer;

pub use agent::{Agent, AgentBuilder, DEFAULT_CONNECT_TIMEOUT};
pub use error::{Fault, FaultKind, Result, WireError};
pub use marshal::{freeze, liven};
pub use peer::{DispatchId, Peer, PeerEvent, PeerState, READY};
pub use registry::ProcedureRegistry;
pub use transport::{Transport, TransportConfig, TransportEvent};
pub use value::{Callback, Value, ValueList, ValueMap};
pub use wire::WireValue;
