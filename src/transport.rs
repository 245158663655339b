//! Framed message channel over a duplex byte stream.
//!
//! A [`Transport`] owns both halves of a byte stream: a read task drives
//! the [`Framer`] and decodes each frame into a [`WireValue`], a writer
//! task (see [`crate::writer`]) owns the sink. Everything observable
//! surfaces as [`TransportEvent`]s on a single channel:
//!
//! - `Message` for each decoded inbound frame, in arrival order
//! - `Drain` when the outbound queue empties after back-pressure
//! - `Error` for payloads that fail to decode (the frame is dropped, the
//!   stream continues)
//! - `Disconnect` exactly once, as the last event, on EOF, stream error,
//!   or local close
//!
//! The transport performs no dispatch of its own; a [`Peer`] usually owns
//! the event stream.
//!
//! [`Peer`]: crate::peer::Peer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::MsgPackCodec;
use crate::error::{Fault, FaultKind, Result, WireError};
use crate::protocol::{Framer, DEFAULT_MAX_FRAME_LEN};
use crate::value::lock;
use crate::wire::WireValue;
use crate::writer::{spawn_writer, OutboundFrame, WriterHandle, DEFAULT_HIGH_WATERMARK};

/// Read buffer size for the inbound loop.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Observable transport events, in emission order.
#[derive(Debug)]
pub enum TransportEvent {
    /// A decoded inbound message.
    Message(WireValue),
    /// The outbound queue emptied after having signalled back-pressure.
    Drain,
    /// A recoverable error; the offending frame was discarded.
    Error(Fault),
    /// Terminal loss of the byte stream. Always the last event.
    Disconnect(Option<Fault>),
}

/// Tuning knobs for a transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum accepted inbound frame length.
    pub max_frame_len: usize,
    /// Outbound queued-frame count past which `send` reports `false`.
    pub high_watermark: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            high_watermark: DEFAULT_HIGH_WATERMARK,
        }
    }
}

/// A framed MessagePack channel over one duplex byte stream.
pub struct Transport {
    shared: Arc<TransportShared>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Transport {
    /// Wrap a byte source and sink with default configuration.
    ///
    /// Must be called within a tokio runtime: the read and write tasks are
    /// spawned here.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_config(reader, writer, TransportConfig::default())
    }

    /// Wrap a byte source and sink with explicit configuration.
    pub fn with_config<R, W>(reader: R, writer: W, config: TransportConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let drain_tx = events_tx.clone();
        let (writer_handle, writer_task) =
            spawn_writer(writer, config.high_watermark, move || {
                let _ = drain_tx.send(TransportEvent::Drain);
            });

        let shared = Arc::new(TransportShared {
            writer: writer_handle,
            read_task: Mutex::new(None),
            closed: AtomicBool::new(false),
            events_tx: Mutex::new(Some(events_tx.clone())),
        });

        let read_task = tokio::spawn(read_loop(
            reader,
            events_tx,
            shared.clone(),
            config.max_frame_len,
        ));
        *lock(&shared.read_task) = Some(read_task);

        watch_writer(writer_task, shared.clone());

        Self {
            shared,
            events: events_rx,
        }
    }

    /// Serialize and frame one message, then queue it for writing.
    ///
    /// Returns the sink's "safe to keep writing" signal; after `false`,
    /// wait for [`TransportEvent::Drain`] before sending more.
    pub fn send(&self, message: &WireValue) -> Result<bool> {
        self.shared.send(message)
    }

    /// Receive the next transport event.
    ///
    /// Returns `None` after the disconnect event has been consumed and the
    /// internal tasks are gone.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Idempotent local teardown. Emits the final `Disconnect` event.
    pub fn close(&self) {
        self.shared.finish(None);
    }

    pub(crate) fn into_parts(
        self,
    ) -> (Arc<TransportShared>, mpsc::UnboundedReceiver<TransportEvent>) {
        (self.shared, self.events)
    }
}

/// Send/close surface shared between the transport owner and its tasks.
pub(crate) struct TransportShared {
    writer: WriterHandle,
    read_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    events_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl TransportShared {
    pub(crate) fn send(&self, message: &WireValue) -> Result<bool> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WireError::Disconnected);
        }
        let payload = MsgPackCodec::encode(message)?;
        let frame = OutboundFrame::new(Bytes::from(payload))?;
        self.writer.send(frame)
    }

    pub(crate) fn close(&self) {
        self.finish(None);
    }

    /// One-shot teardown: stop reading, close the writer queue, emit the
    /// final disconnect event and release the event channel.
    fn finish(&self, fault: Option<Fault>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = lock(&self.read_task).take() {
            task.abort();
        }
        self.writer.shutdown();
        if let Some(tx) = lock(&self.events_tx).take() {
            let _ = tx.send(TransportEvent::Disconnect(fault));
        }
    }
}

/// Surface writer-task failures as a disconnect.
fn watch_writer(writer_task: JoinHandle<Result<()>>, shared: Arc<TransportShared>) {
    tokio::spawn(async move {
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!("transport writer failed: {err}");
                shared.finish(Some(Fault::disconnected(format!("write failed: {err}"))));
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                tracing::error!("transport writer panicked: {err}");
                shared.finish(Some(Fault::disconnected("writer task panicked")));
            }
        }
    });
}

/// Inbound loop: bytes → frames → decoded messages.
async fn read_loop<R>(
    mut reader: R,
    events: mpsc::UnboundedSender<TransportEvent>,
    shared: Arc<TransportShared>,
    max_frame_len: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut framer = Framer::with_max_frame_len(max_frame_len);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                shared.finish(Some(Fault::disconnected("stream ended")));
                return;
            }
            Ok(n) => n,
            Err(err) => {
                shared.finish(Some(Fault::disconnected(format!("read failed: {err}"))));
                return;
            }
        };

        let frames = match framer.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(err) => {
                // length corruption cannot be resynced
                let _ = events.send(TransportEvent::Error(Fault::new(
                    FaultKind::Protocol,
                    err.to_string(),
                )));
                shared.finish(Some(Fault::disconnected("unrecoverable framing error")));
                return;
            }
        };

        for payload in frames {
            match MsgPackCodec::decode::<WireValue>(&payload) {
                Ok(message) => {
                    let _ = events.send(TransportEvent::Message(message));
                }
                Err(err) => {
                    tracing::warn!("dropping undecodable frame: {err}");
                    let _ = events.send(TransportEvent::Error(Fault::new(
                        FaultKind::BadPayload,
                        format!("frame payload failed to decode: {err}"),
                    )));
                }
            }
        }
    }
}
