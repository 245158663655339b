//! Dedicated writer task for outbound frames.
//!
//! All sends for one transport funnel into a single task that owns the
//! sink. Senders never block: frames are queued on an unbounded channel
//! and a pending counter drives the best-effort backpressure signal.
//!
//! ```text
//! Peer / proxies ─┐
//! dispatch task  ─┼─► mpsc::UnboundedSender<OutboundFrame> ─► writer task ─► sink
//! application    ─┘
//! ```
//!
//! `send` reports `false` once the queue crosses the high watermark; the
//! `on_drain` hook fires when the queue empties again after that. Batching
//! multiple frames into a single `write_vectored` call keeps syscall count
//! down under load.

use std::io::IoSlice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, WireError};
use crate::protocol::{frame_header, LEN_PREFIX_SIZE};
use crate::value::lock;

/// Default pending-frame count past which `send` reports back-pressure.
pub const DEFAULT_HIGH_WATERMARK: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the sink.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded length prefix.
    header: [u8; LEN_PREFIX_SIZE],
    /// Payload bytes.
    payload: Bytes,
}

impl OutboundFrame {
    /// Frame a payload for the wire.
    pub fn new(payload: Bytes) -> Result<Self> {
        Ok(Self {
            header: frame_header(payload.len())?,
            payload,
        })
    }

    /// Total wire size of this frame (prefix + payload).
    #[inline]
    pub fn size(&self) -> usize {
        LEN_PREFIX_SIZE + self.payload.len()
    }
}

/// Handle for queueing frames onto the writer task.
pub struct WriterHandle {
    tx: Mutex<Option<mpsc::UnboundedSender<OutboundFrame>>>,
    pending: Arc<AtomicUsize>,
    behind: Arc<AtomicBool>,
    high_watermark: usize,
}

impl WriterHandle {
    /// Queue a frame.
    ///
    /// Returns `true` while the queue sits below the high watermark -
    /// the "safe to keep writing" signal. After a `false`, callers should
    /// wait for the drain notification before sending more; nothing
    /// enforces that.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Disconnected`] once the writer has shut down.
    pub fn send(&self, frame: OutboundFrame) -> Result<bool> {
        {
            let guard = lock(&self.tx);
            let tx = guard.as_ref().ok_or(WireError::Disconnected)?;
            self.pending.fetch_add(1, Ordering::AcqRel);
            if tx.send(frame).is_err() {
                self.pending.fetch_sub(1, Ordering::Release);
                return Err(WireError::Disconnected);
            }
        }

        if self.pending.load(Ordering::Acquire) >= self.high_watermark {
            self.behind.store(true, Ordering::Release);
            Ok(false)
        } else {
            Ok(true)
        }
    }

    /// Close the queue. The writer task drains what was already queued,
    /// then exits and drops the sink.
    pub fn shutdown(&self) {
        lock(&self.tx).take();
    }

    /// Current queued-frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the queue currently sits at or above the high watermark.
    #[inline]
    pub fn is_backpressured(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.high_watermark
    }
}

/// Spawn the writer task and return a handle for queueing frames.
///
/// `on_drain` fires whenever the queue empties after having crossed the
/// high watermark.
pub fn spawn_writer<W, D>(
    sink: W,
    high_watermark: usize,
    on_drain: D,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
    D: Fn() + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let behind = Arc::new(AtomicBool::new(false));

    let handle = WriterHandle {
        tx: Mutex::new(Some(tx)),
        pending: pending.clone(),
        behind: behind.clone(),
        high_watermark,
    };

    let task = tokio::spawn(writer_loop(rx, sink, pending, behind, on_drain));

    (handle, task)
}

/// Main writer loop - receives frames and writes them to the sink.
async fn writer_loop<W, D>(
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut sink: W,
    pending: Arc<AtomicUsize>,
    behind: Arc<AtomicBool>,
    on_drain: D,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    D: Fn(),
{
    loop {
        let first = match rx.recv().await {
            Some(frame) => frame,
            None => return Ok(()), // queue closed, clean shutdown
        };

        // collect additional ready frames without blocking
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_len = batch.len();
        write_batch(&mut sink, &batch).await?;

        let left = pending.fetch_sub(batch_len, Ordering::AcqRel) - batch_len;
        if left == 0 && behind.swap(false, Ordering::AcqRel) {
            on_drain();
        }
    }
}

/// Write a batch of frames with scatter/gather I/O.
///
/// A single `write_vectored` usually covers the whole batch; partial
/// writes fall back to rebuilding the remaining slices.
async fn write_batch<W>(sink: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);
    for frame in batch {
        slices.push(IoSlice::new(&frame.header));
        if !frame.payload.is_empty() {
            slices.push(IoSlice::new(&frame.payload));
        }
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();

    let written = sink.write_vectored(&slices).await?;
    if written == 0 {
        return Err(write_zero());
    }

    let mut total_written = written;
    while total_written < total_size {
        let remaining = remaining_slices(batch, total_written);
        if remaining.is_empty() {
            break;
        }

        let written = sink.write_vectored(&remaining).await?;
        if written == 0 {
            return Err(write_zero());
        }
        total_written += written;
    }

    sink.flush().await?;
    Ok(())
}

fn write_zero() -> WireError {
    WireError::Io(std::io::Error::new(
        std::io::ErrorKind::WriteZero,
        "write_vectored returned 0",
    ))
}

/// Rebuild the IoSlice array for what is left after a partial write.
fn remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + LEN_PREFIX_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        offset = header_end;

        if !frame.payload.is_empty() {
            let payload_end = offset + frame.payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.payload[start..]));
            }
            offset = payload_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::duplex;

    #[test]
    fn test_outbound_frame_sizes() {
        let frame = OutboundFrame::new(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(frame.size(), LEN_PREFIX_SIZE + 5);
        assert_eq!(frame.header, [0, 0, 0, 5]);

        let empty = OutboundFrame::new(Bytes::new()).unwrap();
        assert_eq!(empty.size(), LEN_PREFIX_SIZE);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer(client, DEFAULT_HIGH_WATERMARK, || {});

        let frame = OutboundFrame::new(Bytes::from_static(b"hello")).unwrap();
        assert!(handle.send(frame).unwrap());

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut buf = vec![0u8; 64];
        let n = tokio::io::AsyncReadExt::read(&mut server, &mut buf)
            .await
            .unwrap();

        assert_eq!(n, LEN_PREFIX_SIZE + 5);
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);
        assert_eq!(&buf[4..9], b"hello");
    }

    #[tokio::test]
    async fn test_send_reports_watermark() {
        let (client, _server) = duplex(16);
        // watermark of 1: every queued frame trips backpressure
        let (handle, _task) = spawn_writer(client, 1, || {});

        let frame = OutboundFrame::new(Bytes::from_static(b"0123456789abcdef")).unwrap();
        assert!(!handle.send(frame).unwrap());
        assert!(handle.is_backpressured());
    }

    #[tokio::test]
    async fn test_drain_fires_after_backpressure() {
        let (client, mut server) = duplex(1 << 16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handle, _task) = spawn_writer(client, 2, move || {
            let _ = tx.send(());
        });

        for _ in 0..3 {
            let frame = OutboundFrame::new(Bytes::from_static(b"x")).unwrap();
            let _ = handle.send(frame).unwrap();
        }

        // consume so the writer can make progress
        let mut buf = vec![0u8; 256];
        let _ = tokio::io::AsyncReadExt::read(&mut server, &mut buf)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("drain within a second")
            .expect("drain signal");
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_queue_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer(client, DEFAULT_HIGH_WATERMARK, || {});

        handle.shutdown();

        let result = task.await.unwrap();
        assert!(result.is_ok());

        let frame = OutboundFrame::new(Bytes::new()).unwrap();
        assert!(matches!(
            handle.send(frame),
            Err(WireError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());

        let batch: Vec<_> = (0..5)
            .map(|_| OutboundFrame::new(Bytes::from_static(b"abc")).unwrap())
            .collect();

        write_batch(&mut buf, &batch).await.unwrap();

        let written = buf.into_inner();
        assert_eq!(written.len(), 5 * (LEN_PREFIX_SIZE + 3));
    }

    #[test]
    fn test_remaining_slices_partial_header() {
        let batch = vec![OutboundFrame::new(Bytes::from_static(b"hello")).unwrap()];

        let slices = remaining_slices(&batch, 2);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), LEN_PREFIX_SIZE - 2);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_remaining_slices_into_payload() {
        let batch = vec![OutboundFrame::new(Bytes::from_static(b"hello")).unwrap()];

        let slices = remaining_slices(&batch, LEN_PREFIX_SIZE + 2);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 3);
    }
}
