//! Closable byte-chunk relay with bounded-buffer backpressure.
//!
//! [`ByteStream`] is the single ingestion primitive in unitflow: network
//! response bodies and local files are both pumped through it on their way
//! into the content store. It is a single-producer/single-consumer queue of
//! [`Bytes`] chunks with a closed flag.
//!
//! # Contract
//!
//! - `enqueue` appends a chunk and fails with [`StreamError::Closed`] once
//!   the stream has been closed; data must never be pushed past closure.
//! - `close` is idempotent; chunks queued before closure still drain.
//! - `read` returns everything queued at wake time, concatenated in enqueue
//!   order, with `done=false`. While the stream is open and empty the read
//!   pends until the next `enqueue` or `close`. Once closed and drained it
//!   yields a terminal empty chunk with `done=true`.
//! - At most one read may be outstanding at a time.
//!
//! Bounded streams ([`ByteStream::bounded`]) cap the number of queued
//! chunks; `enqueue` then awaits until the consumer has made room. This is
//! how the HTTP pump and the file source avoid buffering a whole body.

mod source;

pub use source::{pump_reader, spawn_file_source, spawn_reader_source};

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

/// Errors produced by [`ByteStream`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// `enqueue` was called after `close`.
    #[error("stream is closed")]
    Closed,
}

/// One result of a [`ByteStream::read`] call.
///
/// `done=true` carries no payload and means the stream is closed and fully
/// drained; every earlier result carries `done=false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChunk {
    /// Concatenation of every chunk queued when the read resolved.
    pub data: Bytes,
    /// Terminal marker.
    pub done: bool,
}

struct StreamState {
    queue: VecDeque<Bytes>,
    closed: bool,
}

struct Inner {
    state: Mutex<StreamState>,
    /// Woken when data arrives or the stream closes.
    readable: Notify,
    /// Woken when the consumer drains the queue.
    writable: Notify,
    /// Maximum queued chunks; `None` means unbounded.
    capacity: Option<usize>,
}

/// Cloneable handle to a byte-chunk relay.
///
/// Clones share the same queue; the producer side holds one clone and the
/// consumer another.
#[derive(Clone)]
pub struct ByteStream {
    inner: Arc<Inner>,
}

impl ByteStream {
    /// Create an unbounded stream.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Create a stream that holds at most `capacity` queued chunks.
    ///
    /// A producer calling `enqueue` on a full stream waits until the
    /// consumer reads. Capacity 1 gives strict chunk-by-chunk pacing.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StreamState {
                    queue: VecDeque::new(),
                    closed: false,
                }),
                readable: Notify::new(),
                writable: Notify::new(),
                capacity,
            }),
        }
    }

    /// Append a chunk, waiting for room on a bounded stream.
    ///
    /// # Errors
    ///
    /// [`StreamError::Closed`] if the stream has been closed, whether or
    /// not data is still queued.
    pub async fn enqueue(&self, chunk: impl Into<Bytes>) -> Result<(), StreamError> {
        let mut pending = Some(chunk.into());
        loop {
            // Register interest before checking state so a wakeup between
            // the check and the await is not lost.
            let writable = self.inner.writable.notified();
            {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(StreamError::Closed);
                }
                let has_room = self
                    .inner
                    .capacity
                    .map_or(true, |cap| state.queue.len() < cap);
                if has_room {
                    if let Some(chunk) = pending.take() {
                        state.queue.push_back(chunk);
                    }
                    self.inner.readable.notify_one();
                    return Ok(());
                }
            }
            writable.await;
        }
    }

    /// Mark that no further chunks will arrive.
    ///
    /// Idempotent; already-queued data remains readable.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if !state.closed {
            state.closed = true;
            self.inner.readable.notify_one();
            self.inner.writable.notify_one();
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Read the next available data.
    ///
    /// Chunks enqueued since the last read are concatenated into a single
    /// payload in enqueue order. Pends while the stream is open and empty.
    pub async fn read(&self) -> ReadChunk {
        loop {
            let readable = self.inner.readable.notified();
            {
                let mut state = self.inner.state.lock();
                if !state.queue.is_empty() {
                    let data = Self::drain(&mut state.queue);
                    self.inner.writable.notify_one();
                    return ReadChunk { data, done: false };
                }
                if state.closed {
                    return ReadChunk {
                        data: Bytes::new(),
                        done: true,
                    };
                }
            }
            readable.await;
        }
    }

    /// Drain the whole stream into one buffer.
    ///
    /// Convenience for callers that want the full body in memory, e.g.
    /// tests and small fixtures. The orchestration pipeline itself never
    /// uses this; it consumes chunk by chunk.
    pub async fn read_to_end(&self) -> Bytes {
        let mut buf = BytesMut::new();
        loop {
            let chunk = self.read().await;
            if chunk.done {
                return buf.freeze();
            }
            buf.extend_from_slice(&chunk.data);
        }
    }

    fn drain(queue: &mut VecDeque<Bytes>) -> Bytes {
        if queue.len() == 1 {
            return queue.pop_front().unwrap_or_default();
        }
        let total: usize = queue.iter().map(Bytes::len).sum();
        let mut buf = BytesMut::with_capacity(total);
        while let Some(chunk) = queue.pop_front() {
            buf.extend_from_slice(&chunk);
        }
        buf.freeze()
    }
}

impl Default for ByteStream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ByteStream")
            .field("queued", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_read_concatenates_queued_chunks_in_order() {
        let stream = ByteStream::new();
        stream.enqueue(&b"foo"[..]).await.unwrap();
        stream.enqueue(&b"bar"[..]).await.unwrap();
        stream.enqueue(&b"baz"[..]).await.unwrap();

        let chunk = stream.read().await;
        assert!(!chunk.done);
        assert_eq!(&chunk.data[..], b"foobarbaz");
    }

    #[tokio::test]
    async fn test_read_after_close_drains_then_reports_done() {
        let stream = ByteStream::new();
        stream.enqueue(&b"tail"[..]).await.unwrap();
        stream.close();

        let chunk = stream.read().await;
        assert!(!chunk.done);
        assert_eq!(&chunk.data[..], b"tail");

        let done = stream.read().await;
        assert!(done.done);
        assert!(done.data.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_after_close_fails() {
        let stream = ByteStream::new();
        stream.enqueue(&b"queued"[..]).await.unwrap();
        stream.close();
        stream.close(); // idempotent

        let err = stream.enqueue(&b"late"[..]).await.unwrap_err();
        assert_eq!(err, StreamError::Closed);

        // Queued data survives closure.
        assert_eq!(&stream.read().await.data[..], b"queued");
        assert!(stream.read().await.done);
    }

    #[tokio::test]
    async fn test_enqueue_after_close_fails_on_empty_stream() {
        let stream = ByteStream::new();
        stream.close();
        assert_eq!(
            stream.enqueue(&b"x"[..]).await.unwrap_err(),
            StreamError::Closed
        );
        assert!(stream.read().await.done);
    }

    #[tokio::test]
    async fn test_pending_read_resolves_on_enqueue() {
        let stream = ByteStream::new();
        let producer = stream.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.enqueue(&b"late data"[..]).await.unwrap();
        });

        let chunk = stream.read().await;
        assert_eq!(&chunk.data[..], b"late data");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_read_resolves_on_close() {
        let stream = ByteStream::new();
        let producer = stream.clone();
        let closer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.close();
        });

        let chunk = stream.read().await;
        assert!(chunk.done);
        closer.await.unwrap();
    }

    #[tokio::test]
    async fn test_bounded_enqueue_waits_for_consumer() {
        let stream = ByteStream::bounded(1);
        stream.enqueue(&b"first"[..]).await.unwrap();

        // Queue is full; a second enqueue must not complete yet.
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), stream.enqueue(&b"second"[..])).await;
        assert!(blocked.is_err(), "enqueue should wait while full");

        assert_eq!(&stream.read().await.data[..], b"first");
        stream.enqueue(&b"second"[..]).await.unwrap();
        assert_eq!(&stream.read().await.data[..], b"second");
    }

    #[tokio::test]
    async fn test_read_to_end_collects_whole_body() {
        let stream = ByteStream::new();
        let producer = stream.clone();
        tokio::spawn(async move {
            for part in [&b"a"[..], b"bc", b"def"] {
                producer.enqueue(part).await.unwrap();
            }
            producer.close();
        });
        assert_eq!(&stream.read_to_end().await[..], b"abcdef");
    }
}
