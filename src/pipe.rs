//! In-process byte pipe connecting a response producer to an HTTP
//! connection writer.
//!
//! The writer half is cheaply cloneable so that event fan-out sites and
//! heartbeat timers can share one subscriber stream; end-of-stream
//! propagates once `close` is called or the last writer is dropped.
//! Writes are buffer appends and never block; a reader that stops
//! draining trips the unread-bytes watermark and subsequent writes fail,
//! which callers treat as a subscriber disconnect.

use crate::queue::Queue;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Unread bytes tolerated before writes start failing.
pub const DEFAULT_WATERMARK: usize = 4 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipeError {
    #[error("pipe reader has been dropped")]
    ReaderClosed,
    #[error("pipe writer has been closed")]
    WriterClosed,
    #[error("pipe backlog exceeds {limit} unread bytes")]
    Backlog { limit: usize },
}

enum Message {
    Data(Bytes),
    Eof,
}

struct Shared {
    unread: AtomicUsize,
    reader_closed: AtomicBool,
    writer_closed: AtomicBool,
    watermark: usize,
}

/// Sends `Eof` when the last writer handle goes away without an
/// explicit `close`.
struct WriterToken {
    queue: Queue<Message>,
    shared: Arc<Shared>,
}

impl Drop for WriterToken {
    fn drop(&mut self) {
        if !self.shared.writer_closed.swap(true, Ordering::AcqRel) {
            self.queue.put(Message::Eof);
        }
    }
}

#[derive(Clone)]
pub struct PipeWriter {
    queue: Queue<Message>,
    shared: Arc<Shared>,
    _token: Arc<WriterToken>,
}

pub struct PipeReader {
    queue: Queue<Message>,
    shared: Arc<Shared>,
    eof: bool,
}

/// Creates a connected writer/reader pair with the default watermark.
pub fn pipe() -> (PipeWriter, PipeReader) {
    pipe_with_watermark(DEFAULT_WATERMARK)
}

pub fn pipe_with_watermark(watermark: usize) -> (PipeWriter, PipeReader) {
    let queue = Queue::new();
    let shared = Arc::new(Shared {
        unread: AtomicUsize::new(0),
        reader_closed: AtomicBool::new(false),
        writer_closed: AtomicBool::new(false),
        watermark,
    });
    let token = Arc::new(WriterToken {
        queue: queue.clone(),
        shared: shared.clone(),
    });
    let writer = PipeWriter {
        queue: queue.clone(),
        shared: shared.clone(),
        _token: token,
    };
    let reader = PipeReader {
        queue,
        shared,
        eof: false,
    };
    (writer, reader)
}

impl PipeWriter {
    pub fn write(&self, data: Bytes) -> Result<(), PipeError> {
        if self.shared.reader_closed.load(Ordering::Acquire) {
            return Err(PipeError::ReaderClosed);
        }
        if self.shared.writer_closed.load(Ordering::Acquire) {
            return Err(PipeError::WriterClosed);
        }
        let unread = self.shared.unread.fetch_add(data.len(), Ordering::AcqRel) + data.len();
        if unread > self.shared.watermark {
            self.shared.unread.fetch_sub(data.len(), Ordering::AcqRel);
            return Err(PipeError::Backlog {
                limit: self.shared.watermark,
            });
        }
        self.queue.put(Message::Data(data));
        Ok(())
    }

    /// Marks end-of-stream. Further writes fail with `WriterClosed`.
    pub fn close(&self) {
        if !self.shared.writer_closed.swap(true, Ordering::AcqRel) {
            self.queue.put(Message::Eof);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.writer_closed.load(Ordering::Acquire)
            || self.shared.reader_closed.load(Ordering::Acquire)
    }
}

impl PipeReader {
    /// Yields the next chunk, or `None` once the stream is cleanly
    /// closed.
    pub async fn read(&mut self) -> Option<Bytes> {
        if self.eof {
            return None;
        }
        match self.queue.get().await {
            Message::Data(data) => {
                self.shared.unread.fetch_sub(data.len(), Ordering::AcqRel);
                Some(data)
            }
            Message::Eof => {
                self.eof = true;
                None
            }
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.reader_closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read() {
        let (writer, mut reader) = pipe();
        writer.write(Bytes::from_static(b"hello")).unwrap();
        writer.close();
        assert_eq!(Some(Bytes::from_static(b"hello")), reader.read().await);
        assert_eq!(None, reader.read().await);
        assert_eq!(None, reader.read().await);
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let (writer, _reader) = pipe();
        writer.close();
        assert_eq!(
            Err(PipeError::WriterClosed),
            writer.write(Bytes::from_static(b"x"))
        );
    }

    #[tokio::test]
    async fn dropped_reader_fails_writes() {
        let (writer, reader) = pipe();
        drop(reader);
        assert_eq!(
            Err(PipeError::ReaderClosed),
            writer.write(Bytes::from_static(b"x"))
        );
    }

    #[tokio::test]
    async fn last_writer_drop_closes() {
        let (writer, mut reader) = pipe();
        let clone = writer.clone();
        drop(writer);
        clone.write(Bytes::from_static(b"a")).unwrap();
        drop(clone);
        assert_eq!(Some(Bytes::from_static(b"a")), reader.read().await);
        assert_eq!(None, reader.read().await);
    }

    #[tokio::test]
    async fn backlog_watermark() {
        let (writer, mut reader) = pipe_with_watermark(8);
        writer.write(Bytes::from_static(b"12345678")).unwrap();
        assert_eq!(
            Err(PipeError::Backlog { limit: 8 }),
            writer.write(Bytes::from_static(b"9"))
        );
        assert_eq!(Some(Bytes::from_static(b"12345678")), reader.read().await);
        writer.write(Bytes::from_static(b"9")).unwrap();
    }
}
