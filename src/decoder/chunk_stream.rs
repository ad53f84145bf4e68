//! Cancellable stream of compressed chunks
//!
//! A chunk source produces into a bounded channel from its own task. The
//! consuming pipeline reads with [`ChunkStream::next_chunk`] and can cancel
//! the stream from any task through a [`StreamCancel`] handle, which aborts
//! the producer and makes further reads return end-of-stream.

use crate::decoder::{CompressedChunk, TrackKind};
use crate::utils::error::{Result, SyncError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

/// Producer side of a chunk stream
#[derive(Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<Result<CompressedChunk>>,
    cancelled: Arc<AtomicBool>,
}

impl ChunkSender {
    /// Deliver a chunk; returns `false` once the stream is cancelled or dropped
    pub async fn send(&self, chunk: CompressedChunk) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.tx.send(Ok(chunk)).await.is_ok()
    }

    /// Deliver a read failure to the consumer
    pub async fn fail(&self, error: SyncError) -> bool {
        self.tx.send(Err(error)).await.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

/// Handle that cancels a chunk stream from outside the reading task
#[derive(Clone, Debug)]
pub struct StreamCancel {
    cancelled: Arc<AtomicBool>,
    producer: Option<AbortHandle>,
}

impl StreamCancel {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(producer) = &self.producer {
            producer.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Consumer side of a chunk stream
pub struct ChunkStream {
    track: TrackKind,
    rx: mpsc::Receiver<Result<CompressedChunk>>,
    cancel: StreamCancel,
    finished: bool,
}

impl ChunkStream {
    /// Create a connected sender/stream pair with `capacity` chunks of read-ahead
    pub fn channel(track: TrackKind, capacity: usize) -> (ChunkSender, ChunkStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancelled = Arc::new(AtomicBool::new(false));
        let sender = ChunkSender { tx, cancelled: cancelled.clone() };
        let stream = ChunkStream {
            track,
            rx,
            cancel: StreamCancel { cancelled, producer: None },
            finished: false,
        };
        (sender, stream)
    }

    /// Stream over a fixed set of chunks, with no producer task
    pub fn from_chunks(track: TrackKind, chunks: Vec<CompressedChunk>) -> ChunkStream {
        let (sender, stream) = Self::channel(track, chunks.len());
        for chunk in chunks {
            // Capacity equals the chunk count, so this cannot fail
            let _ = sender.tx.try_send(Ok(chunk));
        }
        stream
    }

    /// Tie the producer task's lifetime to this stream
    pub fn attach_producer(&mut self, producer: JoinHandle<()>) {
        self.cancel.producer = Some(producer.abort_handle());
    }

    pub fn track(&self) -> TrackKind {
        self.track
    }

    /// Next chunk, or `None` at end-of-stream or after cancellation
    pub async fn next_chunk(&mut self) -> Result<Option<CompressedChunk>> {
        if self.finished || self.cancel.is_cancelled() {
            self.finished = true;
            return Ok(None);
        }

        match self.rx.recv().await {
            Some(Ok(chunk)) if !self.cancel.is_cancelled() => Ok(Some(chunk)),
            Some(Ok(_)) | None => {
                self.finished = true;
                Ok(None)
            }
            Some(Err(e)) => Err(e),
        }
    }

    /// Whether the stream has reported end-of-stream
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Handle for cancelling from another task
    pub fn cancel_handle(&self) -> StreamCancel {
        self.cancel.clone()
    }

    /// Stop the producer and end the stream
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        self.finished = true;
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
