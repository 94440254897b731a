//! Upload size guard
//!
//! Wraps an inbound byte stream, forwards every chunk unmodified and fails
//! with [`GradeError::SizeExceeded`] once the cumulative byte count crosses
//! the configured ceiling. The check is stream-level rather than a
//! pre-check since the declared content length is neither known nor
//! trusted. The chunk that crosses the limit is still forwarded; the error
//! arrives on the following poll, so consumers must not assume the last
//! forwarded chunk belongs to a valid upload.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;

use crate::error::GradeError;

pub struct MeteredStream<S> {
    inner: S,
    max_bytes: u64,
    bytes: u64,
    tripped: Arc<AtomicBool>,
    done: bool,
}

impl<S> MeteredStream<S> {
    pub fn new(inner: S, max_bytes: u64) -> Self {
        Self {
            inner,
            max_bytes,
            bytes: 0,
            tripped: Arc::new(AtomicBool::new(false)),
            done: false,
        }
    }

    /// Total bytes forwarded so far.
    pub fn bytes_seen(&self) -> u64 {
        self.bytes
    }

    /// Shared flag that is set the moment the ceiling is crossed, so the
    /// caller can observe the violation after handing the stream off
    /// without inspecting partially written data.
    pub fn trip_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.tripped)
    }
}

impl<S, B, E> Stream for MeteredStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<anyhow::Error>,
{
    type Item = Result<B, GradeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        if this.tripped.load(Ordering::Relaxed) {
            this.done = true;
            return Poll::Ready(Some(Err(GradeError::SizeExceeded {
                limit: this.max_bytes,
            })));
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes += chunk.as_ref().len() as u64;
                if this.bytes > this.max_bytes {
                    // Forward the offending chunk; the error surfaces on
                    // the next poll.
                    this.tripped.store(true, Ordering::Relaxed);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(GradeError::Internal(e.into()))))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
