//! Incremental reader over a thread's event stream.
//!
//! Wraps a byte stream, frames it into lines and normalizes each `data:` line
//! into a [`Frame`]. Two deadlines guard every read: an inactivity window
//! measured from the last byte received (keepalives count) and an absolute
//! window measured from when the reader was created. Either one expiring
//! yields a single timeout error, after which the reader is exhausted.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::time::Instant;

use strand_core::envelope::Frame;
use strand_core::error::StreamError;

use crate::config::ClientConfig;
use crate::frame::{Line, LineDecoder, classify_line};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// Adapt any fallible byte stream, e.g. `reqwest::Response::bytes_stream()`.
pub fn byte_stream<S, E>(stream: S) -> ByteStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display,
{
    Box::pin(stream.map(|r| r.map_err(|e| StreamError::Transport(e.to_string()))))
}

pub struct StreamReader {
    inner: ByteStream,
    decoder: LineDecoder,
    pending: VecDeque<Frame>,
    started: Instant,
    last_byte: Instant,
    inactivity: Duration,
    absolute: Duration,
    done: bool,
    malformed: u64,
}

impl StreamReader {
    pub fn new(inner: ByteStream, inactivity: Duration, absolute: Duration) -> Self {
        let now = Instant::now();
        Self {
            inner,
            decoder: LineDecoder::new(),
            pending: VecDeque::new(),
            started: now,
            last_byte: now,
            inactivity,
            absolute,
            done: false,
            malformed: 0,
        }
    }

    pub fn from_config(inner: ByteStream, config: &ClientConfig) -> Self {
        Self::new(inner, config.inactivity_timeout, config.absolute_timeout)
    }

    /// Data lines skipped because they did not decode.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Next frame; `None` at end of stream or after an error.
    pub async fn next_frame(&mut self) -> Option<Result<Frame, StreamError>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            if self.done {
                return None;
            }

            let idle_deadline = self.last_byte + self.inactivity;
            let hard_deadline = self.started + self.absolute;
            let deadline = idle_deadline.min(hard_deadline);

            match tokio::time::timeout_at(deadline, self.inner.next()).await {
                Err(_) => {
                    self.done = true;
                    let now = Instant::now();
                    let err = if now >= hard_deadline {
                        StreamError::AbsoluteTimeout {
                            elapsed: now - self.started,
                        }
                    } else {
                        StreamError::InactivityTimeout {
                            idle: now - self.last_byte,
                        }
                    };
                    tracing::warn!(error = %err, "stream timed out");
                    return Some(Err(err));
                }
                Ok(None) => {
                    self.done = true;
                    if let Some(line) = self.decoder.finish() {
                        self.accept(&line);
                    }
                }
                Ok(Some(Err(e))) => {
                    self.done = true;
                    tracing::debug!(error = %e, "stream transport error");
                    return Some(Err(e));
                }
                Ok(Some(Ok(bytes))) => {
                    self.last_byte = Instant::now();
                    for line in self.decoder.push(&bytes) {
                        self.accept(&line);
                    }
                }
            }
        }
    }

    fn accept(&mut self, line: &str) {
        match classify_line(line) {
            Line::Frame(frame) => self.pending.push_back(frame),
            Line::Ignored => {}
            Line::Malformed => {
                self.malformed += 1;
                tracing::debug!(line, "skipping malformed frame");
            }
        }
    }

    pub fn into_stream(mut self) -> impl Stream<Item = Result<Frame, StreamError>> + Send {
        async_stream::stream! {
            while let Some(item) = self.next_frame().await {
                yield item;
            }
        }
    }
}
