//! In-memory control transport used during recorded playback.
//!
//! There is no device behind a recording, so control messages are kept
//! together with the time they were sent, relative to when the log was
//! created.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;

/// One recorded control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    /// Time since the log was created.
    pub elapsed: Duration,
    /// Serialized message bytes.
    pub bytes: Bytes,
}

impl LoggedEvent {
    /// The message type tag, if any bytes were recorded.
    pub fn control_type(&self) -> Option<u8> {
        self.bytes.first().copied()
    }
}

#[derive(Debug)]
struct Inner {
    origin: Instant,
    events: Vec<LoggedEvent>,
}

/// Cloneable handle to a shared event log.
///
/// Implements [`Write`]; each `write` call is recorded as one event, which
/// matches how [`ControlChannel`](super::ControlChannel) emits a message.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<Mutex<Inner>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                origin: Instant::now(),
                events: Vec::new(),
            })),
        }
    }

    /// Snapshot of everything recorded so far, oldest first.
    pub fn events(&self) -> Vec<LoggedEvent> {
        self.lock().events.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for EventLog {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut inner = self.lock();
        let elapsed = inner.origin.elapsed();
        inner.events.push(LoggedEvent {
            elapsed,
            bytes: Bytes::copy_from_slice(data),
        });
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
