//! Frame sources: the live capture pipeline and recorded playback.
//!
//! Both variants push decoded frames into a [`FanOut`] once started and
//! keep doing so until stopped or exhausted. Callers only see
//! [`FrameSource`].

pub mod live;
pub mod playback;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use std::fmt;
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::control::{ControlTransport, EventLog};
use crate::error::StartError;
use crate::fanout::FanOut;
use crate::frame::{Frame, FrameSize};

pub use live::{CaptureProcess, LiveCapture, LiveConfig, PortRange};
pub use playback::{
    AccessUnit, DecoderOutput, PacketReader, PlaybackConfig, PlaybackOutcome, RecordedPlayback,
    StreamInfo, VideoCodec, VideoDecoder,
};

/// Unblocks a pending read on a device transport.
pub type ShutdownHook = Box<dyn FnOnce() + Send + 'static>;

/// Read half of the device transport.
///
/// The session reads it on its own thread, so it cannot simply drop it to
/// interrupt a blocking read. The optional shutdown hook is called on stop
/// and must make that read return.
pub struct DeviceTransport {
    reader: Box<dyn Read + Send + 'static>,
    shutdown: Option<ShutdownHook>,
}

impl DeviceTransport {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            shutdown: None,
        }
    }

    /// Attach the hook that unblocks the reader.
    pub fn with_shutdown(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.shutdown = Some(Box::new(hook));
        self
    }

    /// Read from a clone of `stream`; shutdown closes both directions.
    pub fn from_tcp(stream: &TcpStream) -> io::Result<Self> {
        let reader = stream.try_clone()?;
        let handle = stream.try_clone()?;
        Ok(Self::new(reader).with_shutdown(move || {
            if let Err(e) = handle.shutdown(Shutdown::Both) {
                tracing::debug!("device socket shutdown failed: {e}");
            }
        }))
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Read + Send + 'static>, Option<ShutdownHook>) {
        (self.reader, self.shutdown)
    }
}

impl fmt::Debug for DeviceTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceTransport")
            .field("shutdown", &self.shutdown.is_some())
            .finish()
    }
}

// ── Latch ────────────────────────────────────────────────────────

/// A one-shot flag that threads can wait on.
#[derive(Debug, Default)]
pub struct Latch {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter.
    pub fn set(&self) {
        *self.lock() = true;
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Block until set or until `timeout` elapses. Returns whether it is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(deadline),
            None => self.wait(),
        }
    }

    /// Block until set or until `deadline`. Returns whether it is set.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut set = self.lock();
        while !*set {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            set = self
                .cond
                .wait_timeout(set, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *set
    }

    /// Block until set.
    pub fn wait(&self) -> bool {
        let mut set = self.lock();
        while !*set {
            set = self.cond.wait(set).unwrap_or_else(PoisonError::into_inner);
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── FrameSink ────────────────────────────────────────────────────

/// Receiver side of a frame-producing pipeline.
///
/// `open` and `close` default to no-ops so a consumer only interested in
/// frames implements `push` alone.
pub trait FrameSink: Send {
    /// Accept or reject the stream before the first frame.
    fn open(&mut self) -> bool {
        true
    }

    /// Handle one decoded frame. Returning `false` asks the producer to stop
    /// delivering.
    fn push(&mut self, frame: &Frame) -> bool;

    /// The stream ended.
    fn close(&mut self) {}
}

// ── FrameSource ──────────────────────────────────────────────────

/// Where a session's frames come from.
pub enum FrameSource {
    Live(LiveCapture),
    Recorded(RecordedPlayback),
}

impl FrameSource {
    /// Start producing frames into `fanout`. Returns the declared frame size.
    pub fn start(&mut self, fanout: Arc<FanOut>) -> Result<FrameSize, StartError> {
        match self {
            Self::Live(live) => live.start(fanout),
            Self::Recorded(playback) => playback.start(fanout),
        }
    }

    /// Stop producing frames. Blocks until no further delivery can happen.
    pub fn stop(&mut self) {
        match self {
            Self::Live(live) => live.stop(),
            Self::Recorded(playback) => playback.stop(),
        }
    }

    /// The frame size the source declared, once known.
    pub fn frame_size(&self) -> Option<FrameSize> {
        match self {
            Self::Live(live) => live.frame_size(),
            Self::Recorded(playback) => playback.frame_size(),
        }
    }

    /// Take the control transport, if this source offers one.
    pub fn control_transport(&mut self) -> Option<ControlTransport> {
        match self {
            Self::Live(live) => live.control_transport(),
            Self::Recorded(playback) => playback.control_transport(),
        }
    }

    /// Take the device transport, if this source offers one.
    pub fn device_transport(&mut self) -> Option<DeviceTransport> {
        match self {
            Self::Live(live) => live.device_transport(),
            Self::Recorded(_) => None,
        }
    }

    /// Wait up to `timeout` for the source to stop producing frames.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        match self {
            Self::Live(live) => live.wait_stopped(timeout),
            Self::Recorded(playback) => playback.wait_finished(timeout),
        }
    }

    /// How recorded playback ended. Always `None` for a live source.
    pub fn outcome(&self) -> Option<PlaybackOutcome> {
        match self {
            Self::Live(_) => None,
            Self::Recorded(playback) => playback.outcome(),
        }
    }

    /// The recorded control messages of a playback session.
    pub fn event_log(&self) -> Option<&EventLog> {
        match self {
            Self::Live(_) => None,
            Self::Recorded(playback) => playback.event_log(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Live(_) => "live",
            Self::Recorded(_) => "recorded",
        }
    }
}

impl From<LiveCapture> for FrameSource {
    fn from(live: LiveCapture) -> Self {
        Self::Live(live)
    }
}

impl From<RecordedPlayback> for FrameSource {
    fn from(playback: RecordedPlayback) -> Self {
        Self::Recorded(playback)
    }
}
