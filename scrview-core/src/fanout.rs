//! Distribution of decoded frames to registered viewers.
//!
//! Each viewer (a *sink*) owns its resampler and output buffer. Delivery is
//! synchronous on the thread that produced the frame: there is no queue, so
//! a slow viewer throttles its producer instead of buffering without bound.
//!
//! The sink set is guarded by one mutex held for the whole of
//! [`FanOut::on_frame`]. Registration changes therefore never interleave
//! with a delivery, and once [`FanOut::unregister`] returns no further
//! delivery to that handle can start.
//!
//! Callbacks run with the sink set locked and must not call back into the
//! same `FanOut`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{RegisterError, ResampleError};
use crate::frame::{Frame, FrameSize, FrameSizeCell};
use crate::resample::{DisplayImage, Resampler};

/// Viewer delivery callback.
pub type SinkCallback = Box<dyn FnMut(&DisplayImage) + Send + 'static>;

// ── SinkHandle ───────────────────────────────────────────────────

/// Opaque registration handle. Issued monotonically; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SinkHandle(u64);

impl fmt::Display for SinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink#{}", self.0)
    }
}

// ── Sink ─────────────────────────────────────────────────────────

/// A registered viewer: fixed target size, lazily built resampler, callback.
struct Sink {
    resampler: Resampler,
    callback: SinkCallback,
}

impl Sink {
    fn new(target: FrameSize, callback: SinkCallback) -> Result<Self, RegisterError> {
        let resampler = Resampler::new(target).map_err(|_| RegisterError::EmptyTarget {
            width: target.width,
            height: target.height,
        })?;
        Ok(Self {
            resampler,
            callback,
        })
    }

    fn deliver(&mut self, frame: &Frame) -> Result<(), ResampleError> {
        let image = self.resampler.resample(frame)?;
        (self.callback)(image);
        Ok(())
    }
}

// ── FanOutStats ──────────────────────────────────────────────────

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutStats {
    /// Frames handed to [`FanOut::on_frame`].
    pub frames: u64,
    /// Successful per-sink deliveries.
    pub deliveries: u64,
    /// Per-sink resample failures (frame skipped for that sink).
    pub resample_failures: u64,
}

// ── FanOut ───────────────────────────────────────────────────────

/// Owns the set of registered sinks for one session.
pub struct FanOut {
    sinks: Mutex<BTreeMap<SinkHandle, Sink>>,
    next_handle: AtomicU64,
    source_size: Arc<FrameSizeCell>,
    frames: AtomicU64,
    deliveries: AtomicU64,
    resample_failures: AtomicU64,
}

impl FanOut {
    /// Create a fan-out reading the source size from `source_size`.
    pub fn new(source_size: Arc<FrameSizeCell>) -> Self {
        Self {
            sinks: Mutex::new(BTreeMap::new()),
            next_handle: AtomicU64::new(1),
            source_size,
            frames: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            resample_failures: AtomicU64::new(0),
        }
    }

    /// Register a viewer at `target` size.
    ///
    /// Fails with [`RegisterError::NotStarted`] while the source frame size
    /// is unknown. Never blocks on the source.
    pub fn register<F>(&self, target: FrameSize, callback: F) -> Result<SinkHandle, RegisterError>
    where
        F: FnMut(&DisplayImage) + Send + 'static,
    {
        if self.source_size.get().is_none() {
            return Err(RegisterError::NotStarted);
        }
        self.add(target, Box::new(callback))
    }

    /// Register a sink whether or not the source size is known yet.
    ///
    /// Used for registrations made before the source starts; the sink
    /// simply receives nothing until frames flow.
    pub(crate) fn add(
        &self,
        target: FrameSize,
        callback: SinkCallback,
    ) -> Result<SinkHandle, RegisterError> {
        let sink = Sink::new(target, callback)?;
        let handle = SinkHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(handle, sink);
        tracing::debug!(%handle, source = ?self.source_size.get(), %target, "sink registered");
        Ok(handle)
    }

    /// Remove a sink. Returns `false` if the handle was not registered.
    ///
    /// Waits for an in-flight delivery to finish; no delivery to `handle`
    /// starts after this returns.
    pub fn unregister(&self, handle: SinkHandle) -> bool {
        let removed = self.lock().remove(&handle).is_some();
        if removed {
            tracing::debug!(%handle, "sink unregistered");
        }
        removed
    }

    /// Release every sink.
    pub fn clear(&self) {
        let released = {
            let mut sinks = self.lock();
            let n = sinks.len();
            sinks.clear();
            n
        };
        if released > 0 {
            tracing::debug!(released, "sinks released");
        }
    }

    /// Number of registered sinks.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resample `frame` for every sink and invoke its callback.
    ///
    /// A resample failure is logged and counted, and skips this frame for
    /// that sink only.
    pub fn on_frame(&self, frame: &Frame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.source_size.set(frame.size());

        let mut sinks = self.lock();
        for (handle, sink) in sinks.iter_mut() {
            match sink.deliver(frame) {
                Ok(()) => {
                    self.deliveries.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.resample_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%handle, frame = frame.index(), "resample failed: {e}");
                }
            }
        }
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> FanOutStats {
        FanOutStats {
            frames: self.frames.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            resample_failures: self.resample_failures.load(Ordering::Relaxed),
        }
    }

    // A callback that panicked leaves the map itself intact.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<SinkHandle, Sink>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for FanOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOut")
            .field("sinks", &self.len())
            .field("source_size", &self.source_size.get())
            .field("stats", &self.stats())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────
