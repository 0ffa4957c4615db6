//! The mirroring session: one frame source, its viewers, and device control.
//!
//! ```text
//!  Created ──start()──► Started ──stop()──► Stopped
//!     │                                        ▲
//!     └────────────────stop()──────────────────┘
//! ```
//!
//! A failed `start()` leaves the session `Created` so it can be retried.
//! `Stopped` is terminal; a new interaction needs a new session.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::control::{
    Buttons, ControlChannel, ControlMessage, DeviceMessage, DeviceReceiver, EventLog,
    MotionAction, TouchEvent,
};
use crate::coords::{Point, Position, to_device_space};
use crate::error::{RegisterError, ScrviewError, SendError, StartError};
use crate::fanout::{FanOut, FanOutStats, SinkHandle};
use crate::frame::{AndroidSize, FrameSize, FrameSizeCell};
use crate::resample::DisplayImage;
use crate::source::{
    CaptureProcess, FrameSource, LiveCapture, LiveConfig, PlaybackOutcome, RecordedPlayback,
    ShutdownHook,
};

/// How long `stop` waits for the device reader after shutting it down.
const DEVICE_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

// ── SessionPhase ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Built, source not started. Initial state.
    #[default]
    Created,

    /// Source running.
    Started {
        /// When the source came up.
        since: Instant,
    },

    /// Torn down. Terminal.
    Stopped,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Started { .. } => write!(f, "Started"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

impl SessionPhase {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Time spent in `Started`, `None` in any other phase.
    pub fn started_duration(&self) -> Option<Duration> {
        match self {
            Self::Started { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Created`.
    fn begin(&mut self) -> Result<(), StartError> {
        match self {
            Self::Created => {
                *self = Self::Started {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(StartError::AlreadyStarted),
        }
    }

    /// Valid from anywhere. Returns `false` if already `Stopped`.
    fn finish(&mut self) -> bool {
        if self.is_stopped() {
            return false;
        }
        *self = Self::Stopped;
        true
    }
}

// ── Session ──────────────────────────────────────────────────────

/// Owns a [`FrameSource`], the [`FanOut`] its frames are delivered through,
/// and the control channel back to the device.
pub struct Session {
    source: FrameSource,
    phase: SessionPhase,
    size: Arc<FrameSizeCell>,
    fanout: Arc<FanOut>,
    control: Option<ControlChannel>,
    device: Option<DeviceReceiver>,
    device_shutdown: Option<ShutdownHook>,
    clipboard: Arc<Mutex<Option<String>>>,
}

impl Session {
    pub fn new(source: FrameSource) -> Self {
        // An opened recording already knows its stream size.
        let size = Arc::new(FrameSizeCell::new(source.frame_size()));
        Self {
            source,
            phase: SessionPhase::Created,
            fanout: Arc::new(FanOut::new(Arc::clone(&size))),
            size,
            control: None,
            device: None,
            device_shutdown: None,
            clipboard: Arc::new(Mutex::new(None)),
        }
    }

    /// A session mirroring a live device.
    pub fn live(process: Box<dyn CaptureProcess>, config: LiveConfig) -> Self {
        Self::new(FrameSource::Live(LiveCapture::new(process, config)))
    }

    /// A session replaying a recording.
    pub fn recorded(playback: RecordedPlayback) -> Self {
        Self::new(FrameSource::Recorded(playback))
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start the source and open control.
    ///
    /// On error the session stays `Created` and may be started again.
    pub fn start(&mut self) -> Result<FrameSize, StartError> {
        if self.phase != SessionPhase::Created {
            return Err(StartError::AlreadyStarted);
        }

        let size = self.source.start(Arc::clone(&self.fanout))?;
        // The first frame may already have published its real size.
        if self.size.get().is_none() {
            self.size.set(size);
        }
        self.phase.begin()?;

        if let Some(transport) = self.source.control_transport() {
            self.control = Some(ControlChannel::new(transport));
        }
        if let Some(transport) = self.source.device_transport() {
            let (reader, shutdown) = transport.into_parts();
            self.device_shutdown = shutdown;
            let clipboard = Arc::clone(&self.clipboard);
            let receiver = DeviceReceiver::spawn(reader, move |msg| match msg {
                DeviceMessage::Clipboard { text } => {
                    tracing::debug!(len = text.len(), "device clipboard changed");
                    *clipboard.lock().unwrap_or_else(PoisonError::into_inner) = Some(text);
                }
            });
            match receiver {
                Ok(receiver) => self.device = Some(receiver),
                Err(e) => tracing::warn!("device receiver not started: {e}"),
            }
        }

        tracing::info!(
            source = self.source.kind(),
            %size,
            sinks = self.fanout.len(),
            control = self.control.is_some(),
            "session started"
        );
        Ok(size)
    }

    /// Tear everything down. Idempotent.
    ///
    /// Blocks until the source can no longer deliver frames. Must not be
    /// called from inside a sink callback.
    pub fn stop(&mut self) {
        let was = self.phase.clone();
        if !self.phase.finish() {
            return;
        }

        self.source.stop();
        if let Some(control) = self.control.take() {
            control.close();
        }
        if let Some(shutdown) = self.device_shutdown.take() {
            shutdown();
        }
        if let Some(mut device) = self.device.take() {
            device.join_timeout(DEVICE_JOIN_TIMEOUT);
        }
        self.fanout.clear();

        tracing::info!(
            previous = %was,
            uptime_ms = was.started_duration().map(|d| d.as_millis() as u64),
            "session stopped"
        );
    }

    // ── Frames ───────────────────────────────────────────────────

    /// The source's current frame size.
    ///
    /// A live pipeline is asked at call time, since it learns about a
    /// rotation before the next frame shows it. Otherwise this is the size
    /// of the last delivered frame, or the declared stream size before that.
    pub fn original_size(&self) -> Result<AndroidSize, ScrviewError> {
        let reported = match &self.source {
            FrameSource::Live(live) => live.frame_size(),
            FrameSource::Recorded(_) => None,
        };
        reported
            .or_else(|| self.size.get())
            .ok_or(ScrviewError::NotStarted)
    }

    /// Register a viewer receiving every frame resampled to `target`.
    ///
    /// Registrations made before `start()` are accepted and begin receiving
    /// frames as soon as the source produces them.
    pub fn register_sink<F>(&self, target: FrameSize, callback: F) -> Result<SinkHandle, RegisterError>
    where
        F: FnMut(&DisplayImage) + Send + 'static,
    {
        match self.phase {
            SessionPhase::Stopped => Err(RegisterError::Stopped),
            SessionPhase::Created => {
                let handle = self.fanout.add(target, Box::new(callback))?;
                tracing::debug!(%handle, "registration deferred until start");
                Ok(handle)
            }
            SessionPhase::Started { .. } => self.fanout.register(target, callback),
        }
    }

    /// Alias of [`register_sink`](Self::register_sink).
    pub fn register_screen_listener<F>(
        &self,
        target: FrameSize,
        on_screen_refresh: F,
    ) -> Result<SinkHandle, RegisterError>
    where
        F: FnMut(&DisplayImage) + Send + 'static,
    {
        self.register_sink(target, on_screen_refresh)
    }

    pub fn unregister_sink(&self, handle: SinkHandle) -> bool {
        self.fanout.unregister(handle)
    }

    pub fn fanout(&self) -> &Arc<FanOut> {
        &self.fanout
    }

    pub fn stats(&self) -> FanOutStats {
        self.fanout.stats()
    }

    /// Wait up to `timeout` for the source to finish on its own.
    pub fn wait_for_source(&self, timeout: Duration) -> bool {
        self.source.wait_finished(timeout)
    }

    pub fn source_outcome(&self) -> Option<PlaybackOutcome> {
        self.source.outcome()
    }

    // ── Control ──────────────────────────────────────────────────

    /// Press at device-space `point`.
    pub fn mouse_down(&self, point: Point, buttons: Buttons) -> Result<(), ScrviewError> {
        self.touch(MotionAction::Down, point, buttons)
    }

    /// Release at device-space `point`.
    pub fn mouse_up(&self, point: Point, buttons: Buttons) -> Result<(), ScrviewError> {
        self.touch(MotionAction::Up, point, buttons)
    }

    /// Press at `(x, y)` in a viewer of size `viewer`.
    pub fn pointer_down(
        &self,
        viewer: FrameSize,
        x: i32,
        y: i32,
        buttons: Buttons,
    ) -> Result<(), ScrviewError> {
        let point = to_device_space(self.original_size()?, viewer, x, y)?;
        self.mouse_down(point, buttons)
    }

    /// Release at `(x, y)` in a viewer of size `viewer`.
    pub fn pointer_up(
        &self,
        viewer: FrameSize,
        x: i32,
        y: i32,
        buttons: Buttons,
    ) -> Result<(), ScrviewError> {
        let point = to_device_space(self.original_size()?, viewer, x, y)?;
        self.mouse_up(point, buttons)
    }

    /// Send any control message.
    pub fn send(&self, msg: &ControlMessage) -> Result<(), SendError> {
        self.control
            .as_ref()
            .ok_or(SendError::ControlDisabled)?
            .send(msg)
    }

    /// Last clipboard text reported by the device.
    pub fn device_clipboard(&self) -> Option<String> {
        self.clipboard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Control messages recorded during playback.
    pub fn event_log(&self) -> Option<&EventLog> {
        self.source.event_log()
    }

    fn touch(&self, action: MotionAction, point: Point, buttons: Buttons) -> Result<(), ScrviewError> {
        // Always the live size: the device normalises against it.
        let position = Position::new(point, self.original_size()?);
        let event = TouchEvent::mouse(action, position, buttons);
        tracing::debug!(?action, x = point.x, y = point.y, ?buttons, "touch");
        self.send(&ControlMessage::InjectTouch(event))?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("source", &self.source.kind())
            .field("phase", &self.phase)
            .field("size", &self.size.get())
            .field("fanout", &self.fanout)
            .field("control", &self.control)
            .finish()
    }
}
