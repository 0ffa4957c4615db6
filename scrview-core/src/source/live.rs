//! Live capture from a remote device.
//!
//! The capture pipeline itself (pushing the device server, tunnelling, H.264
//! decoding) lives behind [`CaptureProcess`]. This module configures it,
//! plugs a [`FrameSink`] into it and forwards every decoded frame to the
//! session's [`FanOut`] on the pipeline's own thread.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::ControlTransport;
use crate::error::StartError;
use crate::fanout::FanOut;
use crate::frame::{AndroidSize, Frame, FrameSize};
use crate::source::{DeviceTransport, FrameSink, Latch};

// ── LiveConfig ───────────────────────────────────────────────────

/// Local TCP port range tried for the device tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub first: u16,
    pub last: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            first: 27183,
            last: 27199,
        }
    }
}

/// Options handed to the capture process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Device serial; `None` picks the only connected device.
    pub serial: Option<String>,
    /// Server-side log level.
    pub log_level: String,
    /// Cap on the larger frame dimension (0 = device native).
    pub max_size: u16,
    /// Encoder bit rate in bits per second.
    pub bit_rate: u32,
    /// Frame rate cap (0 = unlimited).
    pub max_fps: u16,
    /// -1 unlocked, otherwise the locked rotation (0..=3).
    pub lock_video_orientation: i8,
    pub port_range: PortRange,
    /// Use `adb forward` instead of `adb reverse`.
    pub force_adb_forward: bool,
    /// `width:height:x:y` crop applied on the device.
    pub crop: Option<String>,
    /// Open the control channel.
    pub control: bool,
    pub display_id: u32,
    pub show_touches: bool,
    pub stay_awake: bool,
    pub turn_screen_off: bool,
    pub power_off_on_close: bool,
    pub codec_options: Option<String>,
    pub encoder_name: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            serial: None,
            log_level: "info".into(),
            max_size: 0,
            bit_rate: 8_000_000,
            max_fps: 0,
            lock_video_orientation: -1,
            port_range: PortRange::default(),
            force_adb_forward: false,
            crop: None,
            control: true,
            display_id: 0,
            show_touches: false,
            stay_awake: false,
            turn_screen_off: false,
            power_off_on_close: false,
            codec_options: None,
            encoder_name: None,
        }
    }
}

impl LiveConfig {
    /// Positional arguments for the device server, after its version.
    pub fn server_args(&self) -> Vec<String> {
        fn opt(v: &Option<String>) -> String {
            v.clone().unwrap_or_else(|| "-".into())
        }
        vec![
            self.log_level.clone(),
            self.max_size.to_string(),
            self.bit_rate.to_string(),
            self.max_fps.to_string(),
            self.lock_video_orientation.to_string(),
            self.force_adb_forward.to_string(),
            opt(&self.crop),
            // frame meta is always requested
            "true".into(),
            self.control.to_string(),
            self.display_id.to_string(),
            self.show_touches.to_string(),
            self.stay_awake.to_string(),
            opt(&self.codec_options),
            opt(&self.encoder_name),
            self.power_off_on_close.to_string(),
        ]
    }
}

// ── CaptureProcess ───────────────────────────────────────────────

/// The external live capture pipeline.
///
/// Implementations own the device connection and the decode thread, and
/// call the registered [`FrameSink`]s from that thread.
pub trait CaptureProcess: Send {
    /// Bring the pipeline up and report the device's native frame size.
    fn start(&mut self, config: &LiveConfig) -> Result<AndroidSize, StartError>;

    /// The current frame size (changes on rotation).
    fn frame_size(&self) -> Option<AndroidSize>;

    /// Attach a frame consumer.
    fn add_sink(&mut self, sink: Box<dyn FrameSink>);

    /// Take the write half of the control socket, if control is enabled.
    fn control_transport(&mut self) -> Option<ControlTransport>;

    /// Take the read half of the control socket, if control is enabled.
    ///
    /// The session reads it on a thread of its own; attach a shutdown hook
    /// (see [`DeviceTransport::from_tcp`]) so that stop can interrupt it.
    fn device_transport(&mut self) -> Option<DeviceTransport>;

    /// Tear the pipeline down. Must not return while a sink call is running.
    /// Transports already taken are shut down by the session itself.
    fn stop(&mut self);
}

// ── FanOutSink ───────────────────────────────────────────────────

/// Forwards pipeline frames to a [`FanOut`] until the capture is stopped.
struct FanOutSink {
    fanout: Arc<FanOut>,
    stopped: Arc<Latch>,
}

impl FrameSink for FanOutSink {
    fn push(&mut self, frame: &Frame) -> bool {
        if self.stopped.is_set() {
            return false;
        }
        self.fanout.on_frame(frame);
        true
    }

    fn close(&mut self) {
        tracing::debug!("live stream closed");
    }
}

// ── LiveCapture ──────────────────────────────────────────────────

/// A [`CaptureProcess`] plus the configuration to start it with.
pub struct LiveCapture {
    process: Box<dyn CaptureProcess>,
    config: LiveConfig,
    stopped: Arc<Latch>,
    started: bool,
}

impl LiveCapture {
    pub fn new(process: Box<dyn CaptureProcess>, config: LiveConfig) -> Self {
        Self {
            process,
            config,
            stopped: Arc::new(Latch::new()),
            started: false,
        }
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub(crate) fn start(&mut self, fanout: Arc<FanOut>) -> Result<FrameSize, StartError> {
        if self.started || self.stopped.is_set() {
            return Err(StartError::AlreadyStarted);
        }
        let size = self.process.start(&self.config)?;
        if size.is_empty() {
            self.process.stop();
            return Err(StartError::EmptyFrameSize);
        }
        self.process.add_sink(Box::new(FanOutSink {
            fanout,
            stopped: Arc::clone(&self.stopped),
        }));
        self.started = true;
        tracing::info!(%size, serial = ?self.config.serial, "live capture started");
        Ok(size)
    }

    pub(crate) fn stop(&mut self) {
        self.stopped.set();
        if std::mem::take(&mut self.started) {
            self.process.stop();
            tracing::info!("live capture stopped");
        }
    }

    pub(crate) fn frame_size(&self) -> Option<FrameSize> {
        if !self.started {
            return None;
        }
        self.process.frame_size()
    }

    pub(crate) fn control_transport(&mut self) -> Option<ControlTransport> {
        if !self.config.control {
            return None;
        }
        self.process.control_transport()
    }

    pub(crate) fn device_transport(&mut self) -> Option<DeviceTransport> {
        if !self.config.control {
            return None;
        }
        self.process.device_transport()
    }

    pub(crate) fn wait_stopped(&self, timeout: Duration) -> bool {
        self.stopped.wait_timeout(timeout)
    }
}

impl fmt::Debug for LiveCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveCapture")
            .field("config", &self.config)
            .field("started", &self.started)
            .finish()
    }
}
