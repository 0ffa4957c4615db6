//! # scrview-core
//!
//! Core of a screen-mirroring client.
//!
//! A [`Session`] owns one [`FrameSource`]: either a live capture pipeline
//! attached to a remote device, or a recording decoded on a dedicated
//! thread. Every decoded [`Frame`] is handed to a [`FanOut`], which
//! resamples it to each registered viewer's size in a fixed B-G-R display
//! format. Pointer input from a viewer is mapped back to device space and
//! sent over the binary control protocol.
//!
//! Modules:
//! - **frame**: `Frame`, `FrameSize`, pixel formats
//! - **resample**: per-viewer scaling and colour conversion
//! - **fanout**: viewer registration and frame delivery
//! - **coords**: viewer-to-device coordinate mapping
//! - **control**: control wire protocol, channel, device messages
//! - **source**: `FrameSource`, live capture, recorded playback
//! - **session**: lifecycle state machine tying it together
//! - **error**: `thiserror`-based error types per concern

pub mod control;
pub mod coords;
pub mod error;
pub mod fanout;
pub mod frame;
pub mod resample;
pub mod session;
pub mod source;

// ── Re-exports ───────────────────────────────────────────────────

pub use control::{
    Buttons, ControlChannel, ControlMessage, DeviceMessage, EventLog, MotionAction,
    POINTER_ID_MOUSE, TouchEvent,
};
pub use coords::{Point, Position, to_device_space};
pub use error::{
    CoordinateError, DecodeError, ProtocolError, RegisterError, ResampleError, ScrviewError,
    SendError, StartError,
};
pub use fanout::{FanOut, FanOutStats, SinkHandle};
pub use frame::{AndroidSize, Frame, FrameSize, PixelFormat, Plane};
pub use resample::{DisplayImage, Resampler};
pub use session::{Session, SessionPhase};
pub use source::{
    AccessUnit, CaptureProcess, DecoderOutput, DeviceTransport, FrameSink, FrameSource,
    LiveCapture, LiveConfig, PacketReader, PlaybackConfig, PlaybackOutcome, RecordedPlayback, StreamInfo, VideoCodec,
    VideoDecoder,
};
