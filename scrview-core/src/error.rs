//! Domain-specific error types for a mirroring session.
//!
//! Each concern has its own enum so callers can tell a fatal start failure
//! from a per-viewer resample hiccup. [`ScrviewError`] wraps them all for
//! code that only needs to propagate.

use thiserror::Error;

// ── StartError ───────────────────────────────────────────────────

/// Failure to bring a frame source up. The session stays `Created` and
/// `start()` may be retried.
#[derive(Debug, Error)]
pub enum StartError {
    /// The remote capture process could not be reached or initialised.
    #[error("capture process unavailable: {0}")]
    ProcessUnavailable(String),

    /// The recording's video stream is not encoded with the expected codec.
    #[error("unsupported codec: {found} (expected {expected})")]
    UnsupportedCodec {
        expected: &'static str,
        found: String,
    },

    /// The container holds no video stream.
    #[error("no video stream found")]
    NoVideoStream,

    /// The container holds more than one video stream.
    #[error("expected exactly one video stream, found {0}")]
    MultipleVideoStreams(usize),

    /// The container or decoder could not be opened.
    #[error("cannot open recording: {0}")]
    Open(String),

    /// The source reported a zero frame size.
    #[error("source reported an empty frame size")]
    EmptyFrameSize,

    /// The source was already started, or already consumed by a previous run.
    #[error("frame source already started")]
    AlreadyStarted,

    /// The decode thread could not be spawned.
    #[error("cannot spawn decode thread: {0}")]
    Spawn(#[from] std::io::Error),
}

// ── DecodeError ──────────────────────────────────────────────────

/// Failure inside the recorded-playback decode loop. Fatal to the session:
/// the loop exits and the source cannot be restarted.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// Reading the next access unit from the container failed.
    #[error("demux failed: {0}")]
    Demux(String),

    /// The decoder rejected an access unit.
    #[error("decoder rejected access unit {unit}: {reason}")]
    Send { unit: u64, reason: String },

    /// The decoder failed while producing a frame.
    #[error("decoder failed to produce a frame: {0}")]
    Receive(String),

    /// A decoded picture could not be turned into a [`Frame`](crate::Frame).
    #[error("invalid decoded frame: {0}")]
    InvalidFrame(String),
}

// ── ResampleError ────────────────────────────────────────────────

/// Per-sink failure to resample a frame. Logged and counted; only that
/// frame is skipped, and only for that sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResampleError {
    /// The target size has a zero dimension.
    #[error("empty target size {width}x{height}")]
    EmptyTarget { width: u32, height: u32 },

    /// The source frame has a zero dimension.
    #[error("empty source frame")]
    EmptySource,

    /// The source frame's plane layout does not match its format.
    #[error("plane {plane} too short: {actual} < {expected} bytes")]
    PlaneTooShort {
        plane: usize,
        expected: usize,
        actual: usize,
    },

    /// The frame carries fewer planes than its format needs.
    #[error("missing plane {0}")]
    MissingPlane(usize),
}

// ── RegisterError ────────────────────────────────────────────────

/// Failure to register a viewer with a [`FanOut`](crate::FanOut).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// The source frame size is not known yet.
    #[error("frame source not started: frame size unknown")]
    NotStarted,

    /// The requested target size has a zero dimension.
    #[error("empty target size {width}x{height}")]
    EmptyTarget { width: u32, height: u32 },

    /// The session was stopped; no new viewers are accepted.
    #[error("session stopped")]
    Stopped,
}

// ── CoordinateError ──────────────────────────────────────────────

/// Precondition violation when mapping viewer coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinateError {
    /// The viewer size has a zero dimension.
    #[error("viewer size {width}x{height} has a zero dimension")]
    EmptyViewer { width: u32, height: u32 },
}

// ── SendError ────────────────────────────────────────────────────

/// Failure to transmit a control message. Surfaced to the caller, never
/// retried, never fatal to the session.
#[derive(Debug, Error)]
pub enum SendError {
    /// The transport write failed (the remote may have disconnected).
    #[error("control transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel was closed by session stop.
    #[error("control channel closed")]
    Closed,

    /// The session has no control channel (not started, or control disabled).
    #[error("control is not enabled for this session")]
    ControlDisabled,

    /// The message is not representable on the wire.
    #[error("cannot encode control message: {0}")]
    Encoding(&'static str),
}

// ── ProtocolError ────────────────────────────────────────────────

/// Malformed device-to-client message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A message type byte did not map to any known message.
    #[error("unknown device message type: {0}")]
    UnknownType(u8),

    /// The announced payload can never fit in a message.
    #[error("device message too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    /// Text payload was not valid UTF-8.
    #[error("invalid utf-8 in device message")]
    InvalidUtf8,
}

// ── ScrviewError ─────────────────────────────────────────────────

/// The umbrella error for session-level operations.
#[derive(Debug, Error)]
pub enum ScrviewError {
    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error(transparent)]
    Coordinate(#[from] CoordinateError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The source frame size is not known yet.
    #[error("session not started: frame size unknown")]
    NotStarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = StartError::UnsupportedCodec {
            expected: "h264",
            found: "vp9".into(),
        };
        assert!(e.to_string().contains("vp9"));
        assert!(e.to_string().contains("h264"));

        let e = ResampleError::PlaneTooShort {
            plane: 1,
            expected: 100,
            actual: 10,
        };
        assert!(e.to_string().contains("100"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: SendError = io_err.into();
        assert!(matches!(e, SendError::Io(_)));

        let e: ScrviewError = e.into();
        assert!(matches!(e, ScrviewError::Send(SendError::Io(_))));
    }

    #[test]
    fn start_error_is_transparent() {
        let e: ScrviewError = StartError::NoVideoStream.into();
        assert_eq!(e.to_string(), "no video stream found");
    }
}
