//! Recorded playback: demux and decode a recording on a dedicated thread.
//!
//! ## Decode loop
//!
//! ```text
//! loop {
//!     unit = reader.next_unit()          // None at end of container
//!     decoder.send(unit)                 // None = flush
//!     while let Frame(f) = decoder.receive() {
//!         fanout.on_frame(f)
//!     }                                  // NeedInput / EndOfStream end the drain
//!     if unit was None { break }
//! }
//! ```
//!
//! Stop is observed before every read and before every delivery, and
//! interrupts real-time pacing waits. The reader and decoder are owned by
//! the decode thread and dropped when it exits, whatever the exit path.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::control::{ControlTransport, EventLog};
use crate::error::{DecodeError, StartError};
use crate::fanout::FanOut;
use crate::frame::{Frame, FrameSize};
use crate::source::Latch;

// ── Stream description ───────────────────────────────────────────

/// Codec of a recording's video stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    Other(String),
}

impl VideoCodec {
    pub fn name(&self) -> &str {
        match self {
            Self::H264 => "h264",
            Self::Other(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "h264" => Self::H264,
            other => Self::Other(other.to_string()),
        }
    }
}

/// The single video stream of a recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub codec: VideoCodec,
    pub size: FrameSize,
}

/// One compressed frame as stored in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub data: Bytes,
    pub pts: Option<Duration>,
    pub keyframe: bool,
}

/// Result of asking a decoder for output.
#[derive(Debug)]
pub enum DecoderOutput {
    Frame(Frame),
    /// Nothing buffered; feed more input.
    NeedInput,
    /// Fully drained after a flush.
    EndOfStream,
}

// ── Backend traits ───────────────────────────────────────────────

/// Container demuxer yielding access units of the one video stream.
pub trait PacketReader: Send {
    fn stream_info(&self) -> &StreamInfo;

    /// The next access unit, or `None` once the container is exhausted.
    fn next_unit(&mut self) -> Result<Option<AccessUnit>, DecodeError>;
}

/// Video decoder with a send/receive interface.
pub trait VideoDecoder: Send {
    /// Submit one access unit. `None` flushes the decoder.
    fn send(&mut self, unit: Option<&AccessUnit>) -> Result<(), DecodeError>;

    fn receive(&mut self) -> Result<DecoderOutput, DecodeError>;
}

// ── PlaybackConfig ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Pace delivery by presentation timestamp instead of decoding flat out.
    pub realtime: bool,
    /// Record control messages sent during playback into an [`EventLog`].
    pub record_events: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            realtime: false,
            record_events: true,
        }
    }
}

// ── PlaybackOutcome ──────────────────────────────────────────────

/// How the decode loop ended.
#[derive(Debug, Clone)]
pub enum PlaybackOutcome {
    /// The whole recording was decoded and delivered.
    Finished { frames: u64 },
    /// Stop was requested before the end.
    Stopped { frames: u64 },
    /// Decoding failed. The source cannot be restarted.
    Failed { frames: u64, error: DecodeError },
}

impl PlaybackOutcome {
    pub fn frames(&self) -> u64 {
        match self {
            Self::Finished { frames } | Self::Stopped { frames } | Self::Failed { frames, .. } => {
                *frames
            }
        }
    }

    pub fn error(&self) -> Option<&DecodeError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

// ── RecordedPlayback ─────────────────────────────────────────────

enum Input {
    Path(PathBuf),
    Opened {
        reader: Box<dyn PacketReader>,
        decoder: Box<dyn VideoDecoder>,
    },
    Consumed,
}

/// Frame source decoding a recording file.
pub struct RecordedPlayback {
    input: Input,
    config: PlaybackConfig,
    info: Option<StreamInfo>,
    stop: Arc<Latch>,
    finished: Arc<Latch>,
    outcome: Arc<Mutex<Option<PlaybackOutcome>>>,
    thread: Option<JoinHandle<()>>,
    event_log: Option<EventLog>,
    control_taken: bool,
}

impl RecordedPlayback {
    /// Play the recording at `path`. The file is opened by `start`.
    pub fn open(path: impl Into<PathBuf>, config: PlaybackConfig) -> Self {
        Self::with_input(Input::Path(path.into()), config)
    }

    /// Play from an already opened demuxer and decoder.
    pub fn from_parts(
        reader: Box<dyn PacketReader>,
        decoder: Box<dyn VideoDecoder>,
        config: PlaybackConfig,
    ) -> Self {
        Self::with_input(Input::Opened { reader, decoder }, config)
    }

    fn with_input(input: Input, config: PlaybackConfig) -> Self {
        let event_log = config.record_events.then(EventLog::new);
        Self {
            input,
            config,
            info: None,
            stop: Arc::new(Latch::new()),
            finished: Arc::new(Latch::new()),
            outcome: Arc::new(Mutex::new(None)),
            thread: None,
            event_log,
            control_taken: false,
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// The validated stream description, once started.
    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.info.as_ref()
    }

    /// Open the recording now and validate its video stream.
    ///
    /// Makes the stream size known before `start`. A failure leaves the
    /// playback as it was, so `prepare` or `start` may be tried again.
    pub fn prepare(&mut self) -> Result<&StreamInfo, StartError> {
        if let Input::Path(path) = &self.input {
            let (reader, decoder) = open_backend(path)?;
            self.input = Input::Opened { reader, decoder };
        }
        match &self.input {
            Input::Opened { reader, .. } => {
                let info = reader.stream_info();
                validate(info)?;
                Ok(info)
            }
            Input::Path(_) | Input::Consumed => match &self.info {
                Some(info) => Ok(info),
                None => Err(StartError::AlreadyStarted),
            },
        }
    }

    pub(crate) fn start(&mut self, fanout: Arc<FanOut>) -> Result<FrameSize, StartError> {
        self.prepare()?;
        let (reader, decoder) = match std::mem::replace(&mut self.input, Input::Consumed) {
            Input::Opened { reader, decoder } => (reader, decoder),
            other => {
                self.input = other;
                return Err(StartError::AlreadyStarted);
            }
        };
        let info = reader.stream_info().clone();

        let job = DecodeJob {
            reader,
            decoder,
            fanout,
            stop: Arc::clone(&self.stop),
            realtime: self.config.realtime,
            frames: 0,
        };
        let finished = Arc::clone(&self.finished);
        let outcome = Arc::clone(&self.outcome);
        let thread = std::thread::Builder::new()
            .name("playback-decode".into())
            .spawn(move || {
                let started = Instant::now();
                let result = job.run();
                log_outcome(&result, started.elapsed());
                *lock(&outcome) = Some(result);
                finished.set();
            })?;

        tracing::info!(size = %info.size, codec = info.codec.name(), "playback started");
        self.info = Some(info.clone());
        self.thread = Some(thread);
        Ok(info.size)
    }

    pub(crate) fn stop(&mut self) {
        self.stop.set();
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == std::thread::current().id() {
            // Called from a sink callback; the loop exits on its own.
            tracing::warn!("playback stopped from its own decode thread; not joining");
            return;
        }
        if thread.join().is_err() {
            tracing::warn!("playback decode thread panicked");
        }
        tracing::debug!("playback decode thread joined");
    }

    /// The declared stream size, known once the recording is open.
    pub(crate) fn frame_size(&self) -> Option<FrameSize> {
        let info = match (&self.info, &self.input) {
            (Some(info), _) => info,
            (None, Input::Opened { reader, .. }) => reader.stream_info(),
            _ => return None,
        };
        Some(info.size).filter(|size| !size.is_empty())
    }

    /// The event log doubles as the control transport, handed out once.
    pub(crate) fn control_transport(&mut self) -> Option<ControlTransport> {
        if self.control_taken {
            return None;
        }
        let log = self.event_log.clone()?;
        self.control_taken = true;
        Some(Box::new(log))
    }

    pub(crate) fn wait_finished(&self, timeout: Duration) -> bool {
        if self.thread.is_none() && !self.finished.is_set() {
            return false;
        }
        self.finished.wait_timeout(timeout)
    }

    pub(crate) fn outcome(&self) -> Option<PlaybackOutcome> {
        lock(&self.outcome).clone()
    }

    pub(crate) fn event_log(&self) -> Option<&EventLog> {
        self.event_log.as_ref()
    }
}

impl Drop for RecordedPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for RecordedPlayback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordedPlayback")
            .field("config", &self.config)
            .field("info", &self.info)
            .field("running", &self.thread.is_some())
            .field("outcome", &self.outcome())
            .finish()
    }
}

fn validate(info: &StreamInfo) -> Result<(), StartError> {
    if info.codec != VideoCodec::H264 {
        return Err(StartError::UnsupportedCodec {
            expected: "h264",
            found: info.codec.name().to_string(),
        });
    }
    if info.size.is_empty() {
        return Err(StartError::EmptyFrameSize);
    }
    Ok(())
}

#[cfg(feature = "ffmpeg")]
fn open_backend(
    path: &std::path::Path,
) -> Result<(Box<dyn PacketReader>, Box<dyn VideoDecoder>), StartError> {
    crate::source::ffmpeg::open(path)
}

#[cfg(not(feature = "ffmpeg"))]
fn open_backend(
    path: &std::path::Path,
) -> Result<(Box<dyn PacketReader>, Box<dyn VideoDecoder>), StartError> {
    Err(StartError::Open(format!(
        "{}: built without the `ffmpeg` feature",
        path.display()
    )))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn log_outcome(outcome: &PlaybackOutcome, elapsed: Duration) {
    let elapsed_ms = elapsed.as_millis() as u64;
    match outcome {
        PlaybackOutcome::Finished { frames } => {
            tracing::info!(frames, elapsed_ms, "playback finished");
        }
        PlaybackOutcome::Stopped { frames } => {
            tracing::info!(frames, elapsed_ms, "playback stopped");
        }
        PlaybackOutcome::Failed { frames, error } => {
            tracing::error!(frames, elapsed_ms, "playback failed: {error}");
        }
    }
}

// ── Decode loop ──────────────────────────────────────────────────

enum Drain {
    NeedInput,
    EndOfStream,
    Stopped,
}

struct DecodeJob {
    reader: Box<dyn PacketReader>,
    decoder: Box<dyn VideoDecoder>,
    fanout: Arc<FanOut>,
    stop: Arc<Latch>,
    realtime: bool,
    frames: u64,
}

impl DecodeJob {
    fn run(mut self) -> PlaybackOutcome {
        match self.decode_all() {
            Ok(true) => PlaybackOutcome::Finished {
                frames: self.frames,
            },
            Ok(false) => PlaybackOutcome::Stopped {
                frames: self.frames,
            },
            Err(error) => PlaybackOutcome::Failed {
                frames: self.frames,
                error,
            },
        }
    }

    /// `Ok(true)` at end of stream, `Ok(false)` when stopped.
    fn decode_all(&mut self) -> Result<bool, DecodeError> {
        let mut pacer = Pacer::new(self.realtime);
        loop {
            if self.stop.is_set() {
                return Ok(false);
            }
            let unit = self.reader.next_unit()?;
            let flushing = unit.is_none();
            self.decoder.send(unit.as_ref())?;

            match self.drain(&mut pacer)? {
                Drain::Stopped => return Ok(false),
                Drain::EndOfStream => return Ok(true),
                Drain::NeedInput if flushing => return Ok(true),
                Drain::NeedInput => {}
            }
        }
    }

    fn drain(&mut self, pacer: &mut Pacer) -> Result<Drain, DecodeError> {
        loop {
            match self.decoder.receive()? {
                DecoderOutput::Frame(frame) => {
                    if !pacer.wait(frame.pts(), &self.stop) {
                        return Ok(Drain::Stopped);
                    }
                    self.fanout.on_frame(&frame);
                    self.frames += 1;
                }
                DecoderOutput::NeedInput => return Ok(Drain::NeedInput),
                DecoderOutput::EndOfStream => return Ok(Drain::EndOfStream),
            }
        }
    }
}

/// Holds frames back until their presentation time, relative to the first.
struct Pacer {
    realtime: bool,
    origin: Option<(Instant, Duration)>,
}

impl Pacer {
    fn new(realtime: bool) -> Self {
        Self {
            realtime,
            origin: None,
        }
    }

    /// Returns `false` if stop was requested instead.
    fn wait(&mut self, pts: Option<Duration>, stop: &Latch) -> bool {
        if stop.is_set() {
            return false;
        }
        let (true, Some(pts)) = (self.realtime, pts) else {
            return true;
        };
        let (start, first) = *self.origin.get_or_insert((Instant::now(), pts));
        let Some(deadline) = start.checked_add(pts.saturating_sub(first)) else {
            return true;
        };
        !stop.wait_until(deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_names() {
        assert_eq!(VideoCodec::from_name("h264"), VideoCodec::H264);
        assert_eq!(VideoCodec::from_name("vp9").name(), "vp9");
    }

    #[test]
    fn non_h264_is_rejected() {
        let info = StreamInfo {
            codec: VideoCodec::Other("hevc".into()),
            size: FrameSize::new(1280, 720),
        };
        assert!(matches!(
            validate(&info),
            Err(StartError::UnsupportedCodec { found, .. }) if found == "hevc"
        ));
    }

    #[test]
    fn pacer_passes_through_when_not_realtime() {
        let stop = Latch::new();
        let mut pacer = Pacer::new(false);
        let begin = Instant::now();
        assert!(pacer.wait(Some(Duration::from_secs(60)), &stop));
        assert!(begin.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn pacer_is_interrupted_by_stop() {
        let stop = Arc::new(Latch::new());
        let mut pacer = Pacer::new(true);
        assert!(pacer.wait(Some(Duration::ZERO), &stop));

        let setter = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                stop.set();
            })
        };
        let begin = Instant::now();
        assert!(!pacer.wait(Some(Duration::from_secs(60)), &stop));
        assert!(begin.elapsed() < Duration::from_secs(30));
        setter.join().unwrap();
    }

    struct Empty(StreamInfo);

    impl PacketReader for Empty {
        fn stream_info(&self) -> &StreamInfo {
            &self.0
        }

        fn next_unit(&mut self) -> Result<Option<AccessUnit>, DecodeError> {
            Ok(None)
        }
    }

    struct Drained;

    impl VideoDecoder for Drained {
        fn send(&mut self, _: Option<&AccessUnit>) -> Result<(), DecodeError> {
            Ok(())
        }

        fn receive(&mut self) -> Result<DecoderOutput, DecodeError> {
            Ok(DecoderOutput::EndOfStream)
        }
    }

    fn playback(codec: VideoCodec, size: FrameSize) -> RecordedPlayback {
        RecordedPlayback::from_parts(
            Box::new(Empty(StreamInfo { codec, size })),
            Box::new(Drained),
            PlaybackConfig::default(),
        )
    }

    #[test]
    fn opened_input_reports_size_before_start() {
        let mut playback = playback(VideoCodec::H264, FrameSize::new(1280, 720));
        assert_eq!(playback.frame_size(), Some(FrameSize::new(1280, 720)));
        assert_eq!(playback.prepare().unwrap().size, FrameSize::new(1280, 720));
        assert!(playback.stream_info().is_none());
    }

    #[test]
    fn failed_prepare_keeps_input() {
        let mut playback = playback(VideoCodec::Other("hevc".into()), FrameSize::new(8, 8));
        for _ in 0..2 {
            assert!(matches!(
                playback.prepare(),
                Err(StartError::UnsupportedCodec { .. })
            ));
        }
        assert_eq!(playback.frame_size(), Some(FrameSize::new(8, 8)));
    }

    #[test]
    fn empty_declared_size_is_unknown() {
        let playback = playback(VideoCodec::H264, FrameSize::new(0, 720));
        assert_eq!(playback.frame_size(), None);
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn open_without_backend_fails_and_stays_retryable() {
        use crate::frame::FrameSizeCell;

        let fanout = Arc::new(FanOut::new(Arc::new(FrameSizeCell::default())));
        let mut playback = RecordedPlayback::open("missing.mp4", PlaybackConfig::default());
        assert!(matches!(
            playback.start(Arc::clone(&fanout)),
            Err(StartError::Open(_))
        ));
        assert!(matches!(playback.start(fanout), Err(StartError::Open(_))));
        assert!(matches!(playback.prepare(), Err(StartError::Open(_))));
        assert_eq!(playback.frame_size(), None);
    }
}
