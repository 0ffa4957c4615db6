//! In-process fakes for the external collaborators of a session.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use scrview_core::control::ControlTransport;
use scrview_core::source::DeviceTransport;
use scrview_core::{
    AccessUnit, AndroidSize, CaptureProcess, DecodeError, DecoderOutput, Frame, FrameSink,
    FrameSize, LiveConfig, PacketReader, PixelFormat, Plane, StartError, StreamInfo, VideoCodec,
    VideoDecoder,
};

// ── Frames ───────────────────────────────────────────────────────

/// A flat YUV 4:2:0 frame with luma `y` and neutral chroma.
pub fn yuv_frame(size: FrameSize, y: u8, index: u64) -> Frame {
    let (w, h) = (size.width as usize, size.height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    Frame::new(
        vec![
            Plane::new(vec![y; w * h], w),
            Plane::new(vec![128; cw * ch], cw),
            Plane::new(vec![128; cw * ch], cw),
        ],
        size,
        PixelFormat::Yuv420p,
        index,
    )
    .unwrap()
}

// ── Recorded playback ────────────────────────────────────────────

pub fn h264(size: FrameSize) -> StreamInfo {
    StreamInfo {
        codec: VideoCodec::H264,
        size,
    }
}

/// Serves a fixed list of access units, or an endless stream.
pub struct FakeReader {
    pub info: StreamInfo,
    pub units: VecDeque<AccessUnit>,
    pub endless: bool,
    pub delay: Duration,
    pub fail_after: Option<usize>,
    read: usize,
}

impl FakeReader {
    pub fn new(info: StreamInfo, count: usize) -> Self {
        let units = (0..count)
            .map(|i| AccessUnit {
                data: Bytes::from(vec![i as u8; 16]),
                pts: Some(Duration::from_millis(i as u64 * 33)),
                keyframe: i == 0,
            })
            .collect();
        Self {
            info,
            units,
            endless: false,
            delay: Duration::ZERO,
            fail_after: None,
            read: 0,
        }
    }

    pub fn endless(info: StreamInfo, delay: Duration) -> Self {
        Self {
            endless: true,
            delay,
            ..Self::new(info, 0)
        }
    }
}

impl PacketReader for FakeReader {
    fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_unit(&mut self) -> Result<Option<AccessUnit>, DecodeError> {
        if self.fail_after == Some(self.read) {
            return Err(DecodeError::Demux("truncated container".into()));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.read += 1;
        if self.endless {
            return Ok(Some(AccessUnit {
                data: Bytes::from_static(&[0, 0, 0, 1]),
                pts: None,
                keyframe: false,
            }));
        }
        Ok(self.units.pop_front())
    }
}

/// Turns every access unit into one frame, holding `lag` frames back
/// until more input or a flush arrives.
pub struct FakeDecoder {
    pub size: FrameSize,
    pub lag: usize,
    pub fail_on_unit: Option<u64>,
    pending: VecDeque<Frame>,
    sent: u64,
    flushed: bool,
}

impl FakeDecoder {
    pub fn new(size: FrameSize, lag: usize) -> Self {
        Self {
            size,
            lag,
            fail_on_unit: None,
            pending: VecDeque::new(),
            sent: 0,
            flushed: false,
        }
    }
}

impl VideoDecoder for FakeDecoder {
    fn send(&mut self, unit: Option<&AccessUnit>) -> Result<(), DecodeError> {
        let Some(unit) = unit else {
            self.flushed = true;
            return Ok(());
        };
        if self.fail_on_unit == Some(self.sent) {
            return Err(DecodeError::Send {
                unit: self.sent,
                reason: "corrupt slice".into(),
            });
        }
        let luma = if self.sent % 2 == 0 { 16 } else { 235 };
        let frame = yuv_frame(self.size, luma, self.sent);
        self.pending.push_back(frame.with_pts(unit.pts));
        self.sent += 1;
        Ok(())
    }

    fn receive(&mut self) -> Result<DecoderOutput, DecodeError> {
        if self.flushed {
            return Ok(match self.pending.pop_front() {
                Some(frame) => DecoderOutput::Frame(frame),
                None => DecoderOutput::EndOfStream,
            });
        }
        if self.pending.len() > self.lag {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(DecoderOutput::Frame(frame));
            }
        }
        Ok(DecoderOutput::NeedInput)
    }
}

// ── Live capture ─────────────────────────────────────────────────

/// Captures everything written to it.
#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// State shared between a [`FakeProcess`] and the test driving it.
#[derive(Default)]
pub struct ProcessState {
    pub sinks: Vec<Box<dyn FrameSink>>,
    pub size: Option<AndroidSize>,
    pub started: bool,
    pub stopped: bool,
    pub failures_left: u32,
    pub config: Option<LiveConfig>,
}

/// A capture pipeline driven by hand from the test.
pub struct FakeProcess {
    pub state: Arc<Mutex<ProcessState>>,
    pub native: AndroidSize,
    pub control: Option<SharedBuf>,
    pub device: Option<DeviceTransport>,
}

impl FakeProcess {
    pub fn new(native: AndroidSize) -> (Self, Arc<Mutex<ProcessState>>) {
        let state = Arc::new(Mutex::new(ProcessState::default()));
        let process = Self {
            state: Arc::clone(&state),
            native,
            control: None,
            device: None,
        };
        (process, state)
    }
}

impl CaptureProcess for FakeProcess {
    fn start(&mut self, config: &LiveConfig) -> Result<AndroidSize, StartError> {
        let mut state = self.state.lock().unwrap();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(StartError::ProcessUnavailable("adb: device offline".into()));
        }
        state.started = true;
        state.size = Some(self.native);
        state.config = Some(config.clone());
        Ok(self.native)
    }

    fn frame_size(&self) -> Option<AndroidSize> {
        self.state.lock().unwrap().size
    }

    fn add_sink(&mut self, mut sink: Box<dyn FrameSink>) {
        assert!(sink.open());
        self.state.lock().unwrap().sinks.push(sink);
    }

    fn control_transport(&mut self) -> Option<ControlTransport> {
        self.control
            .take()
            .map(|buf| Box::new(buf) as ControlTransport)
    }

    fn device_transport(&mut self) -> Option<DeviceTransport> {
        self.device.take()
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        for sink in state.sinks.iter_mut() {
            sink.close();
        }
        state.sinks.clear();
        state.stopped = true;
    }
}

/// Push `frame` to every sink, as the pipeline's decode thread would.
/// Returns how many sinks asked to keep going.
pub fn pump(state: &Arc<Mutex<ProcessState>>, frame: &Frame) -> usize {
    let mut state = state.lock().unwrap();
    state.size = Some(frame.size());
    state
        .sinks
        .iter_mut()
        .map(|s| s.push(frame))
        .filter(|keep| *keep)
        .count()
}
