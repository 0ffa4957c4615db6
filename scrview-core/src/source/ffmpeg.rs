//! FFmpeg demux/decode backend for recorded playback.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::codec::video::{VideoDecoder as FfVideoDecoder, VideoFrame};
use ac_ffmpeg::format::demuxer::{Demuxer, DemuxerWithStreamInfo};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase, Timestamp};

use crate::error::{DecodeError, StartError};
use crate::frame::{Frame, FrameSize, PixelFormat, Plane};
use crate::source::playback::{
    AccessUnit, DecoderOutput, PacketReader, StreamInfo, VideoCodec, VideoDecoder,
};

/// Open `path` and build a reader/decoder pair for its only video stream.
pub fn open(path: &Path) -> Result<(Box<dyn PacketReader>, Box<dyn VideoDecoder>), StartError> {
    let file = File::open(path).map_err(|e| StartError::Open(format!("{}: {e}", path.display())))?;
    let io = IO::from_seekable_read_stream(file);
    let demuxer = Demuxer::builder()
        .build(io)
        .map_err(|e| StartError::Open(e.to_string()))?
        .find_stream_info(None)
        .map_err(|(_, e)| StartError::Open(e.to_string()))?;

    let video: Vec<usize> = demuxer
        .streams()
        .iter()
        .enumerate()
        .filter(|(_, s)| s.codec_parameters().is_video_codec())
        .map(|(i, _)| i)
        .collect();
    let stream_index = match video.as_slice() {
        [] => return Err(StartError::NoVideoStream),
        [index] => *index,
        many => return Err(StartError::MultipleVideoStreams(many.len())),
    };

    let stream = &demuxer.streams()[stream_index];
    let params = stream.codec_parameters();
    let codec = VideoCodec::from_name(params.decoder_name().unwrap_or("unknown"));
    let size = params
        .as_video_codec_parameters()
        .map(|p| FrameSize::new(p.width() as u32, p.height() as u32))
        .unwrap_or_default();
    let time_base = stream.time_base();

    let decoder = FfVideoDecoder::from_stream(stream)
        .and_then(|builder| builder.build())
        .map_err(|e| StartError::Open(format!("decoder: {e}")))?;

    tracing::debug!(path = %path.display(), stream_index, %size, codec = codec.name(), "recording opened");

    let reader = FfmpegReader {
        demuxer,
        stream_index,
        info: StreamInfo { codec, size },
    };
    let decoder = FfmpegDecoder {
        decoder,
        time_base,
        sent: 0,
        flushed: false,
        frames: 0,
    };
    Ok((Box::new(reader), Box::new(decoder)))
}

fn to_duration(ts: Timestamp) -> Option<Duration> {
    if ts.is_null() {
        return None;
    }
    let micros = ts.with_time_base(TimeBase::MICROSECONDS).timestamp();
    u64::try_from(micros).ok().map(Duration::from_micros)
}

// ── Reader ───────────────────────────────────────────────────────

struct FfmpegReader {
    demuxer: DemuxerWithStreamInfo<File>,
    stream_index: usize,
    info: StreamInfo,
}

// FFmpeg contexts are only touched from the decode thread.
unsafe impl Send for FfmpegReader {}

impl PacketReader for FfmpegReader {
    fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_unit(&mut self) -> Result<Option<AccessUnit>, DecodeError> {
        loop {
            let packet = self
                .demuxer
                .take()
                .map_err(|e| DecodeError::Demux(e.to_string()))?;
            let Some(packet) = packet else {
                return Ok(None);
            };
            if packet.stream_index() != self.stream_index {
                continue;
            }
            return Ok(Some(AccessUnit {
                data: bytes::Bytes::copy_from_slice(packet.data()),
                pts: to_duration(packet.pts()),
                keyframe: packet.is_key(),
            }));
        }
    }
}

// ── Decoder ──────────────────────────────────────────────────────

struct FfmpegDecoder {
    decoder: FfVideoDecoder,
    time_base: TimeBase,
    sent: u64,
    flushed: bool,
    frames: u64,
}

unsafe impl Send for FfmpegDecoder {}

impl VideoDecoder for FfmpegDecoder {
    fn send(&mut self, unit: Option<&AccessUnit>) -> Result<(), DecodeError> {
        let Some(unit) = unit else {
            self.flushed = true;
            return self
                .decoder
                .flush()
                .map_err(|e| DecodeError::Send {
                    unit: self.sent,
                    reason: format!("flush: {e}"),
                });
        };

        let mut packet = PacketMut::from(&unit.data[..]);
        if let Some(pts) = unit.pts {
            let ts = Timestamp::from_micros(pts.as_micros() as i64).with_time_base(self.time_base);
            packet = packet.with_pts(ts);
        }
        self.decoder
            .push(packet.freeze())
            .map_err(|e| DecodeError::Send {
                unit: self.sent,
                reason: e.to_string(),
            })?;
        self.sent += 1;
        Ok(())
    }

    fn receive(&mut self) -> Result<DecoderOutput, DecodeError> {
        match self.decoder.take() {
            Ok(Some(frame)) => {
                let index = self.frames;
                self.frames += 1;
                convert(&frame, index).map(DecoderOutput::Frame)
            }
            Ok(None) if self.flushed => Ok(DecoderOutput::EndOfStream),
            Ok(None) => Ok(DecoderOutput::NeedInput),
            Err(e) => Err(DecodeError::Receive(e.to_string())),
        }
    }
}

/// Copy an FFmpeg picture into an owned [`Frame`], dropping stride padding.
fn convert(frame: &VideoFrame, index: u64) -> Result<Frame, DecodeError> {
    let name = frame.pixel_format().name();
    let format = PixelFormat::from_ffmpeg_name(name)
        .ok_or_else(|| DecodeError::InvalidFrame(format!("unsupported pixel format {name}")))?;
    let size = FrameSize::new(frame.width() as u32, frame.height() as u32);

    let src = frame.planes();
    let mut planes = Vec::with_capacity(format.plane_count());
    for i in 0..format.plane_count() {
        let (row_bytes, rows) = format.plane_extent(i, size);
        let plane = &src[i];
        planes.push(Plane::copy_from(plane.data(), plane.line_size(), row_bytes, rows));
    }

    Ok(Frame::new(planes, size, format, index)?.with_pts(to_duration(frame.pts())))
}
