//! Plays a recording through a session and reports what the viewers got.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use scrview_core::{
    DecodeError, DisplayImage, FanOutStats, PlaybackOutcome, RecordedPlayback, RegisterError,
    Session, StartError,
};

use crate::config::PlayerConfig;

/// How often the stop flag is polled while the recording plays.
const POLL: Duration = Duration::from_millis(100);

// ── PlayerError ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("cannot start playback: {0}")]
    Start(#[from] StartError),

    #[error("cannot register viewer: {0}")]
    Register(#[from] RegisterError),

    #[error("playback failed after {frames} frames: {error}")]
    Decode { frames: u64, error: DecodeError },

    #[error("cannot write snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ── PlayerReport ─────────────────────────────────────────────────

/// Summary of one playback run.
#[derive(Debug, Clone)]
pub struct PlayerReport {
    pub frames: u64,
    pub interrupted: bool,
    pub stats: FanOutStats,
    pub control_events: usize,
    pub elapsed: Duration,
    pub snapshot: Option<PathBuf>,
}

// ── Player ───────────────────────────────────────────────────────

pub struct Player {
    config: PlayerConfig,
}

impl Player {
    pub fn new(config: PlayerConfig) -> Self {
        Self { config }
    }

    /// Open and play the recording at `path`.
    pub fn run(&self, path: &Path, stop: &AtomicBool) -> Result<PlayerReport, PlayerError> {
        info!("playing {}", path.display());
        let mut playback = RecordedPlayback::open(path, self.config.playback.clone());
        let info = playback.prepare()?;
        info!(size = %info.size, codec = info.codec.name(), "recording opened");
        self.play(playback, stop)
    }

    /// Play until the recording ends or `stop` is raised.
    pub fn play(
        &self,
        playback: RecordedPlayback,
        stop: &AtomicBool,
    ) -> Result<PlayerReport, PlayerError> {
        let started = Instant::now();
        let mut session = Session::recorded(playback);

        let last_image: Arc<Mutex<Option<DisplayImage>>> = Arc::default();
        for (i, viewer) in self.config.viewers.iter().enumerate() {
            let handle = if i == 0 {
                let last = Arc::clone(&last_image);
                session.register_sink(viewer.size(), move |img| {
                    if let Ok(mut slot) = last.lock() {
                        *slot = Some(img.clone());
                    }
                })?
            } else {
                session.register_sink(viewer.size(), |_| {})?
            };
            info!(%handle, size = %viewer.size(), "viewer registered");
        }
        if self.config.viewers.is_empty() {
            warn!("no viewers configured; frames are decoded and dropped");
        }

        let size = session.start()?;
        info!(%size, "playback started");

        let mut interrupted = false;
        while !session.wait_for_source(POLL) {
            if stop.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }
        }
        session.stop();

        let outcome = session.source_outcome();
        if let Some(PlaybackOutcome::Failed { frames, error }) = outcome.clone() {
            return Err(PlayerError::Decode { frames, error });
        }

        let snapshot = if self.config.snapshot.enabled {
            let image = last_image.lock().ok().and_then(|slot| slot.clone());
            match image {
                Some(image) => {
                    let path = self.config.snapshot.path.clone();
                    write_ppm(&path, &image).map_err(|source| PlayerError::Snapshot {
                        path: path.clone(),
                        source,
                    })?;
                    info!("snapshot written to {}", path.display());
                    Some(path)
                }
                None => {
                    warn!("no image delivered; snapshot skipped");
                    None
                }
            }
        } else {
            None
        };

        Ok(PlayerReport {
            frames: outcome.map_or(0, |o| o.frames()),
            interrupted,
            stats: session.stats(),
            control_events: session.event_log().map_or(0, |log| log.len()),
            elapsed: started.elapsed(),
            snapshot,
        })
    }
}

/// Write a binary (P6) PPM. Display images are B-G-R, PPM wants R-G-B.
pub fn write_ppm(path: &Path, image: &DisplayImage) -> std::io::Result<()> {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    write!(out, "P6\n{} {}\n255\n", image.width(), image.height())?;
    let mut rgb = Vec::with_capacity(image.data().len());
    for bgr in image.data().chunks_exact(3) {
        rgb.extend_from_slice(&[bgr[2], bgr[1], bgr[0]]);
    }
    out.write_all(&rgb)?;
    out.flush()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewerConfig;
    use bytes::Bytes;
    use scrview_core::{
        AccessUnit, DecoderOutput, Frame, FrameSize, PacketReader, PixelFormat, PlaybackConfig,
        Plane, StreamInfo, VideoCodec, VideoDecoder,
    };

    /// Serves `remaining` tiny access units.
    struct Units {
        info: StreamInfo,
        remaining: u32,
    }

    impl PacketReader for Units {
        fn stream_info(&self) -> &StreamInfo {
            &self.info
        }

        fn next_unit(&mut self) -> Result<Option<AccessUnit>, DecodeError> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(AccessUnit {
                data: Bytes::from_static(&[0, 0, 0, 1]),
                pts: None,
                keyframe: true,
            }))
        }
    }

    /// Decodes every unit into a solid red RGB frame.
    struct Red {
        size: FrameSize,
        ready: Option<Frame>,
        flushed: bool,
        index: u64,
    }

    impl VideoDecoder for Red {
        fn send(&mut self, unit: Option<&AccessUnit>) -> Result<(), DecodeError> {
            if unit.is_none() {
                self.flushed = true;
                return Ok(());
            }
            let (w, h) = (self.size.width as usize, self.size.height as usize);
            let data = [255u8, 0, 0].repeat(w * h);
            self.ready = Some(Frame::new(
                vec![Plane::new(data, w * 3)],
                self.size,
                PixelFormat::Rgb24,
                self.index,
            )?);
            self.index += 1;
            Ok(())
        }

        fn receive(&mut self) -> Result<DecoderOutput, DecodeError> {
            Ok(match self.ready.take() {
                Some(frame) => DecoderOutput::Frame(frame),
                None if self.flushed => DecoderOutput::EndOfStream,
                None => DecoderOutput::NeedInput,
            })
        }
    }

    fn playback(frames: u32, codec: VideoCodec) -> RecordedPlayback {
        let size = FrameSize::new(8, 4);
        RecordedPlayback::from_parts(
            Box::new(Units {
                info: StreamInfo { codec, size },
                remaining: frames,
            }),
            Box::new(Red {
                size,
                ready: None,
                flushed: false,
                index: 0,
            }),
            PlaybackConfig::default(),
        )
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("scrview-player-{}-{name}", std::process::id()))
    }

    #[test]
    fn plays_to_the_end_and_writes_snapshot() {
        let path = temp_path("snapshot.ppm");
        let mut config = PlayerConfig::default();
        config.viewers = vec![
            ViewerConfig { width: 4, height: 2 },
            ViewerConfig { width: 2, height: 2 },
        ];
        config.snapshot.enabled = true;
        config.snapshot.path = path.clone();

        let report = Player::new(config)
            .play(playback(3, VideoCodec::H264), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(report.frames, 3);
        assert!(!report.interrupted);
        assert_eq!(report.stats.deliveries, 6);
        assert_eq!(report.snapshot.as_deref(), Some(path.as_path()));

        let bytes = std::fs::read(&path).unwrap();
        let header = b"P6\n4 2\n255\n";
        assert_eq!(&bytes[..header.len()], header);
        assert_eq!(&bytes[header.len()..header.len() + 3], &[255, 0, 0]);
        assert_eq!(bytes.len(), header.len() + 4 * 2 * 3);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unsupported_codec_is_a_start_error() {
        let err = Player::new(PlayerConfig::default())
            .play(playback(1, VideoCodec::Other("av1".into())), &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(
            err,
            PlayerError::Start(StartError::UnsupportedCodec { .. })
        ));
    }

    #[test]
    fn empty_viewer_is_rejected() {
        let mut config = PlayerConfig::default();
        config.viewers = vec![ViewerConfig { width: 0, height: 10 }];
        let err = Player::new(config)
            .play(playback(1, VideoCodec::H264), &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err, PlayerError::Register(_)));
    }
}
