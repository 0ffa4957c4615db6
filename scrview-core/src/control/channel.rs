//! The client-to-device control channel.

use std::fmt;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;

use crate::control::message::{Buttons, ControlMessage, MotionAction, TouchEvent};
use crate::coords::Position;
use crate::error::SendError;

/// Write half of the control transport.
pub type ControlTransport = Box<dyn Write + Send + 'static>;

struct ChannelState {
    writer: Option<ControlTransport>,
    buf: BytesMut,
    sent: u64,
}

/// Serializes control messages onto a transport.
///
/// One message is written at a time; concurrent senders queue on the
/// internal mutex, so bytes of two messages never interleave. Failures are
/// returned to the caller and never retried.
pub struct ControlChannel {
    state: Mutex<ChannelState>,
}

impl ControlChannel {
    pub fn new(writer: ControlTransport) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                writer: Some(writer),
                buf: BytesMut::with_capacity(64),
                sent: 0,
            }),
        }
    }

    /// Serialize `msg` and write it out in full.
    pub fn send(&self, msg: &ControlMessage) -> Result<(), SendError> {
        let mut state = self.lock();
        let ChannelState { writer, buf, sent } = &mut *state;
        let writer = writer.as_mut().ok_or(SendError::Closed)?;

        buf.clear();
        msg.serialize(buf)?;
        let result = writer.write_all(buf).and_then(|()| writer.flush());
        if let Err(e) = result {
            tracing::warn!(kind = ?msg.control_type(), "control send failed: {e}");
            return Err(SendError::Io(e));
        }
        *sent += 1;
        Ok(())
    }

    /// Send a single touch event.
    pub fn send_touch(
        &self,
        action: MotionAction,
        pointer_id: u64,
        position: Position,
        pressure: f32,
        buttons: Buttons,
    ) -> Result<(), SendError> {
        self.send(&ControlMessage::InjectTouch(TouchEvent {
            action,
            pointer_id,
            position,
            pressure,
            buttons,
        }))
    }

    /// Messages written successfully so far.
    pub fn sent(&self) -> u64 {
        self.lock().sent
    }

    pub fn is_closed(&self) -> bool {
        self.lock().writer.is_none()
    }

    /// Drop the transport. Later sends fail with [`SendError::Closed`].
    pub fn close(&self) {
        let writer = self.lock().writer.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.flush() {
                tracing::debug!("control transport flush on close failed: {e}");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ControlChannel")
            .field("open", &state.writer.is_some())
            .field("sent", &state.sent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::message::POINTER_ID_MOUSE;
    use crate::coords::Point;
    use crate::frame::FrameSize;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Accepts one byte per call, so an unguarded writer would interleave.
    #[derive(Clone, Default)]
    struct Trickle(Arc<Mutex<Vec<u8>>>);

    impl Write for Trickle {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let Some(&byte) = data.first() else {
                return Ok(0);
            };
            self.0.lock().unwrap().push(byte);
            std::thread::yield_now();
            Ok(1)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "remote gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn position() -> Position {
        Position::new(Point::new(540, 1140), FrameSize::new(1080, 2280))
    }

    #[test]
    fn send_touch_writes_one_message() {
        let out = SharedBuf::default();
        let channel = ControlChannel::new(Box::new(out.clone()));
        channel
            .send_touch(MotionAction::Down, POINTER_ID_MOUSE, position(), 1.0, Buttons::PRIMARY)
            .unwrap();

        let bytes = out.0.lock().unwrap().clone();
        assert_eq!(bytes.len(), 28);
        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[10..14], &540i32.to_be_bytes());
        assert_eq!(&bytes[14..18], &1140i32.to_be_bytes());
        assert_eq!(channel.sent(), 1);
    }

    #[test]
    fn messages_are_written_back_to_back() {
        let out = SharedBuf::default();
        let channel = ControlChannel::new(Box::new(out.clone()));
        channel.send(&ControlMessage::ExpandNotificationPanel).unwrap();
        channel.send(&ControlMessage::CollapsePanels).unwrap();
        assert_eq!(*out.0.lock().unwrap(), vec![5, 7]);
    }

    #[test]
    fn concurrent_senders_never_interleave() {
        const THREADS: u64 = 4;
        const TOUCHES: i32 = 50;

        let out = Trickle::default();
        let channel = Arc::new(ControlChannel::new(Box::new(out.clone())));
        let senders: Vec<_> = (0..THREADS)
            .map(|t| {
                let channel = Arc::clone(&channel);
                std::thread::spawn(move || {
                    for i in 0..TOUCHES {
                        let pos = Position::new(Point::new(i, 0), FrameSize::new(1080, 2280));
                        channel
                            .send_touch(MotionAction::Move, t, pos, 1.0, Buttons::empty())
                            .unwrap();
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.join().unwrap();
        }

        let bytes = out.0.lock().unwrap().clone();
        assert_eq!(bytes.len(), 28 * THREADS as usize * TOUCHES as usize);
        let mut next = vec![0i32; THREADS as usize];
        for record in bytes.chunks_exact(28) {
            assert_eq!(record[0], 2);
            let pointer = u64::from_be_bytes(record[2..10].try_into().unwrap());
            let x = i32::from_be_bytes(record[10..14].try_into().unwrap());
            assert!(pointer < THREADS);
            // each sender's touches stay whole and in order
            assert_eq!(x, next[pointer as usize]);
            next[pointer as usize] += 1;
        }
        assert_eq!(next, vec![TOUCHES; THREADS as usize]);
        assert_eq!(channel.sent(), THREADS * TOUCHES as u64);
    }

    #[test]
    fn io_failure_surfaces() {
        let channel = ControlChannel::new(Box::new(BrokenPipe));
        let err = channel.send(&ControlMessage::RotateDevice);
        assert!(matches!(err, Err(SendError::Io(_))));
        assert_eq!(channel.sent(), 0);
        // still open: the next send is attempted again
        assert!(!channel.is_closed());
    }

    #[test]
    fn send_after_close_fails() {
        let channel = ControlChannel::new(Box::new(SharedBuf::default()));
        channel.close();
        assert!(channel.is_closed());
        assert!(matches!(
            channel.send(&ControlMessage::GetClipboard),
            Err(SendError::Closed)
        ));
        channel.close();
    }
}
