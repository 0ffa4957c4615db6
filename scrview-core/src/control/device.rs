//! Device-to-client messages and the thread that receives them.
//!
//! ## Wire format
//!
//! ```text
//! type:   u8   (0 = clipboard)
//! length: u32  (big-endian)
//! text:   [u8] (UTF-8, `length` bytes)
//! ```

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::{Buf, BytesMut};

use crate::error::ProtocolError;
use crate::source::Latch;

/// Upper bound of one device message.
pub const DEVICE_MSG_MAX_SIZE: usize = 1 << 18;

/// Longest clipboard text a device message can carry.
pub const DEVICE_MSG_TEXT_MAX_LENGTH: usize = DEVICE_MSG_MAX_SIZE - 5;

const TYPE_CLIPBOARD: u8 = 0;

/// A message sent by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMessage {
    /// The device clipboard changed.
    Clipboard { text: String },
}

impl DeviceMessage {
    /// Try to parse one message from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not hold a complete message yet;
    /// on success the message bytes are consumed.
    pub fn deserialize(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        // type + length
        if buf.len() < 5 {
            return Ok(None);
        }
        match buf[0] {
            TYPE_CLIPBOARD => {
                let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
                if len > DEVICE_MSG_TEXT_MAX_LENGTH {
                    return Err(ProtocolError::TooLarge {
                        size: len,
                        max: DEVICE_MSG_TEXT_MAX_LENGTH,
                    });
                }
                if buf.len() < 5 + len {
                    return Ok(None);
                }
                buf.advance(5);
                let text = buf.split_to(len);
                let text =
                    String::from_utf8(text.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)?;
                Ok(Some(DeviceMessage::Clipboard { text }))
            }
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

// ── DeviceReceiver ───────────────────────────────────────────────

/// Background reader for device messages.
///
/// The thread exits when the transport reports EOF or an error, or when a
/// malformed message arrives (the stream cannot be resynchronised). The
/// owner makes a blocked read return by shutting the transport down, then
/// waits with [`join_timeout`](Self::join_timeout).
pub struct DeviceReceiver {
    handle: Option<JoinHandle<()>>,
    finished: Arc<Latch>,
}

impl DeviceReceiver {
    /// Spawn the receiver thread.
    pub fn spawn<R, F>(mut transport: R, mut on_message: F) -> std::io::Result<Self>
    where
        R: Read + Send + 'static,
        F: FnMut(DeviceMessage) + Send + 'static,
    {
        let finished = Arc::new(Latch::new());
        let done = Arc::clone(&finished);
        let handle = std::thread::Builder::new()
            .name("device-receiver".into())
            .spawn(move || {
                receive(&mut transport, &mut on_message);
                tracing::debug!("device receiver stopped");
                done.set();
            })?;
        Ok(Self {
            handle: Some(handle),
            finished,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_set()
    }

    /// Wait for the thread to exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("device receiver panicked");
            }
        }
    }

    /// Wait up to `timeout` for the thread to exit, then detach it.
    ///
    /// Returns `false` if the thread was still blocked in a read.
    pub fn join_timeout(&mut self, timeout: Duration) -> bool {
        if self.handle.is_none() {
            return true;
        }
        if !self.finished.wait_timeout(timeout) {
            tracing::warn!("device receiver still blocked after {timeout:?}; detaching");
            self.handle = None;
            return false;
        }
        self.join();
        true
    }
}

fn receive<R, F>(transport: &mut R, on_message: &mut F)
where
    R: Read,
    F: FnMut(DeviceMessage),
{
    let mut buf = BytesMut::with_capacity(4096);
    let mut chunk = vec![0u8; 4096];
    loop {
        let n = match transport.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("device receiver read failed: {e}");
                return;
            }
        };
        buf.extend_from_slice(&chunk[..n]);
        loop {
            match DeviceMessage::deserialize(&mut buf) {
                Ok(Some(msg)) => on_message(msg),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("dropping device message stream: {e}");
                    return;
                }
            }
        }
    }
}
