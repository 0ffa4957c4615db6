//! Client-to-device control messages.
//!
//! ## Wire format
//!
//! Big-endian, no framing: each message is a one-byte type tag followed by a
//! fixed layout per type. Touch events (28 bytes):
//!
//! ```text
//! type:        u8   (2)
//! action:      u8   (down = 0, up = 1, move = 2)
//! pointer_id:  u64  (u64::MAX = mouse, u64::MAX - 1 = virtual finger)
//! x, y:        i32  (device pixels)
//! width:       u16  (current device frame size)
//! height:      u16
//! pressure:    u16  (fixed point; 1.0 = 0xffff)
//! buttons:     u32  (primary = 1, secondary = 2, tertiary = 4, ...)
//! ```

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};

use crate::coords::Position;
use crate::error::SendError;

// ── Constants ────────────────────────────────────────────────────

/// Upper bound of one serialized control message.
pub const CONTROL_MSG_MAX_SIZE: usize = 1 << 18;

/// Longest text accepted by [`ControlMessage::InjectText`], in bytes.
pub const INJECT_TEXT_MAX_LENGTH: usize = 300;

/// Longest text accepted by [`ControlMessage::SetClipboard`], in bytes.
pub const CLIPBOARD_TEXT_MAX_LENGTH: usize = CONTROL_MSG_MAX_SIZE - 6;

/// Pointer id identifying the mouse, as opposed to a real touch pointer.
pub const POINTER_ID_MOUSE: u64 = u64::MAX;

/// Pointer id of the synthetic second finger used for pinch gestures.
pub const POINTER_ID_VIRTUAL_FINGER: u64 = u64::MAX - 1;

// ── ControlType ──────────────────────────────────────────────────

/// One-byte type tag leading every control message.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    InjectKeycode = 0,
    InjectText = 1,
    InjectTouchEvent = 2,
    InjectScrollEvent = 3,
    BackOrScreenOn = 4,
    ExpandNotificationPanel = 5,
    ExpandSettingsPanel = 6,
    CollapsePanels = 7,
    GetClipboard = 8,
    SetClipboard = 9,
    SetScreenPowerMode = 10,
    RotateDevice = 11,
}

// ── Actions / buttons ────────────────────────────────────────────

/// Motion event action code.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionAction {
    Down = 0,
    Up = 1,
    Move = 2,
}

/// Key event action code.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Down = 0,
    Up = 1,
}

/// Device screen power mode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenPowerMode {
    Off = 0,
    Normal = 2,
}

bitflags! {
    /// Pressed mouse buttons, one bit per physical button.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Buttons: u32 {
        const PRIMARY = 1 << 0;
        const SECONDARY = 1 << 1;
        const TERTIARY = 1 << 2;
        const BACK = 1 << 3;
        const FORWARD = 1 << 4;
    }
}

impl Buttons {
    /// Map a 1-based desktop mouse button number (left, middle, right)
    /// onto the device's button bits. Unknown buttons map to nothing.
    pub fn from_mouse_button(button: u8) -> Self {
        match button {
            1 => Self::PRIMARY,
            2 => Self::SECONDARY,
            3 => Self::TERTIARY,
            _ => Self::empty(),
        }
    }
}

// ── TouchEvent ───────────────────────────────────────────────────

/// A touch intent addressed to the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchEvent {
    pub action: MotionAction,
    pub pointer_id: u64,
    pub position: Position,
    /// 1.0 while pressed, 0.0 on release. Not an analog pressure.
    pub pressure: f32,
    pub buttons: Buttons,
}

impl TouchEvent {
    /// A mouse pointer event: pressure 0.0 on `Up`, 1.0 otherwise.
    pub fn mouse(action: MotionAction, position: Position, buttons: Buttons) -> Self {
        Self {
            action,
            pointer_id: POINTER_ID_MOUSE,
            position,
            pressure: if action == MotionAction::Up { 0.0 } else { 1.0 },
            buttons,
        }
    }
}

// ── ControlMessage ───────────────────────────────────────────────

/// Every message the device understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    InjectKeycode {
        action: KeyAction,
        keycode: u32,
        repeat: u32,
        metastate: u32,
    },
    InjectText {
        text: String,
    },
    InjectTouch(TouchEvent),
    InjectScroll {
        position: Position,
        hscroll: i32,
        vscroll: i32,
    },
    BackOrScreenOn {
        action: KeyAction,
    },
    ExpandNotificationPanel,
    ExpandSettingsPanel,
    CollapsePanels,
    GetClipboard,
    SetClipboard {
        text: String,
        paste: bool,
    },
    SetScreenPowerMode(ScreenPowerMode),
    RotateDevice,
}

impl ControlMessage {
    pub fn control_type(&self) -> ControlType {
        match self {
            Self::InjectKeycode { .. } => ControlType::InjectKeycode,
            Self::InjectText { .. } => ControlType::InjectText,
            Self::InjectTouch(_) => ControlType::InjectTouchEvent,
            Self::InjectScroll { .. } => ControlType::InjectScrollEvent,
            Self::BackOrScreenOn { .. } => ControlType::BackOrScreenOn,
            Self::ExpandNotificationPanel => ControlType::ExpandNotificationPanel,
            Self::ExpandSettingsPanel => ControlType::ExpandSettingsPanel,
            Self::CollapsePanels => ControlType::CollapsePanels,
            Self::GetClipboard => ControlType::GetClipboard,
            Self::SetClipboard { .. } => ControlType::SetClipboard,
            Self::SetScreenPowerMode(_) => ControlType::SetScreenPowerMode,
            Self::RotateDevice => ControlType::RotateDevice,
        }
    }

    /// Append the wire encoding of this message to `buf`.
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<(), SendError> {
        buf.put_u8(self.control_type() as u8);
        match self {
            Self::InjectKeycode {
                action,
                keycode,
                repeat,
                metastate,
            } => {
                buf.put_u8(*action as u8);
                buf.put_u32(*keycode);
                buf.put_u32(*repeat);
                buf.put_u32(*metastate);
            }
            Self::InjectText { text } => put_string(buf, text, INJECT_TEXT_MAX_LENGTH),
            Self::InjectTouch(ev) => {
                buf.put_u8(ev.action as u8);
                buf.put_u64(ev.pointer_id);
                put_position(buf, &ev.position)?;
                buf.put_u16(to_fixed_point_16(ev.pressure));
                buf.put_u32(ev.buttons.bits());
            }
            Self::InjectScroll {
                position,
                hscroll,
                vscroll,
            } => {
                put_position(buf, position)?;
                buf.put_i32(*hscroll);
                buf.put_i32(*vscroll);
            }
            Self::BackOrScreenOn { action } => buf.put_u8(*action as u8),
            Self::SetClipboard { text, paste } => {
                buf.put_u8(*paste as u8);
                put_string(buf, text, CLIPBOARD_TEXT_MAX_LENGTH);
            }
            Self::SetScreenPowerMode(mode) => buf.put_u8(*mode as u8),
            Self::ExpandNotificationPanel
            | Self::ExpandSettingsPanel
            | Self::CollapsePanels
            | Self::GetClipboard
            | Self::RotateDevice => {}
        }
        Ok(())
    }

    /// Serialize into a fresh buffer.
    pub fn to_bytes(&self) -> Result<BytesMut, SendError> {
        let mut buf = BytesMut::with_capacity(32);
        self.serialize(&mut buf)?;
        Ok(buf)
    }
}

// ── Encoding helpers ─────────────────────────────────────────────

fn put_position(buf: &mut BytesMut, position: &Position) -> Result<(), SendError> {
    let width = u16::try_from(position.screen_size.width)
        .map_err(|_| SendError::Encoding("screen width exceeds u16"))?;
    let height = u16::try_from(position.screen_size.height)
        .map_err(|_| SendError::Encoding("screen height exceeds u16"))?;
    buf.put_i32(position.point.x);
    buf.put_i32(position.point.y);
    buf.put_u16(width);
    buf.put_u16(height);
    Ok(())
}

/// u32 length prefix then UTF-8 bytes, cut at a char boundary to `max_len`.
fn put_string(buf: &mut BytesMut, text: &str, max_len: usize) {
    let len = utf8_truncation_index(text, max_len);
    buf.put_u32(len as u32);
    buf.put_slice(&text.as_bytes()[..len]);
}

fn utf8_truncation_index(text: &str, max_len: usize) -> usize {
    if text.len() <= max_len {
        return text.len();
    }
    let mut len = max_len;
    while !text.is_char_boundary(len) {
        len -= 1;
    }
    len
}

/// Map [0.0, 1.0] onto u16, with 1.0 saturating to `0xffff`.
fn to_fixed_point_16(f: f32) -> u16 {
    if f >= 1.0 {
        return 0xffff;
    }
    if f <= 0.0 {
        return 0;
    }
    (f * 65536.0) as u16
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Point;
    use crate::frame::FrameSize;

    fn position(x: i32, y: i32) -> Position {
        Position::new(Point::new(x, y), FrameSize::new(1080, 1920))
    }

    #[test]
    fn touch_event_layout() {
        let ev = TouchEvent {
            action: MotionAction::Down,
            pointer_id: 0x1234567887654321,
            position: position(100, 200),
            pressure: 1.0,
            buttons: Buttons::PRIMARY,
        };
        let bytes = ControlMessage::InjectTouch(ev).to_bytes().unwrap();
        let expected: [u8; 28] = [
            0x02, // type
            0x00, // action
            0x12, 0x34, 0x56, 0x78, 0x87, 0x65, 0x43, 0x21, // pointer id
            0x00, 0x00, 0x00, 0x64, // x = 100
            0x00, 0x00, 0x00, 0xc8, // y = 200
            0x04, 0x38, // width = 1080
            0x07, 0x80, // height = 1920
            0xff, 0xff, // pressure = 1.0
            0x00, 0x00, 0x00, 0x01, // buttons
        ];
        assert_eq!(&bytes[..], &expected[..]);
    }

    #[test]
    fn mouse_down_up_differ_only_in_action_and_pressure() {
        let down = TouchEvent::mouse(MotionAction::Down, position(5, 6), Buttons::PRIMARY);
        let up = TouchEvent::mouse(MotionAction::Up, position(5, 6), Buttons::PRIMARY);
        assert_eq!(down.pointer_id, POINTER_ID_MOUSE);
        assert_eq!(down.pointer_id, up.pointer_id);
        assert_eq!((down.pressure, up.pressure), (1.0, 0.0));
        assert_eq!(TouchEvent { action: MotionAction::Down, pressure: 1.0, ..up }, down);

        let d = ControlMessage::InjectTouch(down).to_bytes().unwrap();
        let u = ControlMessage::InjectTouch(up).to_bytes().unwrap();
        let differing: Vec<usize> = (0..d.len()).filter(|&i| d[i] != u[i]).collect();
        assert_eq!(differing, vec![1, 22, 23]);
    }

    #[test]
    fn keycode_layout() {
        let msg = ControlMessage::InjectKeycode {
            action: KeyAction::Up,
            keycode: 66,
            repeat: 5,
            metastate: 0x41,
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(
            &bytes[..],
            &[0, 1, 0, 0, 0, 66, 0, 0, 0, 5, 0, 0, 0, 0x41][..]
        );
    }

    #[test]
    fn text_truncated_on_char_boundary() {
        // 299 ASCII bytes followed by a 2-byte char straddling the limit.
        let text = format!("{}é", "a".repeat(299));
        let bytes = ControlMessage::InjectText { text }.to_bytes().unwrap();
        assert_eq!(&bytes[1..5], &299u32.to_be_bytes());
        assert_eq!(bytes.len(), 1 + 4 + 299);
    }

    #[test]
    fn set_clipboard_layout() {
        let msg = ControlMessage::SetClipboard {
            text: "hi".into(),
            paste: true,
        };
        assert_eq!(&msg.to_bytes().unwrap()[..], &[9, 1, 0, 0, 0, 2, b'h', b'i'][..]);
    }

    #[test]
    fn scroll_layout() {
        let msg = ControlMessage::InjectScroll {
            position: position(1, 2),
            hscroll: 0,
            vscroll: -1,
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes.len(), 21);
        assert_eq!(&bytes[17..21], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn tag_only_messages() {
        for (msg, tag) in [
            (ControlMessage::ExpandNotificationPanel, 5u8),
            (ControlMessage::ExpandSettingsPanel, 6),
            (ControlMessage::CollapsePanels, 7),
            (ControlMessage::GetClipboard, 8),
            (ControlMessage::RotateDevice, 11),
        ] {
            assert_eq!(&msg.to_bytes().unwrap()[..], &[tag][..]);
        }
        let power = ControlMessage::SetScreenPowerMode(ScreenPowerMode::Normal);
        assert_eq!(&power.to_bytes().unwrap()[..], &[10, 2][..]);
    }

    #[test]
    fn oversized_screen_is_an_encoding_error() {
        let ev = TouchEvent::mouse(
            MotionAction::Down,
            Position::new(Point::new(0, 0), FrameSize::new(70_000, 10)),
            Buttons::empty(),
        );
        assert!(matches!(
            ControlMessage::InjectTouch(ev).to_bytes(),
            Err(SendError::Encoding(_))
        ));
    }

    #[test]
    fn desktop_button_numbers() {
        assert_eq!(Buttons::from_mouse_button(1), Buttons::PRIMARY);
        assert_eq!(Buttons::from_mouse_button(3).bits(), 4);
        assert!(Buttons::from_mouse_button(9).is_empty());
    }

    #[test]
    fn fixed_point_pressure() {
        assert_eq!(to_fixed_point_16(0.0), 0);
        assert_eq!(to_fixed_point_16(0.5), 0x8000);
        assert_eq!(to_fixed_point_16(1.0), 0xffff);
    }
}
