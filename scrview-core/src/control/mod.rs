//! Device control: wire messages, the outbound channel, and inbound device
//! messages.

pub mod channel;
pub mod device;
pub mod event_log;
pub mod message;

pub use channel::{ControlChannel, ControlTransport};
pub use device::{DeviceMessage, DeviceReceiver};
pub use event_log::{EventLog, LoggedEvent};
pub use message::{
    Buttons, ControlMessage, ControlType, KeyAction, MotionAction, POINTER_ID_MOUSE,
    POINTER_ID_VIRTUAL_FINGER, ScreenPowerMode, TouchEvent,
};
