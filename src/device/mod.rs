//! Joystick device subsystem
//!
//! Implements the connection lifecycle of a Linux `joydev` device:
//!
//! 1. [`record`] - Fixed 8-byte record decoding
//! 2. [`reader`] - Background reader task and raw-event stream
//! 3. [`discovery`] - Capability discovery from the calibration burst
//! 4. [`router`] - Live event routing to registered channels
//! 5. [`handle`] - Connect API and subscription helpers
//!
//! # Architecture
//!
//! ```text
//! /dev/input/jsN ──► Reader ──► Discovery ──► Router ──► subscriber channels
//!                   (task)     (in connect)   (task)
//! ```

pub mod capability;
pub mod discovery;
pub mod handle;
pub mod reader;
pub mod record;
pub mod router;

pub use capability::{Button, Capabilities, HatAxis};
pub use handle::{
    capture, connect, device_exists, device_exists_at, device_path, CaptureRequest, DeviceHandle,
};
pub use reader::RawEventStream;
pub use record::RawEvent;
pub use router::{Event, EventRouter, EventSignature, Notification, Registry};
