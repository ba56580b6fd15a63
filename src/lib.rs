//! Linux joystick device reader with per-event channel routing.
//!
//! Connect to `/dev/input/jsN`, learn the device's buttons and hats from the
//! driver's calibration burst, then subscribe to the events you care about.

pub mod config;
pub mod device;
pub mod error;

pub use config::Settings;
pub use device::{capture, connect, device_exists, CaptureRequest, DeviceHandle, Event, Notification};
pub use error::{DeviceError, SettingsError};
