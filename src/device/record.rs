//! Record Decoder - fixed-size joystick records as written by the Linux `joydev` driver
//!
//! Every record is 8 bytes, little-endian:
//!
//! ```text
//! ┌──────────────┬────────────┬─────────┬──────────┐
//! │ time: u32 ms │ value: i16 │ type: u8│ index: u8│
//! └──────────────┴────────────┴─────────┴──────────┘
//! ```
//!
//! See <https://www.kernel.org/doc/Documentation/input/joystick-api.txt>.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Width of one record on the wire
pub const RECORD_SIZE: usize = 8;

/// Synthetic button state emitted during the calibration burst
pub const BUTTON_CALIBRATION: u8 = 0x81;

/// Synthetic axis state emitted during the calibration burst
pub const AXIS_CALIBRATION: u8 = 0x82;

/// Live button press or release
pub const BUTTON_LIVE: u8 = 0x01;

/// Live axis movement
pub const AXIS_LIVE: u8 = 0x02;

/// Largest positive axis reading, used as the normalization divisor
pub const MAX_AXIS_VALUE: f32 = i16::MAX as f32;

/// One decoded record, before any classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    /// Milliseconds from an unspecified base, wraps after ~49 days
    pub timestamp: u32,
    pub value: i16,
    pub kind: u8,
    /// Device-local button or axis number
    pub index: u8,
}

impl RawEvent {
    pub fn new(timestamp: u32, value: i16, kind: u8, index: u8) -> Self {
        Self {
            timestamp,
            value,
            kind,
            index,
        }
    }

    /// Reads exactly one record from `reader`.
    ///
    /// End of stream, a short read and OS errors all come back as a plain
    /// `io::Error`; callers treat every failure the same way.
    pub async fn read_from<R>(reader: &mut R) -> io::Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = [0u8; RECORD_SIZE];
        reader.read_exact(&mut buf).await?;
        Ok(Self::from_bytes(buf))
    }

    pub fn from_bytes(buf: [u8; RECORD_SIZE]) -> Self {
        Self {
            timestamp: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            value: i16::from_le_bytes([buf[4], buf[5]]),
            kind: buf[6],
            index: buf[7],
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[4..6].copy_from_slice(&self.value.to_le_bytes());
        buf[6] = self.kind;
        buf[7] = self.index;
        buf
    }

    /// True for either kind of synthetic calibration record
    pub fn is_calibration(&self) -> bool {
        matches!(self.kind, BUTTON_CALIBRATION | AXIS_CALIBRATION)
    }

    pub fn when(&self) -> Duration {
        to_duration(self.timestamp)
    }

    /// Axis reading scaled by the positive range.
    ///
    /// `i16::MIN` therefore lands slightly below -1.0.
    pub fn normalized(&self) -> f32 {
        normalize(self.value)
    }
}

/// Device milliseconds to a `Duration`. The source counter wraps roughly
/// monthly and that wrap is passed through unchanged.
pub fn to_duration(millis: u32) -> Duration {
    Duration::from_nanos(u64::from(millis) * 1_000_000)
}

pub fn normalize(value: i16) -> f32 {
    f32::from(value) / MAX_AXIS_VALUE
}
