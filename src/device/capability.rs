//! Capability registries filled from the calibration burst

use std::collections::HashMap;
use std::time::Duration;

/// A button reported during calibration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Button {
    /// 1-based, in calibration order
    pub number: u8,
    pub created_at: Duration,
    pub pressed: bool,
}

/// One axis of a two-axis hat
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HatAxis {
    /// 1-based, advances every second axis
    pub hat_number: u8,
    /// 1 or 2
    pub axis_number: u8,
    /// Reserved; never set by discovery
    pub inverted: bool,
    pub created_at: Duration,
    /// Raw reading divided by 32767
    pub value: f32,
}

/// Buttons and hat axes keyed by the device's raw index.
///
/// Written once during discovery and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub buttons: HashMap<u8, Button>,
    pub hat_axes: HashMap<u8, HatAxis>,
}

impl Capabilities {
    /// Raw index of the button with the given 1-based number
    pub fn button_index(&self, number: u8) -> Option<u8> {
        self.buttons
            .iter()
            .find(|(_, button)| button.number == number)
            .map(|(index, _)| *index)
    }

    /// Raw index of the given axis of a hat
    pub fn hat_axis_index(&self, hat_number: u8, axis_number: u8) -> Option<u8> {
        self.hat_axes
            .iter()
            .find(|(_, axis)| axis.hat_number == hat_number && axis.axis_number == axis_number)
            .map(|(index, _)| *index)
    }

    pub fn button_count(&self) -> usize {
        self.buttons.len()
    }

    /// Number of distinct hats, counting a hat with only one reported axis
    pub fn hat_count(&self) -> usize {
        self.hat_axes
            .values()
            .map(|axis| axis.hat_number)
            .max()
            .map_or(0, usize::from)
    }

    /// Button numbers in ascending order
    pub fn button_numbers(&self) -> Vec<u8> {
        let mut numbers: Vec<u8> = self.buttons.values().map(|b| b.number).collect();
        numbers.sort_unstable();
        numbers
    }

    /// Hat numbers in ascending order, without duplicates
    pub fn hat_numbers(&self) -> Vec<u8> {
        let mut numbers: Vec<u8> = self.hat_axes.values().map(|a| a.hat_number).collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers
    }
}
