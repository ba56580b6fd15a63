//! Capability Discoverer
//!
//! Right after the device is opened the driver replays the state of every
//! button (`0x81`) and axis (`0x82`). Those records are consumed here and
//! numbered in arrival order. The first record of any other type is a live
//! event; it ends discovery and goes back into the stream's pending slot so
//! the router sees it first.

use statum::{machine, state};
use tracing::{debug, info, warn};

use super::capability::{Button, Capabilities, HatAxis};
use super::reader::RawEventStream;
use super::record::{RawEvent, BUTTON_CALIBRATION};

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Discovering, // Draining the calibration burst
    Ready,       // Capabilities final, stream positioned at the first live record
}

/// Connection under discovery, with compile-time state via statum
#[machine]
pub struct DeviceLink<S: LinkState> {
    stream: RawEventStream,
    capabilities: Capabilities,
    next_button: u8,
    next_hat: u8,
    next_axis: u8,
}

impl DeviceLink<Discovering> {
    pub fn create(stream: RawEventStream) -> Self {
        Self::new(
            stream,
            Capabilities::default(),
            1, // next_button
            1, // next_hat
            1, // next_axis
        )
    }

    /// Drains the calibration burst and transitions to `Ready`.
    ///
    /// Also ends if the stream closes mid-burst; whatever was seen is kept.
    pub async fn discover(mut self) -> DeviceLink<Ready> {
        debug!("Draining calibration burst");

        loop {
            let Some(event) = self.stream.recv().await else {
                warn!(
                    "Device stream closed during discovery ({} buttons, {} axes seen)",
                    self.capabilities.buttons.len(),
                    self.capabilities.hat_axes.len()
                );
                break;
            };

            if !event.is_calibration() {
                if self.capabilities.buttons.is_empty() && self.capabilities.hat_axes.is_empty() {
                    warn!("First record was already live, no calibration burst seen");
                }
                debug!("Calibration burst ended at {:?}", event);
                self.stream.unread(event);
                break;
            }

            if event.kind == BUTTON_CALIBRATION {
                self.add_button(&event);
            } else {
                self.add_hat_axis(&event);
            }
        }

        info!(
            "Discovered {} buttons and {} hat axes",
            self.capabilities.button_count(),
            self.capabilities.hat_axes.len()
        );
        self.transition()
    }

    fn add_button(&mut self, event: &RawEvent) {
        let button = Button {
            number: self.next_button,
            created_at: event.when(),
            pressed: event.value != 0,
        };
        debug!("Button {} at index {}", button.number, event.index);
        if self.capabilities.buttons.insert(event.index, button).is_some() {
            warn!("Index {} reported twice as a button, keeping the later one", event.index);
        }
        self.next_button = self.next_button.wrapping_add(1);
    }

    fn add_hat_axis(&mut self, event: &RawEvent) {
        let axis = HatAxis {
            hat_number: self.next_hat,
            axis_number: self.next_axis,
            inverted: false,
            created_at: event.when(),
            value: event.normalized(),
        };
        debug!(
            "Hat {} axis {} at index {} = {:.4}",
            axis.hat_number, axis.axis_number, event.index, axis.value
        );
        if self.capabilities.hat_axes.insert(event.index, axis).is_some() {
            warn!("Index {} reported twice as an axis, keeping the later one", event.index);
        }
        self.next_axis += 1;
        if self.next_axis > 2 {
            self.next_axis = 1;
            self.next_hat = self.next_hat.wrapping_add(1);
        }
    }
}

impl DeviceLink<Ready> {
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn into_parts(self) -> (RawEventStream, Capabilities) {
        (self.stream, self.capabilities)
    }
}

/// Runs discovery to completion over `stream`
pub async fn discover(stream: RawEventStream) -> (RawEventStream, Capabilities) {
    DeviceLink::create(stream).discover().await.into_parts()
}
