//! Event Router - delivers live records to caller-registered channels
//!
//! Each live record maps to one or more [`EventSignature`]s. A signature with
//! a registered destination gets an [`Event`]; anything else is dropped.
//!
//! | live tag | value       | signatures fired                         |
//! |----------|-------------|------------------------------------------|
//! | `0x01`   | != 0        | `Changed`, `Closed`                      |
//! | `0x01`   | == 0        | `Changed`, `Opened`                      |
//! | `0x02`   | any         | `Changed` (axis), `Moved` (hat, axis 1)  |

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::capability::Capabilities;
use super::reader::RawEventStream;
use super::record::{normalize, RawEvent, AXIS_LIVE, BUTTON_LIVE};

/// What a subscriber wants to hear about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    /// Every report for one button or one axis
    Changed,
    /// Button pressed
    Closed,
    /// Button released
    Opened,
    /// Either axis of a hat moved; keyed on the hat's first axis
    Moved,
}

/// Routing key: live type tag, raw index, notification kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventSignature {
    pub kind: u8,
    pub index: u8,
    pub notification: Notification,
}

impl EventSignature {
    pub fn button(index: u8, notification: Notification) -> Self {
        Self {
            kind: BUTTON_LIVE,
            index,
            notification,
        }
    }

    pub fn axis(index: u8, notification: Notification) -> Self {
        Self {
            kind: AXIS_LIVE,
            index,
            notification,
        }
    }
}

/// Delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Button {
        number: u8,
        pressed: bool,
        when: Duration,
    },
    HatAxis {
        hat: u8,
        axis: u8,
        value: f32,
        when: Duration,
    },
    HatPosition {
        hat: u8,
        x: f32,
        y: f32,
        when: Duration,
    },
}

impl Event {
    pub fn when(&self) -> Duration {
        match self {
            Event::Button { when, .. } | Event::HatAxis { when, .. } | Event::HatPosition { when, .. } => {
                *when
            }
        }
    }
}

/// Output-channel registry shared between the handle and the router.
///
/// The lock is only held for map operations, never across an `.await`.
/// Delivery awaits the destination's capacity, so a destination that is not
/// drained stalls the router and, behind it, the reader.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Routes>>,
}

#[derive(Debug, Default)]
struct Routes {
    // set once the router has ended; later destinations are dropped on arrival
    closed: bool,
    destinations: HashMap<EventSignature, mpsc::Sender<Event>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Routes> {
        // no invariant spans more than one map call, so a poisoned map is still usable
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the destination for `signature`, replacing any previous one.
    /// The replaced sender is dropped.
    ///
    /// Once the device has disconnected the destination is dropped instead,
    /// so its receiver sees closure right away. Returns whether it was kept.
    pub fn register(&self, signature: EventSignature, destination: mpsc::Sender<Event>) -> bool {
        let mut routes = self.lock();
        if routes.closed {
            debug!("Device disconnected, not registering {:?}", signature);
            return false;
        }
        if routes.destinations.insert(signature, destination).is_some() {
            debug!("Replaced destination for {:?}", signature);
        } else {
            debug!("Registered destination for {:?}", signature);
        }
        true
    }

    pub fn unregister(&self, signature: &EventSignature) -> bool {
        self.lock().destinations.remove(signature).is_some()
    }

    pub fn destination(&self, signature: &EventSignature) -> Option<mpsc::Sender<Event>> {
        self.lock().destinations.get(signature).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().destinations.is_empty()
    }

    /// True once the router has ended
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Drops a destination only if it is still the one registered
    fn remove_if_same(&self, signature: &EventSignature, sender: &mpsc::Sender<Event>) {
        let mut routes = self.lock();
        if routes
            .destinations
            .get(signature)
            .is_some_and(|current| current.same_channel(sender))
        {
            routes.destinations.remove(signature);
        }
    }

    fn close(&self) {
        let mut routes = self.lock();
        routes.closed = true;
        routes.destinations.clear();
    }
}

/// Consumer side of a connected device after discovery
#[derive(Debug)]
pub struct EventRouter {
    stream: RawEventStream,
    capabilities: Arc<Capabilities>,
    registry: Registry,
    // router-local axis state; the shared capabilities stay untouched
    axis_values: HashMap<u8, f32>,
    // hat number -> (axis 1 index, axis 2 index)
    hats: HashMap<u8, (Option<u8>, Option<u8>)>,
}

impl EventRouter {
    pub fn new(stream: RawEventStream, capabilities: Arc<Capabilities>, registry: Registry) -> Self {
        let axis_values = capabilities
            .hat_axes
            .iter()
            .map(|(index, axis)| (*index, axis.value))
            .collect();

        let mut hats: HashMap<u8, (Option<u8>, Option<u8>)> = HashMap::new();
        for (index, axis) in &capabilities.hat_axes {
            let slot = hats.entry(axis.hat_number).or_default();
            match axis.axis_number {
                1 => slot.0 = Some(*index),
                _ => slot.1 = Some(*index),
            }
        }

        Self {
            stream,
            capabilities,
            registry,
            axis_values,
            hats,
        }
    }

    pub(crate) fn stream_mut(&mut self) -> &mut RawEventStream {
        &mut self.stream
    }

    /// Routes until the device stream closes, then closes the registry so
    /// every subscriber, present or future, observes the disconnect as
    /// channel closure.
    pub async fn run(mut self) {
        info!("Event router started");
        let mut routed: u64 = 0;

        while let Some(event) = self.stream.recv().await {
            self.route(event).await;
            routed += 1;
        }

        info!("Device disconnected after {} live records, closing subscriber channels", routed);
        self.registry.close();
    }

    async fn route(&mut self, event: RawEvent) {
        match event.kind {
            BUTTON_LIVE => self.route_button(event).await,
            AXIS_LIVE => self.route_axis(event).await,
            other => debug!("Dropping record with unknown type {:#04x}", other),
        }
    }

    async fn route_button(&mut self, event: RawEvent) {
        let Some(button) = self.capabilities.buttons.get(&event.index) else {
            debug!("Dropping event for unknown button index {}", event.index);
            return;
        };

        let pressed = event.value != 0;
        let delivered = Event::Button {
            number: button.number,
            pressed,
            when: event.when(),
        };
        let edge = if pressed {
            Notification::Closed
        } else {
            Notification::Opened
        };

        self.deliver(EventSignature::button(event.index, Notification::Changed), delivered.clone())
            .await;
        self.deliver(EventSignature::button(event.index, edge), delivered).await;
    }

    async fn route_axis(&mut self, event: RawEvent) {
        let Some(axis) = self.capabilities.hat_axes.get(&event.index).copied() else {
            debug!("Dropping event for unknown axis index {}", event.index);
            return;
        };

        let value = normalize(event.value);
        self.axis_values.insert(event.index, value);
        let when = event.when();

        self.deliver(
            EventSignature::axis(event.index, Notification::Changed),
            Event::HatAxis {
                hat: axis.hat_number,
                axis: axis.axis_number,
                value,
                when,
            },
        )
        .await;

        let Some((Some(first), second)) = self.hats.get(&axis.hat_number).copied() else {
            return;
        };
        let x = self.axis_values.get(&first).copied().unwrap_or_default();
        let y = second
            .and_then(|index| self.axis_values.get(&index).copied())
            .unwrap_or_default();

        self.deliver(
            EventSignature::axis(first, Notification::Moved),
            Event::HatPosition {
                hat: axis.hat_number,
                x,
                y,
                when,
            },
        )
        .await;
    }

    async fn deliver(&self, signature: EventSignature, event: Event) {
        let Some(destination) = self.registry.destination(&signature) else {
            return;
        };

        if destination.send(event).await.is_err() {
            warn!("Subscriber for {:?} is gone, unregistering it", signature);
            self.registry.remove_if_same(&signature, &destination);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::capability::{Button, HatAxis};
    use crate::device::reader::spawn_reader;
    use std::io::Cursor;

    fn capabilities() -> Arc<Capabilities> {
        let mut caps = Capabilities::default();
        caps.buttons.insert(
            3,
            Button {
                number: 1,
                created_at: Duration::ZERO,
                pressed: false,
            },
        );
        for (index, axis_number) in [(0u8, 1u8), (1, 2)] {
            caps.hat_axes.insert(
                index,
                HatAxis {
                    hat_number: 1,
                    axis_number,
                    inverted: false,
                    created_at: Duration::ZERO,
                    value: 0.0,
                },
            );
        }
        Arc::new(caps)
    }

    fn router_over(events: &[RawEvent], registry: &Registry) -> EventRouter {
        let bytes: Vec<u8> = events.iter().flat_map(|e| e.to_bytes()).collect();
        let (stream, _) = spawn_reader(Cursor::new(bytes));
        EventRouter::new(stream, capabilities(), registry.clone())
    }

    #[tokio::test]
    async fn button_edges_go_to_their_own_channels() {
        let registry = Registry::default();
        let (close_tx, mut close_rx) = mpsc::channel(8);
        let (open_tx, mut open_rx) = mpsc::channel(8);
        let (change_tx, mut change_rx) = mpsc::channel(8);
        registry.register(EventSignature::button(3, Notification::Closed), close_tx);
        registry.register(EventSignature::button(3, Notification::Opened), open_tx);
        registry.register(EventSignature::button(3, Notification::Changed), change_tx);

        let events = [
            RawEvent::new(10, 1, BUTTON_LIVE, 3),
            RawEvent::new(20, 0, BUTTON_LIVE, 3),
        ];
        router_over(&events, &registry).run().await;

        assert_eq!(
            close_rx.recv().await,
            Some(Event::Button {
                number: 1,
                pressed: true,
                when: Duration::from_millis(10)
            })
        );
        assert_eq!(close_rx.recv().await, None);
        assert_eq!(
            open_rx.recv().await,
            Some(Event::Button {
                number: 1,
                pressed: false,
                when: Duration::from_millis(20)
            })
        );
        assert_eq!(open_rx.recv().await, None);

        let mut changes = Vec::new();
        while let Some(event) = change_rx.recv().await {
            changes.push(event);
        }
        assert_eq!(changes.len(), 2);
    }

    #[tokio::test]
    async fn hat_position_combines_both_axes() {
        let registry = Registry::default();
        let (move_tx, mut move_rx) = mpsc::channel(8);
        let (axis_tx, mut axis_rx) = mpsc::channel(8);
        registry.register(EventSignature::axis(0, Notification::Moved), move_tx);
        registry.register(EventSignature::axis(1, Notification::Changed), axis_tx);

        let events = [
            RawEvent::new(1, i16::MAX, AXIS_LIVE, 0),
            RawEvent::new(2, -i16::MAX, AXIS_LIVE, 1),
        ];
        router_over(&events, &registry).run().await;

        assert_eq!(
            move_rx.recv().await,
            Some(Event::HatPosition {
                hat: 1,
                x: 1.0,
                y: 0.0,
                when: Duration::from_millis(1)
            })
        );
        assert_eq!(
            move_rx.recv().await,
            Some(Event::HatPosition {
                hat: 1,
                x: 1.0,
                y: -1.0,
                when: Duration::from_millis(2)
            })
        );
        assert_eq!(move_rx.recv().await, None);

        assert_eq!(
            axis_rx.recv().await,
            Some(Event::HatAxis {
                hat: 1,
                axis: 2,
                value: -1.0,
                when: Duration::from_millis(2)
            })
        );
    }

    #[tokio::test]
    async fn unregistered_and_unknown_events_are_dropped() {
        let registry = Registry::default();
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(EventSignature::button(3, Notification::Closed), tx);

        let events = [
            RawEvent::new(1, 1, BUTTON_LIVE, 9),
            RawEvent::new(2, 0, BUTTON_LIVE, 3),
            RawEvent::new(3, 5, 0x07, 3),
            RawEvent::new(4, 1, BUTTON_LIVE, 3),
        ];
        router_over(&events, &registry).run().await;

        assert_eq!(rx.recv().await.map(|e| e.when()), Some(Duration::from_millis(4)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn re_registration_replaces_destination() {
        let registry = Registry::default();
        let signature = EventSignature::button(3, Notification::Closed);
        let (old_tx, mut old_rx) = mpsc::channel(8);
        let (new_tx, mut new_rx) = mpsc::channel(8);
        registry.register(signature, old_tx);
        registry.register(signature, new_tx);
        assert_eq!(registry.len(), 1);

        router_over(&[RawEvent::new(5, 1, BUTTON_LIVE, 3)], &registry).run().await;

        assert_eq!(old_rx.recv().await, None);
        assert!(matches!(new_rx.recv().await, Some(Event::Button { pressed: true, .. })));
    }

    #[tokio::test]
    async fn dropped_subscriber_is_unregistered() {
        let registry = Registry::default();
        let signature = EventSignature::button(3, Notification::Changed);
        let (tx, rx) = mpsc::channel(8);
        registry.register(signature, tx);
        drop(rx);

        let router = router_over(&[RawEvent::new(5, 1, BUTTON_LIVE, 3)], &registry);
        router.run().await;

        assert!(registry.destination(&signature).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn registration_after_disconnect_is_closed_at_once() {
        let registry = Registry::default();
        router_over(&[RawEvent::new(5, 1, BUTTON_LIVE, 3)], &registry).run().await;
        assert!(registry.is_closed());

        let (tx, mut rx) = mpsc::channel(8);
        assert!(!registry.register(EventSignature::button(3, Notification::Closed), tx));
        assert!(registry.is_empty());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn undrained_subscriber_holds_back_the_router() {
        let registry = Registry::default();
        let (tx, mut rx) = mpsc::channel(1);
        registry.register(EventSignature::button(3, Notification::Changed), tx);

        let events = [
            RawEvent::new(1, 1, BUTTON_LIVE, 3),
            RawEvent::new(2, 0, BUTTON_LIVE, 3),
            RawEvent::new(3, 1, BUTTON_LIVE, 3),
        ];
        let mut task = tokio::spawn(router_over(&events, &registry).run());

        let stalled = tokio::time::timeout(Duration::from_millis(50), &mut task).await;
        assert!(stalled.is_err());

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event.when());
        }
        assert_eq!(seen.len(), 3);
        task.await.unwrap();
    }
}
