//! Device Handle - connect, discover and subscribe
//!
//! Provides the caller-facing API over the reader, discovery and router
//! stages. Connecting is complete once the calibration burst has been
//! drained; the handle then offers registration helpers and hands out the
//! router that delivers live events.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::capability::{Button, Capabilities, HatAxis};
use super::discovery::DeviceLink;
use super::reader::{spawn_reader, RawEventStream};
use super::router::{Event, EventRouter, EventSignature, Notification, Registry};
use crate::config::Settings;
use crate::error::DeviceError;

/// Path of the 1-based joystick `index` under `prefix`.
///
/// Built fresh on every call, so it is safe from any task. Index 0 has no
/// device.
pub fn device_path(prefix: &str, index: u8) -> Option<PathBuf> {
    index
        .checked_sub(1)
        .map(|number| PathBuf::from(format!("{prefix}{number}")))
}

/// Whether joystick `index` exists under the default `/dev/input/js` prefix
pub fn device_exists(index: u8) -> bool {
    device_exists_at(&Settings::default().device_path_prefix, index)
}

pub fn device_exists_at(prefix: &str, index: u8) -> bool {
    device_path(prefix, index).is_some_and(|path| path.exists())
}

/// Opens joystick `index` under the default prefix
pub async fn connect(index: u8) -> Result<DeviceHandle, DeviceError> {
    let settings = Settings {
        device_index: index,
        ..Settings::default()
    };
    DeviceHandle::connect(&settings).await
}

/// Connected device with its discovered capabilities
#[derive(Debug)]
pub struct DeviceHandle {
    capabilities: Arc<Capabilities>,
    registry: Registry,
    router: Option<EventRouter>,
    subscriber_capacity: usize,
}

impl DeviceHandle {
    /// Opens the device named by `settings` read-only and runs discovery.
    ///
    /// # Errors
    ///
    /// * [`DeviceError::InvalidIndex`] - `device_index` is 0
    /// * [`DeviceError::Open`] - the device node could not be opened; no
    ///   reader task is started
    pub async fn connect(settings: &Settings) -> Result<Self, DeviceError> {
        let path = device_path(&settings.device_path_prefix, settings.device_index)
            .ok_or(DeviceError::InvalidIndex)?;
        info!("Connecting to {}", path.display());

        let file = open_read_only(&path).await?;
        Ok(Self::from_reader(file, settings).await)
    }

    /// Connects over an already opened byte stream
    pub async fn from_reader<R>(reader: R, settings: &Settings) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        // the reader task is detached; its end shows up as the stream closing
        let (stream, _reader_task) = spawn_reader(reader);
        let link = DeviceLink::create(stream).discover().await;
        debug!(
            "Discovery complete: {} buttons, {} hats",
            link.capabilities().button_count(),
            link.capabilities().hat_count()
        );
        let (stream, capabilities) = link.into_parts();
        let capabilities = Arc::new(capabilities);

        let registry = Registry::default();
        let router = EventRouter::new(stream, Arc::clone(&capabilities), registry.clone());

        Self {
            capabilities,
            registry,
            router: Some(router),
            subscriber_capacity: settings.subscriber_capacity(),
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Buttons keyed by raw index
    pub fn buttons(&self) -> &std::collections::HashMap<u8, Button> {
        &self.capabilities.buttons
    }

    /// Hat axes keyed by raw index
    pub fn hat_axes(&self) -> &std::collections::HashMap<u8, HatAxis> {
        &self.capabilities.hat_axes
    }

    /// Raw record stream, available until the router is taken
    pub fn raw_events(&mut self) -> Option<&mut RawEventStream> {
        self.router.as_mut().map(EventRouter::stream_mut)
    }

    /// Sets `destination` for `signature`, silently replacing any earlier one.
    ///
    /// After the device has disconnected the destination is dropped and
    /// `false` is returned.
    pub fn register(&self, signature: EventSignature, destination: mpsc::Sender<Event>) -> bool {
        self.registry.register(signature, destination)
    }

    /// Removes the destination for `signature`; its receiver then sees closure
    pub fn unregister(&self, signature: &EventSignature) -> bool {
        self.registry.unregister(signature)
    }

    /// Subscribes to button `number` (1-based, calibration order).
    ///
    /// The router waits for room in the returned channel before delivering
    /// anything else, so a receiver that is not drained holds back every
    /// other subscriber and the device reader. After a disconnect the
    /// receiver is already closed.
    pub fn on_button(
        &self,
        number: u8,
        notification: Notification,
    ) -> Result<mpsc::Receiver<Event>, DeviceError> {
        let index = self
            .capabilities
            .button_index(number)
            .ok_or(DeviceError::UnknownButton(number))?;
        Ok(self.subscribe(EventSignature::button(index, notification)))
    }

    /// Button pressed
    pub fn on_close(&self, number: u8) -> Result<mpsc::Receiver<Event>, DeviceError> {
        self.on_button(number, Notification::Closed)
    }

    /// Button released
    pub fn on_open(&self, number: u8) -> Result<mpsc::Receiver<Event>, DeviceError> {
        self.on_button(number, Notification::Opened)
    }

    pub fn on_button_change(&self, number: u8) -> Result<mpsc::Receiver<Event>, DeviceError> {
        self.on_button(number, Notification::Changed)
    }

    /// Position of `hat` whenever either of its axes reports
    pub fn on_hat_move(&self, hat: u8) -> Result<mpsc::Receiver<Event>, DeviceError> {
        let index = self
            .capabilities
            .hat_axis_index(hat, 1)
            .ok_or(DeviceError::UnknownHat(hat))?;
        Ok(self.subscribe(EventSignature::axis(index, Notification::Moved)))
    }

    /// Single axis (1 or 2) of `hat`
    pub fn on_hat_axis(&self, hat: u8, axis: u8) -> Result<mpsc::Receiver<Event>, DeviceError> {
        let index = self
            .capabilities
            .hat_axis_index(hat, axis)
            .ok_or(DeviceError::UnknownHat(hat))?;
        Ok(self.subscribe(EventSignature::axis(index, Notification::Changed)))
    }

    fn subscribe(&self, signature: EventSignature) -> mpsc::Receiver<Event> {
        let (sender, receiver) = mpsc::channel(self.subscriber_capacity);
        // a refused sender is dropped here, closing `receiver`
        self.registry.register(signature, sender);
        receiver
    }

    /// Hands out the router; `None` if it was already taken
    pub fn take_router(&mut self) -> Option<EventRouter> {
        self.router.take()
    }

    /// Runs the router as a tokio task
    pub fn spawn_router(&mut self) -> Result<JoinHandle<()>, DeviceError> {
        let router = self.take_router().ok_or(DeviceError::RouterTaken)?;
        Ok(tokio::spawn(router.run()))
    }
}

async fn open_read_only(path: &Path) -> Result<tokio::fs::File, DeviceError> {
    OpenOptions::new()
        .read(true)
        .open(path)
        .await
        .map_err(|source| DeviceError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// One subscription made by [`capture`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRequest {
    Button { number: u8, notification: Notification },
    HatMove { hat: u8 },
    HatAxis { hat: u8, axis: u8 },
}

/// Connects to `settings.device_index`, subscribes every request and starts
/// routing. Receivers come back in request order.
pub async fn capture(
    settings: &Settings,
    requests: &[CaptureRequest],
) -> Result<Vec<mpsc::Receiver<Event>>, DeviceError> {
    let mut handle = DeviceHandle::connect(settings).await?;
    let receivers = subscribe_all(&handle, requests)?;
    handle.spawn_router()?;
    Ok(receivers)
}

pub(crate) fn subscribe_all(
    handle: &DeviceHandle,
    requests: &[CaptureRequest],
) -> Result<Vec<mpsc::Receiver<Event>>, DeviceError> {
    requests
        .iter()
        .map(|request| match *request {
            CaptureRequest::Button {
                number,
                notification,
            } => handle.on_button(number, notification),
            CaptureRequest::HatMove { hat } => handle.on_hat_move(hat),
            CaptureRequest::HatAxis { hat, axis } => handle.on_hat_axis(hat, axis),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::record::{RawEvent, AXIS_CALIBRATION, BUTTON_CALIBRATION, BUTTON_LIVE};
    use std::io::Cursor;

    fn device(events: &[RawEvent]) -> Cursor<Vec<u8>> {
        Cursor::new(events.iter().flat_map(|e| e.to_bytes()).collect())
    }

    fn two_buttons_one_hat() -> Vec<RawEvent> {
        vec![
            RawEvent::new(0, 0, BUTTON_CALIBRATION, 0),
            RawEvent::new(0, 0, BUTTON_CALIBRATION, 1),
            RawEvent::new(0, 0, AXIS_CALIBRATION, 4),
            RawEvent::new(0, 0, AXIS_CALIBRATION, 5),
            RawEvent::new(50, 1, BUTTON_LIVE, 1),
        ]
    }

    #[test]
    fn paths_are_zero_based() {
        assert_eq!(device_path("/dev/input/js", 1), Some(PathBuf::from("/dev/input/js0")));
        assert_eq!(device_path("/dev/input/js", 12), Some(PathBuf::from("/dev/input/js11")));
        assert_eq!(device_path("/dev/input/js", 0), None);
    }

    #[test]
    fn existence_check() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = format!("{}/js", dir.path().display());
        std::fs::write(dir.path().join("js0"), b"").unwrap();

        assert!(device_exists_at(&prefix, 1));
        assert!(!device_exists_at(&prefix, 2));
        assert!(!device_exists_at(&prefix, 0));
    }

    #[tokio::test]
    async fn connect_reports_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            device_path_prefix: format!("{}/js", dir.path().display()),
            ..Settings::default()
        };

        let result = DeviceHandle::connect(&settings).await;
        assert!(matches!(result, Err(DeviceError::Open { .. })));

        let zero = Settings {
            device_index: 0,
            ..settings
        };
        assert!(matches!(
            DeviceHandle::connect(&zero).await,
            Err(DeviceError::InvalidIndex)
        ));
    }

    #[tokio::test]
    async fn connect_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let bytes: Vec<u8> = two_buttons_one_hat().iter().flat_map(|e| e.to_bytes()).collect();
        std::fs::write(dir.path().join("js1"), bytes).unwrap();
        let settings = Settings {
            device_index: 2,
            device_path_prefix: format!("{}/js", dir.path().display()),
            ..Settings::default()
        };

        let mut receivers = capture(
            &settings,
            &[CaptureRequest::Button {
                number: 2,
                notification: Notification::Closed,
            }],
        )
        .await
        .unwrap();

        assert!(matches!(
            receivers[0].recv().await,
            Some(Event::Button { number: 2, pressed: true, .. })
        ));
        assert_eq!(receivers[0].recv().await, None);
    }

    #[tokio::test]
    async fn unknown_numbers_are_rejected() {
        let handle = DeviceHandle::from_reader(device(&two_buttons_one_hat()), &Settings::default()).await;

        assert!(matches!(handle.on_close(3), Err(DeviceError::UnknownButton(3))));
        assert!(matches!(handle.on_hat_move(2), Err(DeviceError::UnknownHat(2))));
        assert!(matches!(handle.on_hat_axis(1, 3), Err(DeviceError::UnknownHat(1))));
        assert!(handle.on_hat_axis(1, 2).is_ok());
    }

    #[tokio::test]
    async fn router_is_handed_out_once() {
        let mut handle = DeviceHandle::from_reader(device(&two_buttons_one_hat()), &Settings::default()).await;

        assert!(handle.raw_events().is_some());
        let task = handle.spawn_router().unwrap();
        assert!(matches!(handle.spawn_router(), Err(DeviceError::RouterTaken)));
        assert!(handle.take_router().is_none());
        assert!(handle.raw_events().is_none());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn subscribing_after_disconnect_yields_closed_receiver() {
        let mut handle = DeviceHandle::from_reader(device(&two_buttons_one_hat()), &Settings::default()).await;
        handle.take_router().unwrap().run().await;

        let mut late = handle.on_close(1).unwrap();
        assert_eq!(late.recv().await, None);

        let (tx, mut rx) = mpsc::channel(1);
        assert!(!handle.register(EventSignature::button(0, Notification::Opened), tx));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn unregister_closes_subscriber() {
        let handle = DeviceHandle::from_reader(device(&two_buttons_one_hat()), &Settings::default()).await;
        let mut receiver = handle.on_close(1).unwrap();

        let index = handle.capabilities().button_index(1).unwrap();
        assert!(handle.unregister(&EventSignature::button(index, Notification::Closed)));
        assert_eq!(receiver.recv().await, None);
    }
}
