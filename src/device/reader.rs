//! Reader Task and the raw-event stream it feeds
//!
//! ```text
//! device ──read_from──► ReaderTask ──mpsc(1)──► RawEventStream ──► discovery / router
//!                                                  ▲
//!                                        pending slot (one record)
//! ```
//!
//! The channel holds a single record, so the reader stalls until the consumer
//! takes what is waiting. The pending slot carries the record that ended the
//! calibration burst back to the next consumer without a second send.

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::record::RawEvent;

/// Capacity of the raw-event channel. One is the smallest bounded channel
/// tokio provides.
pub const RAW_CHANNEL_CAPACITY: usize = 1;

/// Spawns the reader task over `reader` and returns the consumer side.
///
/// The task ends on the first failed read, dropping its sender so the
/// returned stream reports closure. It also ends if the stream is dropped.
pub fn spawn_reader<R>(reader: R) -> (RawEventStream, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (sender, receiver) = mpsc::channel(RAW_CHANNEL_CAPACITY);
    let task = tokio::spawn(pipe_events(reader, sender));
    debug!("Reader task spawned");
    (RawEventStream::new(receiver), task)
}

async fn pipe_events<R>(mut reader: R, sender: mpsc::Sender<RawEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    info!("Reader task started");
    let mut forwarded: u64 = 0;

    loop {
        let event = match RawEvent::read_from(&mut reader).await {
            Ok(event) => event,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Device stream ended after {} records", forwarded);
                break;
            }
            Err(e) => {
                warn!("Device read failed after {} records: {}", forwarded, e);
                break;
            }
        };

        if sender.send(event).await.is_err() {
            debug!("Raw event consumer dropped, stopping reader");
            break;
        }
        forwarded += 1;
    }

    // dropping the sender here is the one and only close of the raw channel
    drop(sender);
    info!("Reader task terminated, raw event channel closed");
}

/// Consumer side of the raw-event channel
#[derive(Debug)]
pub struct RawEventStream {
    receiver: mpsc::Receiver<RawEvent>,
    pending: Option<RawEvent>,
}

impl RawEventStream {
    pub fn new(receiver: mpsc::Receiver<RawEvent>) -> Self {
        Self {
            receiver,
            pending: None,
        }
    }

    /// Next record, pending slot first. `None` once the reader has closed
    /// the channel and the slot is empty.
    pub async fn recv(&mut self) -> Option<RawEvent> {
        if let Some(event) = self.pending.take() {
            return Some(event);
        }
        self.receiver.recv().await
    }

    /// Puts a record back so the next `recv` returns it.
    ///
    /// The slot holds one record; a second unread before a `recv` replaces the
    /// first, which discovery never does.
    pub fn unread(&mut self, event: RawEvent) {
        if let Some(previous) = self.pending.replace(event) {
            warn!("Pending slot overwritten, dropped {:?}", previous);
        }
    }

    pub fn pending(&self) -> Option<&RawEvent> {
        self.pending.as_ref()
    }
}
