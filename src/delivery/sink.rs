use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, warn};

use super::event::{Delivery, Notification};

/// Downstream collaborator that persists events, de-duplicates them against
/// earlier ones and renders notifications. The core never does either itself.
///
/// Both methods must not block: they are called from push handlers and the
/// event queue drain.
pub trait DownstreamSink: Send + Sync {
    fn deliver(&self, delivery: Delivery);

    /// A bare notification with no event behind it (interval summaries).
    fn notify(&self, notification: Notification);
}

#[derive(Clone, Debug, PartialEq)]
pub enum SinkMessage {
    Delivery(Delivery),
    Notification(Notification),
}

/// Forwards everything into a bounded channel without waiting.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkMessage>,
}

impl ChannelSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<SinkMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    fn forward(&self, message: SinkMessage) {
        if let Err(e) = self.tx.try_send(message) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("Sink channel is full, dropping message");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    error!("Sink channel is closed");
                }
            }
        }
    }
}

impl DownstreamSink for ChannelSink {
    fn deliver(&self, delivery: Delivery) {
        debug!("Forwarding event {} ({})", delivery.event.title, delivery.event.uid);
        self.forward(SinkMessage::Delivery(delivery));
    }

    fn notify(&self, notification: Notification) {
        self.forward(SinkMessage::Notification(notification));
    }
}

/// Records everything in memory. Used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    deliveries: Mutex<Vec<Delivery>>,
    notifications: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Bare notifications passed to [`DownstreamSink::notify`].
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().map(|n| n.clone()).unwrap_or_default()
    }

    /// Every notification shown, attached to a delivery or not.
    pub fn shown_notifications(&self) -> usize {
        let attached = self.deliveries().iter().filter(|d| d.notification.is_some()).count();
        attached + self.notifications().len()
    }

    pub fn len(&self) -> usize {
        self.deliveries.lock().map(|d| d.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` deliveries arrived or `timeout` passed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.len() >= count {
                return true;
            }
            sleep(Duration::from_millis(5)).await;
        }
        self.len() >= count
    }
}

impl DownstreamSink for MemorySink {
    fn deliver(&self, delivery: Delivery) {
        if let Ok(mut deliveries) = self.deliveries.lock() {
            deliveries.push(delivery);
        }
    }

    fn notify(&self, notification: Notification) {
        if let Ok(mut notifications) = self.notifications.lock() {
            notifications.push(notification);
        }
    }
}
