use crate::capture::CaptureEvent;
use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events that can occur in the photo booth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SnapEvent {
    /// The capture controller changed state or emitted a session event
    Capture {
        event: CaptureEvent,
        timestamp: SystemTime,
    },
    /// The camera could not be acquired for a session
    CameraUnavailable { message: String },
    /// User-facing status line changed
    StatusMessage { text: String },
    /// A captured still was stored
    UploadCompleted { url: String, filename: String },
    /// A captured still could not be stored
    UploadFailed { error: String },
    /// Gallery listing refreshed
    GalleryRefreshed { count: usize },
    /// Gallery listing failed
    GalleryFailed { error: String },
    /// Coin mint request submitted
    CoinSubmitted { hash: String },
    /// Coin mint request failed
    CoinFailed { error: String },
    /// Wallet connection status changed
    WalletChanged {
        connected: bool,
        address: Option<String>,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl SnapEvent {
    /// Wrap a controller event with the current time
    pub fn capture(event: CaptureEvent) -> Self {
        SnapEvent::Capture {
            event,
            timestamp: SystemTime::now(),
        }
    }

    /// Build a status line event
    pub fn status<S: Into<String>>(text: S) -> Self {
        SnapEvent::StatusMessage { text: text.into() }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SnapEvent::Capture { event, .. } => event.description(),
            SnapEvent::CameraUnavailable { message } => message.clone(),
            SnapEvent::StatusMessage { text } => format!("Status: {}", text),
            SnapEvent::UploadCompleted { url, .. } => format!("Upload completed: {}", url),
            SnapEvent::UploadFailed { error } => format!("Upload failed: {}", error),
            SnapEvent::GalleryRefreshed { count } => {
                format!("Gallery refreshed ({} photos)", count)
            }
            SnapEvent::GalleryFailed { error } => format!("Gallery refresh failed: {}", error),
            SnapEvent::CoinSubmitted { hash } => format!("Coin submitted: {}", hash),
            SnapEvent::CoinFailed { error } => format!("Coin failed: {}", error),
            SnapEvent::WalletChanged { connected, address } => match (connected, address) {
                (true, Some(address)) => format!("Wallet connected: {}", address),
                (true, None) => "Wallet connected".to_string(),
                (false, _) => "Wallet disconnected".to_string(),
            },
            SnapEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            SnapEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SnapEvent::Capture { event, .. } => event.event_type(),
            SnapEvent::CameraUnavailable { .. } => "camera_unavailable",
            SnapEvent::StatusMessage { .. } => "status_message",
            SnapEvent::UploadCompleted { .. } => "upload_completed",
            SnapEvent::UploadFailed { .. } => "upload_failed",
            SnapEvent::GalleryRefreshed { .. } => "gallery_refreshed",
            SnapEvent::GalleryFailed { .. } => "gallery_failed",
            SnapEvent::CoinSubmitted { .. } => "coin_submitted",
            SnapEvent::CoinFailed { .. } => "coin_failed",
            SnapEvent::WalletChanged { .. } => "wallet_changed",
            SnapEvent::SystemError { .. } => "system_error",
            SnapEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<SnapEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<SnapEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered<S: Into<String>>(&self, filter: EventFilter, name: S) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.into())
    }

    /// Publish an event to all subscribers.
    ///
    /// Publishing with no subscribers is not an error; the event is dropped
    /// and the returned count is zero.
    pub fn publish(&self, event: SnapEvent) -> Result<usize, EventBusError> {
        match &event {
            SnapEvent::Capture { event: capture, .. } => match capture {
                CaptureEvent::Captured { .. } => info!("{}", capture.description()),
                CaptureEvent::CountdownCancelled { reason } => {
                    info!("Countdown cancelled - {}", reason)
                }
                CaptureEvent::SessionExpired { .. } => info!("{}", capture.description()),
                _ => {
                    if self.debug_logging {
                        debug!("Event: {}", capture.description());
                    }
                }
            },
            SnapEvent::CameraUnavailable { message } => warn!("{}", message),
            SnapEvent::UploadFailed { error } => warn!("Upload failed: {}", error),
            SnapEvent::GalleryFailed { error } => warn!("Gallery refresh failed: {}", error),
            SnapEvent::CoinFailed { error } => warn!("Coin minting failed: {}", error),
            SnapEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            SnapEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        if self.sender.receiver_count() == 0 {
            return Ok(0);
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept only controller events
    CaptureOnly,
    /// Custom filter function
    Custom(fn(&SnapEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &SnapEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::CaptureOnly => matches!(event, SnapEvent::Capture { .. }),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<SnapEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(receiver: broadcast::Receiver<SnapEvent>, filter: EventFilter, name: String) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<SnapEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<SnapEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CancelReason;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let subscriber_count = event_bus
            .publish(SnapEvent::capture(CaptureEvent::Captured { session: 1 }))
            .unwrap();
        assert_eq!(subscriber_count, 1);

        match receiver.recv().await.unwrap() {
            SnapEvent::Capture {
                event: CaptureEvent::Captured { session },
                ..
            } => assert_eq!(session, 1),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let event_bus = EventBus::new(10);
        assert!(!event_bus.has_subscribers());
        assert_eq!(event_bus.publish(SnapEvent::status("idle")).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(SnapEvent::GalleryRefreshed { count: 3 }).unwrap();

        let _ = timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        let _ = timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let mut receiver =
            event_bus.subscribe_filtered(EventFilter::EventTypes(vec!["upload_completed"]), "test");

        event_bus.publish(SnapEvent::status("Uploading...")).unwrap();
        event_bus
            .publish(SnapEvent::UploadCompleted {
                url: "http://localhost/a.jpg".to_string(),
                filename: "a.jpg".to_string(),
            })
            .unwrap();

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "upload_completed");
        assert!(receiver.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_event_filter() {
        let capture = SnapEvent::capture(CaptureEvent::CountdownCancelled {
            reason: CancelReason::FaceLost,
        });
        let status = SnapEvent::status("CAPTURED!");

        assert!(EventFilter::CaptureOnly.matches(&capture));
        assert!(!EventFilter::CaptureOnly.matches(&status));
        assert!(EventFilter::EventTypes(vec!["countdown_cancelled"]).matches(&capture));
        assert!(EventFilter::All.matches(&status));
    }
}
