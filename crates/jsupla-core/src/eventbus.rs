//! Event bus connecting the server, devices and discovery.
//!
//! Publishing never blocks: events go into a broadcast channel and are
//! dropped when nobody listens. Slow subscribers lose the oldest events.

use tokio::sync::broadcast;

use crate::event::{EventMetadata, JSuplaEvent};

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Broadcast event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<(JSuplaEvent, EventMetadata)>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event with the default source.
    ///
    /// Returns `true` if there was at least one subscriber.
    pub fn publish(&self, event: JSuplaEvent) -> bool {
        self.publish_with_source(event, "system")
    }

    pub fn publish_with_source(&self, event: JSuplaEvent, source: impl Into<String>) -> bool {
        let metadata = EventMetadata::new(source);
        self.tx.send((event, metadata)).is_ok()
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to events matching a filter.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&JSuplaEvent) -> bool + Send + 'static,
    {
        FilteredReceiver {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    /// Subscribe to device status and value events.
    pub fn device_events(&self) -> FilteredReceiver<fn(&JSuplaEvent) -> bool> {
        self.subscribe_filtered(JSuplaEvent::is_device_event as fn(&JSuplaEvent) -> bool)
    }

    /// Subscribe to discovery events.
    pub fn discovery_events(&self) -> FilteredReceiver<fn(&JSuplaEvent) -> bool> {
        self.subscribe_filtered(JSuplaEvent::is_discovery_event as fn(&JSuplaEvent) -> bool)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for all events from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(JSuplaEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<(JSuplaEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<(JSuplaEvent, EventMetadata)> {
        self.rx.try_recv().ok()
    }
}

/// Receiver for filtered events from the event bus.
pub struct FilteredReceiver<F>
where
    F: Fn(&JSuplaEvent) -> bool + Send,
{
    rx: broadcast::Receiver<(JSuplaEvent, EventMetadata)>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&JSuplaEvent) -> bool + Send,
{
    /// Receive the next event matching the filter.
    pub async fn recv(&mut self) -> Option<(JSuplaEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok((event, meta)) => {
                    if (self.filter)(&event) {
                        return Some((event, meta));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Filtered event subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&mut self) -> Option<(JSuplaEvent, EventMetadata)> {
        while let Ok((event, meta)) = self.rx.try_recv() {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }
}
