//! In-process event bus for transport lifecycle events.
//!
//! The load balancer publishes partition changes here and the session
//! orchestrator listens to rebalance its sessions. Session lifecycle
//! events are published for observers (tests, metrics exporters).

use tokio::sync::broadcast;

use crate::device::DeviceId;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Events published inside a transport instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The set of SNMP transport instances, or this instance's position
    /// in it, changed.
    TransportListChanged {
        instance_count: usize,
        instance_index: usize,
    },
    /// A device session became active on this instance.
    SessionEstablished { device_id: DeviceId },
    /// A device session was torn down on this instance.
    SessionClosed { device_id: DeviceId },
}

/// Broadcast bus for [`TransportEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TransportEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity determines how many events are buffered for slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event. Returns `true` if there was at least one
    /// subscriber; without subscribers the event is discarded.
    pub fn publish(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for events from the bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<TransportEvent>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Lagging receivers skip the events they missed. Returns `None` once
    /// the bus is closed.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event bus receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }
}
