// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Pipeline Events
//
// In-memory fan-out over a tokio broadcast channel. Subscribers that fall
// behind lose the oldest events and are told how many they missed.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::PipelineEvent;
use crate::domain::result::Fingerprint;

/// Event bus for publishing and subscribing to pipeline events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<PipelineEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, event: PipelineEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when nobody is listening
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all pipeline events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to events concerning one fingerprint
    pub fn subscribe_fingerprint(&self, fingerprint: Fingerprint) -> FingerprintEventReceiver {
        FingerprintEventReceiver {
            receiver: self.sender.subscribe(),
            fingerprint,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all pipeline events
pub struct EventReceiver {
    receiver: broadcast::Receiver<PipelineEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<PipelineEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<PipelineEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to a single fingerprint
pub struct FingerprintEventReceiver {
    receiver: broadcast::Receiver<PipelineEvent>,
    fingerprint: Fingerprint,
}

impl FingerprintEventReceiver {
    pub async fn recv(&mut self) -> Result<PipelineEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.fingerprint() == Some(&self.fingerprint) {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn hit(fingerprint: &str) -> PipelineEvent {
        PipelineEvent::CacheHit {
            fingerprint: Fingerprint::new(fingerprint),
            hit_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish(hit("aaaa"));

        match receiver.recv().await.unwrap() {
            PipelineEvent::CacheHit { fingerprint, .. } => assert_eq!(fingerprint.as_str(), "aaaa"),
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fingerprint_filtering() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_fingerprint(Fingerprint::new("target"));

        event_bus.publish(hit("other"));
        event_bus.publish(PipelineEvent::ProfileUpdated {
            complexity: crate::domain::profile::ComplexityLevel::Simple,
            sample_count: 1,
            updated_at: Utc::now(),
        });
        event_bus.publish(hit("target"));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.fingerprint().map(Fingerprint::as_str), Some("target"));
    }

    #[test]
    fn test_try_recv_on_empty_bus() {
        let event_bus = EventBus::new(4);
        let mut receiver = event_bus.subscribe();
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
        assert_eq!(event_bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_dropped_events() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe();
        for i in 0..5 {
            event_bus.publish(hit(&format!("fp{i}")));
        }
        assert!(matches!(receiver.recv().await, Err(EventBusError::Lagged(3))));
    }
}
