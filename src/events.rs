//! Typed event bus.
//!
//! Built on `tokio::sync::broadcast`, a non-blocking fan-out primitive: a
//! slow subscriber never stalls the publisher; instead it falls behind and
//! its next `recv()` returns `Lagged(n)`, which we fold into a per-bus
//! overflow counter rather than letting it disappear silently.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Discriminant used for subscriber-side filtering; the payload itself
/// already carries this information but callers that only care about one
/// kind can check this first without matching the full payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    ScanStarted,
    ScanPointCompleted,
    ScanPaused,
    ScanResumed,
    ScanCompleted,
    ScanCancelled,
    ScanFailed,
    MotionFailed,
    CameraFailed,
    CameraRecovered,
    CameraSyncLost,
    LedSafetyRefused,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum EventData {
    ScanStarted { scan_id: String, total_points: usize },
    ScanPointCompleted { scan_id: String, point_index: usize, images_captured: usize },
    ScanPaused { scan_id: String },
    ScanResumed { scan_id: String },
    ScanCompleted { scan_id: String },
    ScanCancelled { scan_id: String },
    ScanFailed { scan_id: String, detail: String },
    MotionFailed { detail: String },
    CameraFailed { camera_id: String, detail: String },
    CameraRecovered { camera_id: String, attempts: u32 },
    CameraSyncLost { skew_ns: i64 },
    LedSafetyRefused { zone: String, requested: f64 },
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::ScanStarted { .. } => EventKind::ScanStarted,
            EventData::ScanPointCompleted { .. } => EventKind::ScanPointCompleted,
            EventData::ScanPaused { .. } => EventKind::ScanPaused,
            EventData::ScanResumed { .. } => EventKind::ScanResumed,
            EventData::ScanCompleted { .. } => EventKind::ScanCompleted,
            EventData::ScanCancelled { .. } => EventKind::ScanCancelled,
            EventData::ScanFailed { .. } => EventKind::ScanFailed,
            EventData::MotionFailed { .. } => EventKind::MotionFailed,
            EventData::CameraFailed { .. } => EventKind::CameraFailed,
            EventData::CameraRecovered { .. } => EventKind::CameraRecovered,
            EventData::CameraSyncLost { .. } => EventKind::CameraSyncLost,
            EventData::LedSafetyRefused { .. } => EventKind::LedSafetyRefused,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub data: EventData,
    pub source: &'static str,
    pub timestamp_ns: u64,
}

pub struct EventBus {
    sender: broadcast::Sender<Event>,
    overflow: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            overflow: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn publish(&self, data: EventData, source: &'static str) {
        let event = Event {
            data,
            source,
            timestamp_ns: crate::position::now_ns(),
        };
        // No subscribers is not an error; the event is simply dropped.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            overflow: self.overflow.clone(),
        }
    }

    /// Total events any subscriber has missed due to falling behind, across
    /// the bus's lifetime.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

pub struct EventSubscription {
    receiver: broadcast::Receiver<Event>,
    overflow: Arc<AtomicU64>,
}

impl EventSubscription {
    /// Awaits the next event, transparently skipping past a lag gap and
    /// recording how many events were missed.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.overflow.fetch_add(skipped, Ordering::Relaxed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_subscriber_in_order() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe();
        bus.publish(EventData::ScanStarted { scan_id: "s1".into(), total_points: 4 }, "test");
        bus.publish(EventData::ScanPaused { scan_id: "s1".into() }, "test");

        let first = sub.recv().await.unwrap();
        assert_eq!(first.data.kind(), EventKind::ScanStarted);
        let second = sub.recv().await.unwrap();
        assert_eq!(second.data.kind(), EventKind::ScanPaused);
    }

    #[tokio::test]
    async fn overflow_is_counted_not_silently_dropped() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.publish(EventData::ScanPointCompleted { scan_id: "s1".into(), point_index: i, images_captured: 2 }, "test");
        }
        // The channel only holds 2; recv() skips the lag gap and returns
        // whatever is still live rather than blocking on missed entries.
        let _ = sub.recv().await;
        assert!(bus.overflow_count() > 0);
    }
}
