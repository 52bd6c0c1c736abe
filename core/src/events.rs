use std::sync::Mutex;

use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    EmptyBase,
    DataLoss,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ProductsChanged {
        count: usize,
        source: String,
    },
    OrphansRecovered {
        recovered: usize,
        from_snapshot: usize,
        from_remote: usize,
        still_missing: Vec<String>,
    },
    RecoveryBlocked {
        reason: BlockReason,
        pending: usize,
    },
}

impl Event {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Event::ProductsChanged { .. } => "products_changed",
            Event::OrphansRecovered { .. } => "orphans_recovered",
            Event::RecoveryBlocked { .. } => "recovery_blocked",
        }
    }
}

/// Receives engine notifications. Implementations must not call back into the engine.
pub trait Notifier: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Writes every event to the tracing log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn emit(&self, event: &Event) {
        match event {
            Event::RecoveryBlocked { reason, pending } => {
                error!(?reason, pending, "recovery blocked");
            }
            other => info!(event = other.name(), ?other, "event"),
        }
    }
}

/// Keeps events in memory so callers can inspect or print them afterwards.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn take(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn emit(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_notifier_collects_in_order() {
        let n = RecordingNotifier::new();
        n.emit(&Event::ProductsChanged {
            count: 2,
            source: "orphan-recovery".to_string(),
        });
        n.emit(&Event::RecoveryBlocked {
            reason: BlockReason::EmptyBase,
            pending: 1,
        });
        let names: Vec<&str> = n.events().iter().map(Event::name).collect();
        assert_eq!(names, vec!["products_changed", "recovery_blocked"]);
        assert_eq!(n.take().len(), 2);
        assert!(n.events().is_empty());
    }

    #[test]
    fn test_event_json_is_tagged() {
        let v = serde_json::to_value(Event::RecoveryBlocked {
            reason: BlockReason::DataLoss,
            pending: 3,
        })
        .unwrap();
        assert_eq!(v["event"], "recovery_blocked");
        assert_eq!(v["reason"], "data_loss");
    }
}
