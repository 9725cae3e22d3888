//! In-memory [`EventSink`] that keeps every recorded event for inspection.

use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use vsync_core::{EventSink, EventType, ObjectKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub target: ObjectKey,
    pub type_: EventType,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events().into_iter().filter(|e| e.reason == reason).collect()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn record(&self, target: &ObjectReference, type_: EventType, reason: &str, message: &str) {
        tracing::debug!(?type_, reason, message, "event");
        let target = ObjectKey::new(target.namespace.clone().unwrap_or_default(), target.name.clone().unwrap_or_default());
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(RecordedEvent {
            target,
            type_,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
