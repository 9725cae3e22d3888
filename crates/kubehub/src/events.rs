//! [`EventSink`] backed by the kube runtime event recorder.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;
use vsync_core::{EventSink, EventType};

const ACTION: &str = "Sync";

pub struct KubeEventSink {
    client: Client,
    reporter: Reporter,
}

impl KubeEventSink {
    /// `controller` shows up as the reporting component on every event.
    pub fn new(client: Client, controller: &str) -> Self {
        Self { client, reporter: Reporter { controller: controller.to_string(), instance: None } }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn record(&self, target: &ObjectReference, type_: EventType, reason: &str, message: &str) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), target.clone());
        let event = Event {
            type_: match type_ {
                EventType::Normal => KubeEventType::Normal,
                EventType::Warning => KubeEventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: ACTION.to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(reason, error = %e, object = ?target.name, "failed to publish event");
        }
    }
}
