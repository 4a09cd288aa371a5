//! A tracing layer that forwards events to a channel.
//!
//! Used to observe operational logs (degraded judgments, failed jobs)
//! programmatically, e.g. from tests or an embedding host.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

#[derive(Debug, Clone, serde::Serialize)]
pub struct CapturedEvent {
    /// e.g. `reconciler`, `background`
    pub target: String,
    /// INFO, WARN, ...
    pub level: String,
    pub message: String,
    pub fields: HashMap<String, Value>,
    pub timestamp: String,
}

impl CapturedEvent {
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }
}

pub struct CaptureLayer {
    sender: mpsc::UnboundedSender<CapturedEvent>,
}

impl CaptureLayer {
    pub fn new(sender: mpsc::UnboundedSender<CapturedEvent>) -> Self {
        Self { sender }
    }

    /// A layer together with the receiver of its events.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CapturedEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));

        let message = fields
            .remove("message")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        let _ = self.sender.send(CapturedEvent {
            target: event.metadata().target().to_string(),
            level: event.metadata().level().to_string(),
            message,
            fields,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, Value>);

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().to_string(), Value::from(format!("{value:?}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_captures_fields_and_message() {
        let (layer, mut events) = CaptureLayer::channel();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "reconciler", session_id = "s1", revision = 2u64, "judgment degraded");
        });

        let event = events.try_recv().unwrap();
        assert_eq!(event.target, "reconciler");
        assert_eq!(event.level, "WARN");
        assert_eq!(event.message, "judgment degraded");
        assert_eq!(event.field_str("session_id"), Some("s1"));
        assert_eq!(event.fields["revision"], 2);
    }
}
