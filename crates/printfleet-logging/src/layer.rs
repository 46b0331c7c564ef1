//! `tracing` layer feeding the in-memory log history hub.
//!
//! [`HubLayer`] turns every event at or above its minimum level into a
//! [`LogEntry`] and publishes it to a [`BroadcastHub`]. Span fields
//! (`session_id`, `machine_id`, `action`...) are captured when a span is
//! created and merged into each event raised inside it, innermost span
//! first.

use std::sync::Arc;

use printfleet_core::BroadcastHub;
use serde_json::{Map, Value};
use tracing::Subscriber;
use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

use crate::types::{LogEntry, LogLevel};

/// Default number of entries kept in the log history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Targets whose events would echo back through the log pump.
const EXCLUDED_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "hyper", "h2", "tower_http"];

/// Span fields stored in span extensions.
#[derive(Default)]
struct SpanFields(Map<String, Value>);

/// Visitor collecting fields as JSON values.
struct JsonVisitor<'a> {
    message: Option<String>,
    fields: &'a mut Map<String, Value>,
}

impl<'a> JsonVisitor<'a> {
    fn new(fields: &'a mut Map<String, Value>) -> Self {
        Self { message: None, fields }
    }

    fn put(&mut self, field: &Field, value: Value) {
        let _ = self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for JsonVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.put(field, Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.put(field, Value::Number(n));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.put(field, Value::String(format!("{value:?}")));
        }
    }
}

/// Publishes tracing events into a `BroadcastHub<LogEntry>`.
pub struct HubLayer {
    hub: Arc<BroadcastHub<LogEntry>>,
    min_level: LogLevel,
}

impl HubLayer {
    /// Capture events at `Info` and above into `hub`.
    pub fn new(hub: Arc<BroadcastHub<LogEntry>>) -> Self {
        Self {
            hub,
            min_level: LogLevel::Info,
        }
    }

    /// Change the minimum captured level.
    #[must_use]
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }
}

impl<S> Layer<S> for HubLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, id: &tracing::span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = SpanFields::default();
        attrs.record(&mut JsonVisitor::new(&mut fields.0));
        span.extensions_mut().insert(fields);
    }

    fn on_record(&self, id: &tracing::span::Id, values: &tracing::span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            values.record(&mut JsonVisitor::new(&mut fields.0));
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = LogLevel::from_tracing(metadata.level());
        if level < self.min_level {
            return;
        }
        let target = metadata.target();
        if EXCLUDED_TARGETS.iter().any(|t| target.starts_with(t)) {
            return;
        }

        let mut fields = Map::new();
        let mut visitor = JsonVisitor::new(&mut fields);
        event.record(&mut visitor);
        let message = visitor.message.take().unwrap_or_default();

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(span_fields) = span.extensions().get::<SpanFields>() {
                    for (key, value) in &span_fields.0 {
                        let _ = fields.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
            }
        }

        let mut entry = LogEntry::new(level, target, message);
        entry.fields = fields;
        self.hub.publish(entry);
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn with_hub<F: FnOnce()>(hub: &Arc<BroadcastHub<LogEntry>>, level: LogLevel, f: F) {
        let subscriber = tracing_subscriber::registry().with(HubLayer::new(Arc::clone(hub)).with_min_level(level));
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn events_are_published() {
        let hub = Arc::new(BroadcastHub::new(10));
        with_hub(&hub, LogLevel::Info, || {
            tracing::info!(count = 3, "machines loaded");
        });

        let entries: Vec<_> = hub.entries().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "machines loaded");
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[0].fields["count"], 3);
    }

    #[test]
    fn below_min_level_is_skipped() {
        let hub = Arc::new(BroadcastHub::new(10));
        with_hub(&hub, LogLevel::Warn, || {
            tracing::info!("quiet");
            tracing::warn!("loud");
        });

        let entries: Vec<_> = hub.entries().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "loud");
    }

    #[test]
    fn span_fields_are_merged_innermost_first() {
        let hub = Arc::new(BroadcastHub::new(10));
        with_hub(&hub, LogLevel::Info, || {
            let outer = tracing::info_span!("session", session_id = "s1", action = "outer");
            let _outer = outer.enter();
            let inner = tracing::info_span!("dispatch", action = "machine/pause");
            let _inner = inner.enter();
            tracing::info!("handled");
        });

        let entry = hub.entries().next().unwrap();
        assert_eq!(entry.fields["session_id"], "s1");
        assert_eq!(entry.fields["action"], "machine/pause");
    }

    #[test]
    fn recorded_span_fields_are_visible() {
        let hub = Arc::new(BroadcastHub::new(10));
        with_hub(&hub, LogLevel::Info, || {
            let span = tracing::info_span!("dispatch", action = tracing::field::Empty);
            span.record("action", "log/history");
            let _guard = span.enter();
            tracing::info!("handled");
        });

        let entry = hub.entries().next().unwrap();
        assert_eq!(entry.fields["action"], "log/history");
    }

    #[test]
    fn transport_targets_are_excluded() {
        let hub = Arc::new(BroadcastHub::new(10));
        with_hub(&hub, LogLevel::Trace, || {
            tracing::info!(target: "tungstenite::protocol", "frame");
        });
        assert!(hub.is_empty());
    }
}
