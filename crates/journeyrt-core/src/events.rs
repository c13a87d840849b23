//! Telemetry event emission and tracing identifiers.
//!
//! The runtime reports lifecycle events (`journey_start`, `step_enter`,
//! `step_exit`, `journey_end`, ...) through a single [`EventSink`]
//! interface. The bus holds at most one sink behind a reader-writer slot;
//! installation is exclusive, delivery is concurrent. Every event carries
//! the session's correlation identifier.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use rand::Rng;
use serde_json::Value;

/// Attribute map attached to each emitted event.
pub type EventAttributes = BTreeMap<String, Value>;

/// Sink receiving telemetry events from the runtime.
pub trait EventSink: Send + Sync {
    /// Delivers one event with its attributes.
    fn emit(&self, name: &str, attributes: &EventAttributes);
}

/// Process-local telemetry bus.
///
/// Holds an optional sink and the current correlation identifier. Emission
/// is a no-op until a sink is installed, and is suppressed entirely when
/// the caller has not opted into telemetry.
pub struct TelemetryBus {
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    correlation_id: RwLock<String>,
    opted_in: bool,
}

impl TelemetryBus {
    /// Creates a bus with no sink installed.
    #[must_use]
    pub fn new(opted_in: bool) -> Self {
        Self {
            sink: RwLock::new(None),
            correlation_id: RwLock::new(String::new()),
            opted_in,
        }
    }

    /// Installs the sink, replacing any previous one.
    pub fn install_sink(&self, sink: Arc<dyn EventSink>) {
        if let Ok(mut slot) = self.sink.write() {
            *slot = Some(sink);
        }
    }

    /// Binds the correlation identifier attached to subsequent events.
    pub fn bind_correlation(&self, correlation_id: &str) {
        if let Ok(mut slot) = self.correlation_id.write() {
            *slot = correlation_id.to_string();
        }
    }

    /// Emits one event through the installed sink, if any.
    pub fn emit(&self, name: &str, mut attributes: EventAttributes) {
        if !self.opted_in {
            return;
        }
        if let Ok(correlation) = self.correlation_id.read() {
            if !correlation.is_empty() {
                attributes.insert(
                    "correlationId".to_string(),
                    Value::String(correlation.clone()),
                );
            }
        }
        let sink = match self.sink.read() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        if let Some(sink) = sink {
            sink.emit(name, &attributes);
        }
    }
}

/// Sink adapter that logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, name: &str, attributes: &EventAttributes) {
        let attrs = serde_json::to_string(attributes).unwrap_or_default();
        tracing::info!(target: "journeyrt::telemetry", event = name, %attrs);
    }
}

/// Generates a W3C Trace Context `traceparent` header value.
///
/// Format: `00-<16-byte-hex trace id>-<8-byte-hex span id>-01`.
#[must_use]
pub fn new_traceparent() -> String {
    let mut rng = rand::thread_rng();
    let mut trace_id = [0u8; 16];
    let mut span_id = [0u8; 8];
    rng.fill(&mut trace_id);
    rng.fill(&mut span_id);
    format!("00-{}-{}-01", hex::encode(trace_id), hex::encode(span_id))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(String, EventAttributes)>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, name: &str, attributes: &EventAttributes) {
            self.events
                .lock()
                .unwrap()
                .push((name.to_string(), attributes.clone()));
        }
    }

    #[test]
    fn events_carry_correlation_id() {
        let bus = TelemetryBus::new(true);
        let sink = Arc::new(RecordingSink::default());
        bus.install_sink(sink.clone());
        bus.bind_correlation("corr-1");

        bus.emit("journey_start", EventAttributes::new());

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "journey_start");
        assert_eq!(
            events[0].1.get("correlationId"),
            Some(&Value::String("corr-1".to_string()))
        );
    }

    #[test]
    fn emission_without_opt_in_is_dropped() {
        let bus = TelemetryBus::new(false);
        let sink = Arc::new(RecordingSink::default());
        bus.install_sink(sink.clone());

        bus.emit("journey_start", EventAttributes::new());

        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[test]
    fn emission_without_sink_is_a_no_op() {
        let bus = TelemetryBus::new(true);
        bus.emit("journey_start", EventAttributes::new());
    }

    #[test]
    fn traceparent_shape() {
        let tp = new_traceparent();
        let parts: Vec<&str> = tp.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "00");
        assert_eq!(parts[1].len(), 32);
        assert_eq!(parts[2].len(), 16);
        assert_eq!(parts[3], "01");
        assert!(parts[1].bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
