//! Structured event sink for the fleet control plane.
//!
//! Every state transition in the standby manager, the serverless scheduler,
//! and the machine history engine is recorded through an [`EventSink`] after
//! the corresponding state change commits. Production wiring uses
//! [`TracingSink`]; tests swap in [`InMemorySink`] and assert on the
//! recorded sequence.
//!
//! # Usage
//!
//! ```no_run
//! use events::{EventBus, FleetEvent, TracingSink};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let bus = EventBus::with_sinks(vec![Arc::new(TracingSink::new())]);
//! bus.record(FleetEvent::InstanceLifecycle {
//!     instance_id: 42,
//!     action: "created".to_string(),
//!     detail: Default::default(),
//!     timestamp: chrono::Utc::now(),
//! })
//! .await;
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`EventSink`] trait defines the interface for event destinations.
//! - [`TracingSink`] logs events through `tracing` at a level derived from
//!   [`events::Severity`].
//! - [`InMemorySink`] buffers events in memory for test assertions.
//! - [`EventBus`] fans a single event out to every configured sink and waits
//!   for all of them before returning.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod events;

pub use error::SinkError;
pub use events::{FleetEvent, Severity};

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// A destination for fleet events.
///
/// Implementations must not block the caller for longer than it takes to
/// hand the event off (write to a channel, push to a buffer, log a line);
/// anything that talks to the network should buffer internally and flush
/// on its own schedule.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record a single event.
    async fn record(&self, event: &FleetEvent) -> Result<(), SinkError>;

    /// Human-readable sink name, used in error logs.
    fn name(&self) -> &str;
}

/// Logs events through `tracing` at a level derived from the event's severity.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    /// Create a new tracing-backed sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventSink for TracingSink {
    async fn record(&self, event: &FleetEvent) -> Result<(), SinkError> {
        let kind = event.kind();
        let instance_id = event.instance_id();
        match event.severity() {
            Severity::Info => info!(kind, ?instance_id, "fleet event"),
            Severity::Warning => warn!(kind, ?instance_id, "fleet event"),
            Severity::Critical => error!(kind, ?instance_id, "fleet event"),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Buffers every recorded event in memory.
///
/// Intended for tests: construct one, wire it into an [`EventBus`], drive
/// the code under test, then call [`InMemorySink::events`] to assert on
/// exactly what was recorded and in what order.
#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    events: Arc<Mutex<Vec<FleetEvent>>>,
}

impl InMemorySink {
    /// Create an empty in-memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event recorded so far, in recording order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned, which only happens if a
    /// prior call panicked while holding the lock.
    #[must_use]
    pub fn events(&self) -> Vec<FleetEvent> {
        self.events.lock().expect("event buffer poisoned").clone()
    }

    /// Number of events recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().expect("event buffer poisoned").len()
    }

    /// Whether no events have been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSink for InMemorySink {
    async fn record(&self, event: &FleetEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .expect("event buffer poisoned")
            .push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Fans a single event out to every configured sink.
///
/// Unlike a fire-and-forget dispatcher, [`EventBus::record`] awaits every
/// sink before returning so callers can rely on the event having been
/// recorded by the time the state change that produced it is visible to
/// the rest of the system.
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    /// Create a bus with no sinks; `record` becomes a no-op.
    #[must_use]
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Create a bus wired to the given sinks.
    #[must_use]
    pub fn with_sinks(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    /// Number of sinks currently wired into this bus.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Record an event on every configured sink, waiting for all of them.
    ///
    /// Errors from individual sinks are logged and do not stop delivery to
    /// the remaining sinks; callers that need per-sink results should use
    /// [`EventBus::record_and_collect`] instead.
    pub async fn record(&self, event: FleetEvent) {
        if self.sinks.is_empty() {
            debug!(kind = event.kind(), "no event sinks configured, dropping");
            return;
        }

        let futures = self.sinks.iter().map(|sink| {
            let event = &event;
            async move {
                if let Err(e) = sink.record(event).await {
                    error!(sink = sink.name(), error = %e, "event sink failed");
                }
            }
        });
        futures::future::join_all(futures).await;
    }

    /// Record an event and collect the per-sink result of each delivery.
    pub async fn record_and_collect(
        &self,
        event: FleetEvent,
    ) -> Vec<(String, Result<(), SinkError>)> {
        if self.sinks.is_empty() {
            return Vec::new();
        }

        let futures = self.sinks.iter().map(|sink| {
            let event = &event;
            async move { (sink.name().to_string(), sink.record(event).await) }
        });
        futures::future::join_all(futures).await
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FleetEvent;

    #[tokio::test]
    async fn record_delivers_to_every_sink() {
        let a = Arc::new(InMemorySink::new());
        let b = Arc::new(InMemorySink::new());
        let bus = EventBus::with_sinks(vec![a.clone(), b.clone()]);

        bus.record(FleetEvent::AutoDestroy {
            instance_id: 1,
            paused_hours: 6.5,
            timestamp: chrono::Utc::now(),
        })
        .await;

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a.events()[0].kind(), "auto_destroy");
    }

    #[tokio::test]
    async fn bus_with_no_sinks_is_a_no_op() {
        let bus = EventBus::new();
        bus.record(FleetEvent::AutoDestroy {
            instance_id: 1,
            paused_hours: 1.0,
            timestamp: chrono::Utc::now(),
        })
        .await;
        assert_eq!(bus.sink_count(), 0);
    }

    #[tokio::test]
    async fn record_and_collect_reports_sink_name() {
        let sink = Arc::new(InMemorySink::new());
        let bus = EventBus::with_sinks(vec![sink]);
        let results = bus
            .record_and_collect(FleetEvent::ScaleUp {
                instance_id: 3,
                user_id: Some("u1".into()),
                checkpoint_restored: true,
                paused_secs: 120,
                timestamp: chrono::Utc::now(),
            })
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "memory");
        assert!(results[0].1.is_ok());
    }
}
