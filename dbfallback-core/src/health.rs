//! Degradation reporting.
//!
//! When the factory falls back from the external database to the embedded
//! one it records a degraded event on an injected [`HealthSink`]. The sink
//! is the surrounding system's health tracker; this crate ships an
//! in-memory implementation for tests and a tracing-backed one for hosts
//! that only want the event logged.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adapters::ConnectionStatus;

/// Overall health of the adapter layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The configured backend is serving requests.
    Healthy,
    /// External mode is configured but the embedded fallback is active.
    Degraded,
}

/// A recorded health transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    /// Status at the time of the event.
    pub status: HealthStatus,
    /// Human-readable reasons (connection strings redacted).
    pub reasons: Vec<String>,
    /// When the event was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Receiver for health transitions emitted by the factory.
pub trait HealthSink: Send + Sync {
    /// Records a health transition with its reasons.
    fn record(&self, status: HealthStatus, reasons: &[String]);
}

/// Health sink that keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryHealthSink {
    events: Mutex<Vec<HealthEvent>>,
}

impl MemoryHealthSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all recorded events.
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl HealthSink for MemoryHealthSink {
    fn record(&self, status: HealthStatus, reasons: &[String]) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(HealthEvent {
                status,
                reasons: reasons.to_vec(),
                recorded_at: Utc::now(),
            });
    }
}

/// Health sink that forwards events to the tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingHealthSink;

impl HealthSink for TracingHealthSink {
    fn record(&self, status: HealthStatus, reasons: &[String]) {
        match status {
            HealthStatus::Healthy => tracing::info!(reasons = ?reasons, "adapter layer healthy"),
            HealthStatus::Degraded => {
                tracing::warn!(reasons = ?reasons, "adapter layer degraded");
            }
        }
    }
}

/// Health summary returned by the factory for dashboard display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Active adapter kind ("embedded" or "external").
    pub adapter_type: String,
    /// Whether the embedded fallback replaced a configured external backend.
    pub fallback_active: bool,
    /// Whether the active adapter currently answers a connectivity probe.
    pub connected: bool,
    /// Connection details of the active adapter.
    pub connection_details: ConnectionStatus,
    /// Overall status derived from the fallback flag.
    pub health_status: HealthStatus,
    /// When this summary was computed.
    pub last_check: DateTime<Utc>,
}
