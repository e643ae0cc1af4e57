//! Prometheus metrics for cache synchronization observability.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `cellview_sessions_active` | Gauge | — |
//! | `cellview_revalidation_ticks_total` | Counter | `status` (`ok`, `failed`) |
//! | `cellview_messages_total` | Counter | `outcome` (`sent`, `dropped`) |
//!
//! Dropped messages are expected during disconnect races and are counted
//! here rather than surfaced as errors.

use prometheus::{CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors from metrics registration or encoding.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with the registry.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Failed to encode metrics output.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Counters and gauges for the cache subsystem.
///
/// All metrics use interior mutability; the struct is cheap to clone and
/// safe to share across session tasks.
#[derive(Clone)]
pub struct CacheMetrics {
    sessions_active: Gauge,
    revalidation_ticks: CounterVec,
    messages: CounterVec,
}

impl CacheMetrics {
    fn register(registry: &Registry) -> Result<Self, MetricsError> {
        let sessions_active = Gauge::with_opts(Opts::new(
            "cellview_sessions_active",
            "Number of viewer sessions with a running revalidation task",
        ))?;
        let revalidation_ticks = CounterVec::new(
            Opts::new(
                "cellview_revalidation_ticks_total",
                "Revalidation passes by completion status",
            ),
            &["status"],
        )?;
        let messages = CounterVec::new(
            Opts::new(
                "cellview_messages_total",
                "Outbound cache messages by delivery outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(sessions_active.clone()))?;
        registry.register(Box::new(revalidation_ticks.clone()))?;
        registry.register(Box::new(messages.clone()))?;

        Ok(Self {
            sessions_active,
            revalidation_ticks,
            messages,
        })
    }

    /// Records a session entering the ACTIVE state.
    pub fn session_started(&self) {
        self.sessions_active.inc();
    }

    /// Records a session leaving the ACTIVE state.
    pub fn session_ended(&self) {
        self.sessions_active.dec();
    }

    /// Records a completed revalidation pass.
    pub fn tick_completed(&self) {
        self.revalidation_ticks.with_label_values(&["ok"]).inc();
    }

    /// Records a pass aborted by a collaborator failure.
    pub fn tick_failed(&self) {
        self.revalidation_ticks.with_label_values(&["failed"]).inc();
    }

    /// Records a message accepted by a viewer transport.
    pub fn message_sent(&self) {
        self.messages.with_label_values(&["sent"]).inc();
    }

    /// Records a message dropped because its transport was torn down.
    pub fn message_dropped(&self) {
        self.messages.with_label_values(&["dropped"]).inc();
    }
}

/// Registry owning the subsystem's metrics, exportable in Prometheus text
/// format.
pub struct MetricsRegistry {
    registry: Registry,
    metrics: CacheMetrics,
}

impl MetricsRegistry {
    /// Creates a registry with all cache metrics registered.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let metrics = CacheMetrics::register(&registry)?;
        Ok(Self { registry, metrics })
    }

    /// A shareable handle to the registered metrics.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.clone()
    }

    /// Encodes all metrics for scraping.
    ///
    /// # Errors
    ///
    /// Returns an error if gathering or encoding fails.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_export() {
        let registry = MetricsRegistry::new().expect("register");
        let metrics = registry.metrics();

        metrics.session_started();
        metrics.tick_completed();
        metrics.tick_failed();
        metrics.message_sent();
        metrics.message_dropped();

        let text = registry.encode_text().expect("encode");
        assert!(text.contains("cellview_sessions_active 1"));
        assert!(text.contains("cellview_revalidation_ticks_total"));
        assert!(text.contains("cellview_messages_total"));
    }

    #[test]
    fn session_gauge_tracks_start_and_end() {
        let registry = MetricsRegistry::new().expect("register");
        let metrics = registry.metrics();

        metrics.session_started();
        metrics.session_started();
        metrics.session_ended();

        let text = registry.encode_text().expect("encode");
        assert!(text.contains("cellview_sessions_active 1"));
    }
}
