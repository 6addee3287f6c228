use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Gateway metrics: authentication outcomes, authorization decisions by
/// reason, decision latency, live sessions and forced closes.
pub struct GatewayMetrics {
    pub auth_success: IntCounter,
    pub auth_failure: IntCounter,
    pub decisions: IntCounterVec,
    pub decision_latency: Histogram,
    pub active_sessions: IntGauge,
    pub forced_closes: IntCounter,
    pub registry: Registry,
}

impl GatewayMetrics {
    pub fn new() -> crate::Result<Arc<Self>> {
        let registry = Registry::new();

        let auth_success = IntCounter::new(
            "gateway_auth_success_total",
            "Successful authentications",
        )?;
        let auth_failure = IntCounter::new(
            "gateway_auth_failure_total",
            "Failed authentications",
        )?;
        let decisions = IntCounterVec::new(
            Opts::new(
                "gateway_decisions_total",
                "Authorization decisions by outcome reason",
            ),
            &["operation", "outcome"],
        )?;
        let decision_latency = Histogram::with_opts(prometheus::HistogramOpts::new(
            "gateway_decision_latency_seconds",
            "Authorization decision latency",
        ))?;
        let active_sessions = IntGauge::new(
            "gateway_active_sessions",
            "Live broker sessions tracked by the gateway",
        )?;
        let forced_closes = IntCounter::new(
            "gateway_forced_closes_total",
            "Connections force-closed on credential expiry",
        )?;

        registry.register(Box::new(auth_success.clone()))?;
        registry.register(Box::new(auth_failure.clone()))?;
        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(decision_latency.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(forced_closes.clone()))?;

        Ok(Arc::new(Self {
            auth_success,
            auth_failure,
            decisions,
            decision_latency,
            active_sessions,
            forced_closes,
            registry,
        }))
    }
}
