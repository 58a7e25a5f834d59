//! Metrics and tracing setup (C11).
//!
//! Metrics are process-global Prometheus collectors, registered once and
//! shared through `Metrics` so the dispatcher doesn't need a `Registry`
//! reference threaded everywhere. Tracing is plain `tracing` spans exported
//! through whatever subscriber [`crate::cli`] installs; there is no
//! OpenTelemetry collector here, just structured log output correlated by
//! `trace_id`.

use std::sync::LazyLock;

use prometheus::{HistogramVec, IntCounterVec, Opts, Registry};

static EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("warden_events_total", "Events dispatched, by rule and outcome"),
        &["rule", "actionner", "status"],
    )
    .expect("metric options are valid")
});

static ACTION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "warden_action_duration_seconds",
            "Wall-clock time spent running one actionner invocation",
        ),
        &["actionner"],
    )
    .expect("histogram options are valid")
});

/// Handle bundling the process-global collectors. Cheap to clone (the
/// underlying collectors are already globally shared), kept as a struct so
/// call sites don't reach for the statics directly.
#[derive(Clone, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Metrics {
        Metrics
    }

    /// Registers every collector into `registry`, typically the one
    /// exported at `/metrics`. Safe to call more than once per process;
    /// `already_reg` errors are swallowed since re-registration only
    /// happens in tests that build more than one ingress listener.
    pub fn register(&self, registry: &Registry) {
        let _ = registry.register(Box::new(EVENTS_TOTAL.clone()));
        let _ = registry.register(Box::new(ACTION_DURATION_SECONDS.clone()));
    }

    /// Increments the `events{status,actionner,rule}` counter once per
    /// terminal stage, `status` being one of `success`/`failure`/`ignored`.
    pub fn record_action(&self, rule: &str, actionner: &str, status: &str) {
        EVENTS_TOTAL.with_label_values(&[rule, actionner, status]).inc();
    }

    pub fn observe_action_duration(&self, actionner: &str, seconds: f64) {
        ACTION_DURATION_SECONDS
            .with_label_values(&[actionner])
            .observe(seconds);
    }
}

/// Installs the global `tracing` subscriber: JSON on stdout when
/// `json_logs` is set (production), human-readable otherwise (local
/// development), both driven by `RUST_LOG`/`WARDEN_LOG`.
pub fn init_tracing(json_logs: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env("WARDEN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt().with_env_filter(filter);
    if json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
