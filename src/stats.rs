//! Audit latency, per-enforcement-action violation totals, and last-run
//! timestamps. A passive sink: the audit loop records values,
//! this module only owns the Prometheus registrations.
//!
//! Static `LazyLock<Histogram/IntGaugeVec>` registered once against a
//! shared `Registry`, scraped by a `/metrics` axum route.

use std::sync::LazyLock;

use prometheus::{Encoder, Histogram, HistogramOpts, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::types::EnforcementAction;

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static AUDIT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    // Minute-scale buckets: audits of this subsystem are expected to run
    // anywhere from sub-second (small clusters) to several minutes.
    let h = Histogram::with_opts(
        HistogramOpts::new("audit_duration_seconds", "Duration of each audit tick in seconds")
            .buckets(vec![
                0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0,
            ]),
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(h.clone())).expect("metric not yet registered");
    h
});

static VIOLATIONS_BY_ACTION: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        Opts::new("audit_violations_total", "Last-observed violation count per enforcement action"),
        &["enforcement_action"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

static RUN_START: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(Opts::new("audit_run_start_seconds", "Epoch seconds of the last audit run start"), &[])
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

static RUN_END: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(Opts::new("audit_run_end_seconds", "Epoch seconds of the last audit run end"), &[])
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

/// Force registration of every metric so they appear on `/metrics` even
/// before the first tick.
pub fn init() {
    LazyLock::force(&AUDIT_DURATION);
    LazyLock::force(&VIOLATIONS_BY_ACTION);
    LazyLock::force(&RUN_START);
    LazyLock::force(&RUN_END);
}

/// Render the current registry in Prometheus text exposition format.
pub fn render() -> String {
    let metric_families = REGISTRY.gather();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&metric_families, &mut buf)
        .expect("prometheus text encoding cannot fail for well-formed metrics");
    String::from_utf8(buf).expect("prometheus text encoder always emits UTF-8")
}

/// Thin wrapper so the audit loop records through one object rather than
/// touching the statics directly — makes it trivial to hand a no-op
/// reporter to unit tests that don't care about metrics.
#[derive(Clone, Copy, Default)]
pub struct StatsReporter;

impl StatsReporter {
    pub fn new() -> Self {
        init();
        StatsReporter
    }

    pub fn record_run_start(&self, epoch_seconds: i64) {
        RUN_START.with_label_values(&[]).set(epoch_seconds);
    }

    pub fn record_run_end(&self, epoch_seconds: i64) {
        RUN_END.with_label_values(&[]).set(epoch_seconds);
    }

    pub fn record_duration(&self, seconds: f64) {
        AUDIT_DURATION.observe(seconds);
    }

    /// Set the `{action -> count}` gauge. Missing actions (no violations
    /// observed this tick) are not zeroed here — callers pre-populate the
    /// map with zero for every known action before this call.
    pub fn record_violations_by_action(&self, counts: &std::collections::HashMap<EnforcementAction, i64>) {
        for (action, count) in counts {
            VIOLATIONS_BY_ACTION
                .with_label_values(&[&action.to_string()])
                .set(*count);
        }
    }
}
