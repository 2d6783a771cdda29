// Prometheus metrics for Verdict API

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};
use verdict_common::Mode;
use verdict_core::{EvaluationOutcome, EvaluationState};

lazy_static! {
    // Global registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Evaluations started (by mode)
    pub static ref EVALUATIONS_STARTED: CounterVec = CounterVec::new(
        Opts::new("verdict_evaluations_started_total", "Total number of evaluations started"),
        &["mode"]
    )
    .expect("metric can be created");

    // Evaluations finished (verdict or failure label)
    pub static ref EVALUATIONS_FINISHED: CounterVec = CounterVec::new(
        Opts::new("verdict_evaluations_finished_total", "Total number of evaluations finished"),
        &["mode", "status"]
    )
    .expect("metric can be created");

    pub static ref EVALUATION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "verdict_evaluation_duration_ms",
            "End-to-end evaluation time in milliseconds"
        )
        .buckets(vec![100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]),
        &["mode"]
    )
    .expect("metric can be created");

    // Requests rejected before an evaluation started
    pub static ref EVALUATIONS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("verdict_evaluations_rejected_total", "Total evaluation requests rejected"),
        &["reason"]
    )
    .expect("metric can be created");

    pub static ref EVALUATIONS_CANCELLED: CounterVec = CounterVec::new(
        Opts::new("verdict_evaluations_cancelled_total", "Total evaluations cancelled"),
        &["source"]
    )
    .expect("metric can be created");

    pub static ref PERSISTENCE_FAILURES: IntCounter = IntCounter::new(
        "verdict_persistence_failures_total",
        "Submissions evaluated but not persisted"
    )
    .expect("metric can be created");
}

/// Initialize metrics registry
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(EVALUATIONS_STARTED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(EVALUATIONS_FINISHED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(EVALUATION_DURATION.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(EVALUATIONS_REJECTED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(EVALUATIONS_CANCELLED.clone()))
        .expect("collector can be registered");

    REGISTRY
        .register(Box::new(PERSISTENCE_FAILURES.clone()))
        .expect("collector can be registered");
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Verdict for completed evaluations, failure kind otherwise
pub fn outcome_label(outcome: &EvaluationOutcome) -> &'static str {
    match &outcome.state {
        EvaluationState::Completed { status, .. } => status.as_str(),
        EvaluationState::Failed { reason, .. } => reason.label(),
        other => other.name(),
    }
}

pub fn record_started(mode: Mode) {
    EVALUATIONS_STARTED
        .with_label_values(&[&mode.to_string()])
        .inc();
}

pub fn record_finished(mode: Mode, outcome: &EvaluationOutcome, duration_ms: f64) {
    let mode = mode.to_string();
    EVALUATIONS_FINISHED
        .with_label_values(&[&mode, outcome_label(outcome)])
        .inc();
    EVALUATION_DURATION
        .with_label_values(&[&mode])
        .observe(duration_ms);
    if outcome.persistence_warning.is_some() {
        PERSISTENCE_FAILURES.inc();
    }
}

pub fn record_rejected(reason: &str) {
    EVALUATIONS_REJECTED.with_label_values(&[reason]).inc();
}

pub fn record_cancelled(source: &str) {
    EVALUATIONS_CANCELLED.with_label_values(&[source]).inc();
}
