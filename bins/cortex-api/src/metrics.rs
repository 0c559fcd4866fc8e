// Prometheus metrics for the Cortex API

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Once;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Accepted submissions (language label)
    pub static ref SUBMISSIONS_ACCEPTED: CounterVec = CounterVec::new(
        Opts::new("cortex_submissions_accepted_total", "Total submissions queued for execution"),
        &["language"]
    )
    .expect("metric can be created");

    // Rejected submissions (validation reason)
    pub static ref SUBMISSIONS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("cortex_submissions_rejected_total", "Total submissions rejected at validation"),
        &["reason"]
    )
    .expect("metric can be created");

    // Result polls (ready / pending / error)
    pub static ref RESULT_POLLS: CounterVec = CounterVec::new(
        Opts::new("cortex_result_polls_total", "Total result lookups"),
        &["outcome"]
    )
    .expect("metric can be created");

    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "cortex_queue_depth",
        "Tasks waiting in the execution queue"
    )
    .expect("metric can be created");
}

static INIT: Once = Once::new();

/// Register collectors. Safe to call more than once.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(SUBMISSIONS_ACCEPTED.clone()))
            .expect("collector can be registered");

        REGISTRY
            .register(Box::new(SUBMISSIONS_REJECTED.clone()))
            .expect("collector can be registered");

        REGISTRY
            .register(Box::new(RESULT_POLLS.clone()))
            .expect("collector can be registered");

        REGISTRY
            .register(Box::new(QUEUE_DEPTH.clone()))
            .expect("collector can be registered");
    });
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub fn record_submission_accepted(language: &str) {
    SUBMISSIONS_ACCEPTED.with_label_values(&[language]).inc();
}

pub fn record_submission_rejected(reason: &str) {
    SUBMISSIONS_REJECTED.with_label_values(&[reason]).inc();
}

pub fn record_result_poll(outcome: &str) {
    RESULT_POLLS.with_label_values(&[outcome]).inc();
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as i64);
}
