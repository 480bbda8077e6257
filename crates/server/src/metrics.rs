use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static UPLOADS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static RETAINED_SUMMARIES: OnceLock<IntGauge> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> Option<&'static IntCounterVec> {
    if let Some(existing) = HTTP_REQUESTS_TOTAL.get() {
        return Some(existing);
    }
    let counter = IntCounterVec::new(
        Opts::new(
            "equipment_http_requests_total",
            "Equipment service HTTP request count.",
        ),
        &["route", "method", "status"],
    )
    .ok()?;
    Some(HTTP_REQUESTS_TOTAL.get_or_init(|| register_collector(counter)))
}

fn http_request_duration_seconds() -> Option<&'static HistogramVec> {
    if let Some(existing) = HTTP_REQUEST_DURATION_SECONDS.get() {
        return Some(existing);
    }
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "equipment_http_request_duration_seconds",
            "Equipment service HTTP request duration in seconds.",
        )
        .buckets(vec![
            0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["route", "method", "outcome"],
    )
    .ok()?;
    Some(HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| register_collector(histogram)))
}

fn uploads_total() -> Option<&'static IntCounterVec> {
    if let Some(existing) = UPLOADS_TOTAL.get() {
        return Some(existing);
    }
    let counter = IntCounterVec::new(
        Opts::new(
            "equipment_uploads_total",
            "Uploads processed, by outcome (accepted or error code).",
        ),
        &["outcome"],
    )
    .ok()?;
    Some(UPLOADS_TOTAL.get_or_init(|| register_collector(counter)))
}

fn retained_summaries() -> Option<&'static IntGauge> {
    if let Some(existing) = RETAINED_SUMMARIES.get() {
        return Some(existing);
    }
    let gauge = IntGauge::new(
        "equipment_retained_summaries",
        "Upload summaries currently retained.",
    )
    .ok()?;
    Some(RETAINED_SUMMARIES.get_or_init(|| register_collector(gauge)))
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    if let Some(counter) = http_requests_total() {
        counter
            .with_label_values(&[route, method, status_str.as_str()])
            .inc();
    }

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    if let Some(histogram) = http_request_duration_seconds() {
        histogram
            .with_label_values(&[route, method, outcome])
            .observe(duration.as_secs_f64());
    }
}

pub fn observe_upload(outcome: &str) {
    if let Some(counter) = uploads_total() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn set_retained_summaries(count: usize) {
    if let Some(gauge) = retained_summaries() {
        gauge.set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = http_requests_total();
    let _ = uploads_total();
    let _ = retained_summaries();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
