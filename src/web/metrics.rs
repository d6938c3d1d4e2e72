use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;
use salvo::http::header::{CONTENT_TYPE, HeaderValue};
use salvo::prelude::*;

static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);

static MESSAGES_FORWARDED: AtomicU64 = AtomicU64::new(0);
static FORWARD_FAILURES: AtomicU64 = AtomicU64::new(0);
static MESSAGES_DEAD_LETTERED: AtomicU64 = AtomicU64::new(0);
static INBOUND_INGESTED: AtomicU64 = AtomicU64::new(0);
static API_ERRORS: AtomicU64 = AtomicU64::new(0);
static FORWARDER_TICKS: AtomicU64 = AtomicU64::new(0);

/// Process-wide counters. Calls are fire-and-forget.
pub struct Metrics;

impl Metrics {
    /// Pins the uptime origin; call once at startup.
    pub fn start() {
        Lazy::force(&STARTED_AT);
    }

    pub fn uptime_seconds() -> u64 {
        STARTED_AT.elapsed().as_secs()
    }

    pub fn message_forwarded() {
        MESSAGES_FORWARDED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forward_failed() {
        FORWARD_FAILURES.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dead_lettered() {
        MESSAGES_DEAD_LETTERED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_ingested() {
        INBOUND_INGESTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn api_error() {
        API_ERRORS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forwarder_tick() {
        FORWARDER_TICKS.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn format_prometheus() -> String {
    let counters: [(&str, &str, &AtomicU64); 6] = [
        (
            "shopdesk_messages_forwarded_total",
            "Outbound messages accepted by the Graph API",
            &MESSAGES_FORWARDED,
        ),
        (
            "shopdesk_forward_failures_total",
            "Failed outbound delivery attempts",
            &FORWARD_FAILURES,
        ),
        (
            "shopdesk_messages_dead_lettered_total",
            "Outbound messages moved to the dead-letter state",
            &MESSAGES_DEAD_LETTERED,
        ),
        (
            "shopdesk_inbound_ingested_total",
            "Inbound customer messages stored",
            &INBOUND_INGESTED,
        ),
        (
            "shopdesk_api_errors_total",
            "API requests answered with an error status",
            &API_ERRORS,
        ),
        (
            "shopdesk_forwarder_ticks_total",
            "Forwarder polling ticks",
            &FORWARDER_TICKS,
        ),
    ];

    let mut out = String::new();
    let _ = writeln!(
        out,
        "# HELP shopdesk_uptime_seconds Seconds since the process started"
    );
    let _ = writeln!(out, "# TYPE shopdesk_uptime_seconds gauge");
    let _ = writeln!(out, "shopdesk_uptime_seconds {}\n", Metrics::uptime_seconds());

    for (name, help, counter) in counters {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name} {}\n", counter.load(Ordering::Relaxed));
    }
    out
}

#[handler]
pub async fn metrics_endpoint(res: &mut Response) {
    res.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    res.body(format_prometheus());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(text: &str, name: &str) -> u64 {
        text.lines()
            .find_map(|line| line.strip_prefix(&format!("{name} ")))
            .and_then(|value| value.trim().parse().ok())
            .expect("counter present")
    }

    #[test]
    fn counters_appear_in_exposition() {
        let before = counter_value(&format_prometheus(), "shopdesk_inbound_ingested_total");
        Metrics::inbound_ingested();
        Metrics::forwarder_tick();
        let text = format_prometheus();

        assert!(counter_value(&text, "shopdesk_inbound_ingested_total") > before);
        assert!(text.contains("# TYPE shopdesk_messages_forwarded_total counter"));
        assert!(text.contains("shopdesk_uptime_seconds"));
    }
}
