// Prometheus metrics for the netprobe server
//
// Exposes metrics on the /metrics HTTP endpoint:
// - Active sessions (gauge)
// - Commands by kind and outcome (counter)
// - Command durations (histogram)
// - Throttled admissions (counter)
// - Tracked rate-limit buckets (gauge)

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramVec, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::sync::{Arc, Once};

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Session metrics
    pub static ref SESSIONS_ACTIVE: IntGauge = IntGauge::new(
        "netprobe_sessions_active",
        "Number of currently open sessions"
    ).expect("Failed to create active sessions metric");

    pub static ref SESSIONS_TOTAL: IntCounter = IntCounter::new(
        "netprobe_sessions_total",
        "Total number of sessions opened since start"
    ).expect("Failed to create sessions total metric");

    // Command metrics
    pub static ref COMMANDS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("netprobe_commands_total", "Total number of probe commands by outcome"),
        &["kind", "status"]
    ).expect("Failed to create commands total metric");

    pub static ref COMMAND_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("netprobe_command_duration_seconds", "Probe command duration in seconds"),
        &["kind"]
    ).expect("Failed to create command duration metric");

    // Admission metrics
    pub static ref ADMISSIONS_THROTTLED_TOTAL: IntCounter = IntCounter::new(
        "netprobe_admissions_throttled_total",
        "Total number of connections rejected by the rate limiter"
    ).expect("Failed to create throttled admissions metric");

    pub static ref RATE_LIMIT_BUCKETS: IntGauge = IntGauge::new(
        "netprobe_rate_limit_buckets",
        "Number of tracked rate-limit buckets"
    ).expect("Failed to create rate limit buckets metric");
}

static INIT: Once = Once::new();

/// Register all metrics with the registry.
///
/// Safe to call more than once; registration happens on the first call.
pub fn init() -> prometheus::Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = register_all();
    });
    result
}

fn register_all() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(SESSIONS_ACTIVE.clone()))?;
    REGISTRY.register(Box::new(SESSIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMANDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMAND_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(ADMISSIONS_THROTTLED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RATE_LIMIT_BUCKETS.clone()))?;
    Ok(())
}

/// Record the outcome of one command
pub fn record_command(kind: &str, status: &str) {
    COMMANDS_TOTAL.with_label_values(&[kind, status]).inc();
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
