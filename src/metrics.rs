use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::path::Path;
use std::time::Duration;

/// Metric name prefix for all preview pipeline metrics
const PREFIX: &str = "catalog_previews";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Per-song outcomes
    pub static ref SONGS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_songs_total"), "Songs processed by outcome"),
        &["outcome"]
    ).expect("Failed to create songs_total metric");

    pub static ref SONG_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_song_duration_seconds"),
            "Wall time spent on one song"
        )
        .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0])
    ).expect("Failed to create song_duration_seconds metric");

    // Download Metrics
    pub static ref DOWNLOAD_ATTEMPTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_download_attempts_total"), "Download attempts by strategy"),
        &["strategy", "result"]
    ).expect("Failed to create download_attempts_total metric");

    // Transcode Metrics
    pub static ref TRANSCODE_RUNGS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_transcode_rungs_total"), "Transcode ladder rungs by result"),
        &["rung", "result"]
    ).expect("Failed to create transcode_rungs_total metric");

    // Verification Metrics
    pub static ref DUPLICATE_WARNINGS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_duplicate_warnings_total"),
        "Clips whose content hash belongs to another song"
    ).expect("Failed to create duplicate_warnings_total metric");
}

/// Register all metrics with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(SONGS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SONG_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(DOWNLOAD_ATTEMPTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TRANSCODE_RUNGS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DUPLICATE_WARNINGS_TOTAL.clone()));

    tracing::debug!("Metrics system initialized");
}

/// Record the outcome of one song
pub fn record_song(outcome: &str, duration: Duration) {
    SONGS_TOTAL.with_label_values(&[outcome]).inc();
    SONG_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Record a download strategy attempt
pub fn record_download_attempt(strategy: &str, result: &str) {
    DOWNLOAD_ATTEMPTS_TOTAL
        .with_label_values(&[strategy, result])
        .inc();
}

/// Record a transcode rung attempt
pub fn record_transcode_rung(rung: &str, result: &str) {
    TRANSCODE_RUNGS_TOTAL
        .with_label_values(&[rung, result])
        .inc();
}

/// Record a duplicate content warning
pub fn record_duplicate_warning() {
    DUPLICATE_WARNINGS_TOTAL.inc();
}

/// Render the registry in the Prometheus text format.
pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Write the rendered registry to a file (for the node exporter textfile collector).
pub fn write_metrics_file(path: &Path) -> anyhow::Result<()> {
    let text = render()?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
