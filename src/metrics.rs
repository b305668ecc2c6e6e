use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const NO_TICK_YET: i64 = i64::MIN;

/// Lock-free pipeline gauges and counters. Writers never wait on readers, so a
/// slow or absent scraper cannot stall ingestion.
#[derive(Debug)]
pub struct PipelineMetrics {
    last_tick_epoch_s: AtomicI64,
    queue_depth: AtomicUsize,
    ofi_computations: AtomicU64,
    ticks_dropped: AtomicU64,
    batches_written: AtomicU64,
    rows_written: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub ingestion_lag_seconds: Option<f64>,
    pub queue_depth: usize,
    pub ofi_computations: u64,
    pub ticks_dropped: u64,
    pub batches_written: u64,
    pub rows_written: u64,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            last_tick_epoch_s: AtomicI64::new(NO_TICK_YET),
            queue_depth: AtomicUsize::new(0),
            ofi_computations: AtomicU64::new(0),
            ticks_dropped: AtomicU64::new(0),
            batches_written: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
        }
    }
}

impl PipelineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_tick_time(&self, epoch_s: i64) {
        self.last_tick_epoch_s.store(epoch_s, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn inc_ofi(&self) {
        self.ofi_computations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self) {
        self.ticks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, rows: usize) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(rows as u64, Ordering::Relaxed);
    }

    /// Seconds between `now_epoch_s` and the last processed tick.
    pub fn ingestion_lag_seconds(&self, now_epoch_s: i64) -> Option<f64> {
        match self.last_tick_epoch_s.load(Ordering::Relaxed) {
            NO_TICK_YET => None,
            ts => Some(now_epoch_s.saturating_sub(ts) as f64),
        }
    }

    pub fn snapshot(&self, now_epoch_s: i64) -> MetricsSnapshot {
        MetricsSnapshot {
            ingestion_lag_seconds: self.ingestion_lag_seconds(now_epoch_s),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            ofi_computations: self.ofi_computations.load(Ordering::Relaxed),
            ticks_dropped: self.ticks_dropped.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
        }
    }

    /// Prometheus text exposition format.
    pub fn render(&self, now_epoch_s: i64) -> String {
        let snap = self.snapshot(now_epoch_s);
        let mut out = String::with_capacity(768);
        write_metric(
            &mut out,
            "ingestion_lag_seconds",
            "gauge",
            "Lag of ingestion behind real-time",
            snap.ingestion_lag_seconds.unwrap_or(0.0),
        );
        write_metric(
            &mut out,
            "queue_size",
            "gauge",
            "Ticks waiting in the collector to writer channel",
            snap.queue_depth as f64,
        );
        write_metric(
            &mut out,
            "ofi_rate_total",
            "counter",
            "Total OFI calculations performed",
            snap.ofi_computations as f64,
        );
        write_metric(
            &mut out,
            "ticks_dropped_total",
            "counter",
            "Ticks dropped by the validator",
            snap.ticks_dropped as f64,
        );
        write_metric(
            &mut out,
            "batches_written_total",
            "counter",
            "Batches persisted to the sink",
            snap.batches_written as f64,
        );
        write_metric(
            &mut out,
            "rows_written_total",
            "counter",
            "Rows persisted to the sink",
            snap.rows_written as f64,
        );
        out
    }
}

fn write_metric(out: &mut String, name: &str, kind: &str, help: &str, value: f64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
    let _ = writeln!(out, "{name} {value}");
}

async fn metrics_handler(State(metrics): State<Arc<PipelineMetrics>>) -> impl IntoResponse {
    let body = metrics.render(chrono::Utc::now().timestamp());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

pub fn router(metrics: Arc<PipelineMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Serve `/metrics` on `port` until `shutdown` fires.
pub async fn serve(metrics: Arc<PipelineMetrics>, port: u16, shutdown: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics server on {}", addr))?;
    tracing::info!(%addr, "Metrics server listening");
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("metrics server failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_is_none_until_first_tick() {
        let m = PipelineMetrics::default();
        assert_eq!(m.ingestion_lag_seconds(100), None);
        m.record_tick_time(90);
        assert_eq!(m.ingestion_lag_seconds(100), Some(10.0));
    }

    #[test]
    fn render_contains_all_series() {
        let m = PipelineMetrics::default();
        m.record_tick_time(95);
        m.set_queue_depth(7);
        m.inc_ofi();
        m.inc_ofi();
        m.inc_dropped();
        m.record_batch(1000);

        let text = m.render(100);
        assert!(text.contains("# TYPE ingestion_lag_seconds gauge"));
        assert!(text.contains("ingestion_lag_seconds 5\n"));
        assert!(text.contains("queue_size 7\n"));
        assert!(text.contains("ofi_rate_total 2\n"));
        assert!(text.contains("ticks_dropped_total 1\n"));
        assert!(text.contains("batches_written_total 1\n"));
        assert!(text.contains("rows_written_total 1000\n"));
    }
}
