use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::backoff::ExponentialBackoff;
use super::channel::{ChannelError, ChannelReceiver};
use crate::config::SinkConfig;
use crate::metrics::PipelineMetrics;
use crate::model::tick::Tick;
use crate::sink::BatchSink;

/// Bounded retry around `insert_batch`. `max_retries = 0` propagates the
/// first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial: Duration::ZERO,
            max: Duration::ZERO,
        }
    }
}

impl From<&SinkConfig> for RetryPolicy {
    fn from(cfg: &SinkConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            initial: cfg.retry_initial(),
            max: cfg.retry_max(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub batches: u64,
    pub rows: u64,
    /// Rows still buffered at shutdown and never handed to the sink.
    pub discarded: u64,
}

/// Consumer side: channel → buffer → sink in `batch_size` chunks.
pub struct BatchWriter<K> {
    sink: K,
    rx: ChannelReceiver<Tick>,
    buffer: Vec<Tick>,
    batch_size: usize,
    flush_on_cancel: bool,
    retry: RetryPolicy,
    metrics: Arc<PipelineMetrics>,
    stats: WriterStats,
}

impl<K: BatchSink> BatchWriter<K> {
    pub fn new(
        sink: K,
        rx: ChannelReceiver<Tick>,
        batch_size: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            sink,
            rx,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            flush_on_cancel: false,
            retry: RetryPolicy::none(),
            metrics,
            stats: WriterStats::default(),
        }
    }

    pub fn with_flush_on_cancel(mut self, flush_on_cancel: bool) -> Self {
        self.flush_on_cancel = flush_on_cancel;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Runs until cancelled or the producer hangs up. Sink failures are
    /// returned to the caller.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<WriterStats> {
        loop {
            let tick = match self.rx.pop(&cancel).await {
                Ok(tick) => tick,
                Err(ChannelError::Cancelled) => return self.shutdown().await,
                Err(ChannelError::Closed) => {
                    tracing::info!("Producer hung up, stopping writer");
                    return self.shutdown().await;
                }
            };
            self.metrics.set_queue_depth(self.rx.len());
            self.buffer.push(tick);

            if self.buffer.len() >= self.batch_size {
                self.flush(&cancel).await?;
            }
        }
    }

    async fn shutdown(mut self) -> Result<WriterStats> {
        if self.flush_on_cancel {
            // The run token has already fired; retries still get their full budget.
            let drain = CancellationToken::new();
            while let Some(tick) = self.rx.try_pop() {
                self.buffer.push(tick);
                if self.buffer.len() >= self.batch_size {
                    self.flush(&drain).await?;
                }
            }
            if !self.buffer.is_empty() {
                tracing::info!(rows = self.buffer.len(), "Flushing partial batch on shutdown");
                self.flush(&drain).await?;
            }
        }
        if !self.buffer.is_empty() {
            tracing::warn!(
                rows = self.buffer.len(),
                "Discarding partial batch at shutdown"
            );
            self.stats.discarded += self.buffer.len() as u64;
            self.buffer.clear();
        }
        Ok(self.stats)
    }

    async fn flush(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut backoff = ExponentialBackoff::new(self.retry.initial, self.retry.max, 2.0);
        let mut attempt: u32 = 0;
        loop {
            match self.sink.insert_batch(&self.buffer).await {
                Ok(()) => break,
                Err(e) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        sink = self.sink.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %format!("{:#}", e),
                        "insert_batch failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(e).context("cancelled while retrying insert_batch");
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "insert_batch of {} rows into '{}' failed after {} attempt(s)",
                            self.buffer.len(),
                            self.sink.name(),
                            attempt + 1
                        )
                    });
                }
            }
        }

        let rows = self.buffer.len();
        self.stats.batches += 1;
        self.stats.rows += rows as u64;
        self.metrics.record_batch(rows);
        tracing::debug!(sink = self.sink.name(), rows, "Batch written");
        self.buffer.clear();
        Ok(())
    }
}
