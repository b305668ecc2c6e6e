use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::channel::{ChannelError, ChannelSender};
use super::ofi::OfiCalculator;
use super::validator::TickValidator;
use crate::binance::types::parse_trade;
use crate::error::AppError;
use crate::metrics::PipelineMetrics;
use crate::model::tick::{RawTick, Tick};
use crate::source::TickSource;

/// Per-stream cleaning state. Each stream owns one; nothing is shared.
#[derive(Debug, Clone)]
pub struct TickProcessor {
    validator: TickValidator,
    ofi: OfiCalculator,
}

impl TickProcessor {
    pub fn new(max_price_jump: f64, window_seconds: u64) -> Self {
        Self {
            validator: TickValidator::new(max_price_jump, window_seconds),
            ofi: OfiCalculator::new(),
        }
    }

    /// Validate and annotate one trade. `Ok(None)` when the validator drops it.
    pub fn process(&mut self, raw: &RawTick) -> Result<Option<Tick>, AppError> {
        let tick = Tick::from_raw(raw).ok_or_else(|| {
            AppError::MalformedTick(format!("timestamp {} out of range", raw.event_time_ms))
        })?;
        let Some(mut tick) = self.validator.adjust(tick) else {
            return Ok(None);
        };
        tick.ofi = self.ofi.compute(&tick);
        Ok(Some(tick))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    pub received: u64,
    pub dropped: u64,
    pub forwarded: u64,
}

/// Producer side: source → validator → OFI → channel.
pub struct Collector<S> {
    source: S,
    tx: ChannelSender<Tick>,
    processor: TickProcessor,
    metrics: Arc<PipelineMetrics>,
    stats: CollectorStats,
}

impl<S: TickSource> Collector<S> {
    pub fn new(
        source: S,
        tx: ChannelSender<Tick>,
        processor: TickProcessor,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            source,
            tx,
            processor,
            metrics,
            stats: CollectorStats::default(),
        }
    }

    /// Runs until cancelled or the writer goes away (`Ok`), or until the source
    /// closes, fails, or sends a payload that does not parse (`Err`).
    pub async fn run(mut self, cancel: CancellationToken) -> Result<CollectorStats> {
        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.stats),
                msg = self.source.next_message() => msg.context("tick source failed")?,
            };
            let Some(text) = msg else {
                return Err(AppError::SourceClosed.into());
            };
            self.stats.received += 1;

            let raw = parse_trade(&text).with_context(|| {
                format!("unparseable message #{}: {}", self.stats.received, truncate(&text, 200))
            })?;
            let Some(tick) = self.processor.process(&raw)? else {
                self.stats.dropped += 1;
                self.metrics.inc_dropped();
                tracing::debug!(
                    event_time_ms = raw.event_time_ms,
                    price = raw.price,
                    "Dropped tick without a valid reference price"
                );
                continue;
            };
            self.metrics.inc_ofi();
            let tick_epoch_s = tick.epoch_seconds();

            match self.tx.push(tick, &cancel).await {
                Ok(()) => {}
                Err(ChannelError::Cancelled) => return Ok(self.stats),
                Err(ChannelError::Closed) => {
                    // The writer reports its own failure.
                    tracing::warn!("Batch writer hung up, stopping collector");
                    return Ok(self.stats);
                }
            }
            self.stats.forwarded += 1;
            self.metrics.record_tick_time(tick_epoch_s);
            self.metrics.set_queue_depth(self.tx.len());
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(ms: u64, price: f64, qty: f64, is_buyer_maker: bool) -> RawTick {
        RawTick {
            event_time_ms: ms,
            price,
            qty,
            is_buyer_maker,
        }
    }

    #[test]
    fn processor_chains_validator_and_ofi() {
        let mut p = TickProcessor::new(0.05, 300);
        assert!(p.process(&raw(1_000, -5.0, 1.0, false)).unwrap().is_none());

        let first = p.process(&raw(2_500, 100.0, 1.0, false)).unwrap().unwrap();
        assert_eq!(first.ofi, 0.0);
        assert_eq!(first.epoch_seconds(), 2);

        let second = p.process(&raw(3_000, 110.0, 1.0, true)).unwrap().unwrap();
        assert!((second.price - 105.0).abs() < 1e-9);
        assert_eq!(second.ofi, -1.0);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
