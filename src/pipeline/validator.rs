use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

use crate::model::tick::Tick;

const MAX_WINDOW_SECONDS: i64 = i64::MAX / 1_000;

/// Per-stream price/quantity repair.
///
/// Prices are clamped to within `max_price_jump` of the previous accepted price.
/// Quantities are clamped into the `[min, max]` range observed over a trailing
/// time window that includes the tick being adjusted.
#[derive(Debug, Clone)]
pub struct TickValidator {
    max_price_jump: f64,
    window: Duration,
    last_price: Option<f64>,
    qty_history: VecDeque<(DateTime<Utc>, f64)>,
}

impl TickValidator {
    pub fn new(max_price_jump: f64, window_seconds: u64) -> Self {
        Self {
            max_price_jump,
            window: Duration::seconds(
                i64::try_from(window_seconds)
                    .unwrap_or(i64::MAX)
                    .min(MAX_WINDOW_SECONDS),
            ),
            last_price: None,
            qty_history: VecDeque::new(),
        }
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    pub fn window_len(&self) -> usize {
        self.qty_history.len()
    }

    /// Oldest timestamp still inside the quantity window.
    pub fn window_start(&self) -> Option<DateTime<Utc>> {
        self.qty_history.front().map(|(ts, _)| *ts)
    }

    /// Repair `tick` in place. Returns `None` when the price is non-positive and
    /// there is no earlier price to fall back on.
    pub fn adjust(&mut self, mut tick: Tick) -> Option<Tick> {
        let price = tick.price;
        let qty = tick.qty;

        if price <= 0.0 {
            tick.price = self.last_price?;
        } else if let Some(last) = self.last_price.filter(|p| *p > 0.0) {
            let delta = (price - last) / last;
            if delta.abs() > self.max_price_jump {
                let sign = if delta > 0.0 { 1.0 } else { -1.0 };
                tick.price = last * (1.0 + self.max_price_jump * sign);
            }
        }
        self.last_price = Some(tick.price);

        self.qty_history.push_back((tick.ts, qty));
        if let Some(cutoff) = tick.ts.checked_sub_signed(self.window) {
            self.evict_before(cutoff);
        }

        if let Some((min_qty, max_qty)) = self.qty_bounds() {
            if qty > max_qty {
                tick.qty = max_qty;
            } else if qty <= 0.0 {
                tick.qty = min_qty;
            }
        }

        Some(tick)
    }

    fn evict_before(&mut self, cutoff: DateTime<Utc>) {
        while self
            .qty_history
            .front()
            .is_some_and(|(ts, _)| *ts < cutoff)
        {
            self.qty_history.pop_front();
        }
    }

    fn qty_bounds(&self) -> Option<(f64, f64)> {
        let mut iter = self.qty_history.iter().map(|(_, q)| *q);
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), q| (lo.min(q), hi.max(q))))
    }
}
