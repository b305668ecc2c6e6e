use crate::model::tick::Tick;

/// Order-flow imbalance proxy: signed trade size.
///
/// The first tick of a stream only seeds the reference price and scores 0.0.
/// `last_price` is tracked but does not feed the value; downstream analytics
/// depend on this exact definition.
#[derive(Debug, Clone, Default)]
pub struct OfiCalculator {
    last_price: Option<f64>,
}

impl OfiCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    pub fn compute(&mut self, tick: &Tick) -> f64 {
        if self.last_price.is_none() {
            self.last_price = Some(tick.price);
            return 0.0;
        }
        let ofi = tick.side.sign() * tick.qty;
        self.last_price = Some(tick.price);
        ofi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tick::Side;
    use chrono::{TimeZone, Utc};

    fn tick(price: f64, qty: f64, side: Side) -> Tick {
        Tick {
            ts: Utc.timestamp_opt(0, 0).unwrap(),
            price,
            qty,
            side,
            ofi: 0.0,
        }
    }

    #[test]
    fn first_call_is_zero_then_signed_qty() {
        let mut ofi = OfiCalculator::new();
        assert_eq!(ofi.compute(&tick(100.0, 5.0, Side::Sell)), 0.0);
        assert_eq!(ofi.last_price(), Some(100.0));
        assert_eq!(ofi.compute(&tick(101.0, 2.5, Side::Buy)), 2.5);
        assert_eq!(ofi.compute(&tick(99.0, 1.5, Side::Sell)), -1.5);
        assert_eq!(ofi.last_price(), Some(99.0));
    }

    #[test]
    fn price_does_not_affect_magnitude() {
        let mut a = OfiCalculator::new();
        let mut b = OfiCalculator::new();
        a.compute(&tick(100.0, 1.0, Side::Buy));
        b.compute(&tick(1.0, 1.0, Side::Buy));
        assert_eq!(
            a.compute(&tick(200.0, 3.0, Side::Buy)),
            b.compute(&tick(2.0, 3.0, Side::Buy))
        );
    }
}
