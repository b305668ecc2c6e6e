use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

/// Trade as delivered by the feed, before any cleaning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawTick {
    pub event_time_ms: u64,
    pub price: f64,
    pub qty: f64,
    pub is_buyer_maker: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// A trade where the buyer was the resting order hit a bid, i.e. an aggressive sell.
    pub fn from_buyer_maker(is_buyer_maker: bool) -> Self {
        if is_buyer_maker {
            Self::Sell
        } else {
            Self::Buy
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline record. `price`/`qty` may be repaired by the validator before
/// `ofi` is attached; the record is immutable once it enters the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub ts: DateTime<Utc>,
    pub price: f64,
    pub qty: f64,
    pub side: Side,
    pub ofi: f64,
}

impl Tick {
    /// Build a record from a raw trade, truncating the timestamp to whole seconds.
    /// Returns `None` when the exchange time is out of chrono's range.
    pub fn from_raw(raw: &RawTick) -> Option<Self> {
        let secs = i64::try_from(raw.event_time_ms / 1000).ok()?;
        let ts = Utc.timestamp_opt(secs, 0).single()?;
        Some(Self {
            ts,
            price: raw.price,
            qty: raw.qty,
            side: Side::from_buyer_maker(raw.is_buyer_maker),
            ofi: 0.0,
        })
    }

    pub fn epoch_seconds(&self) -> i64 {
        self.ts.timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_truncates_to_seconds_and_maps_side() {
        let raw = RawTick {
            event_time_ms: 1_700_000_000_999,
            price: 100.0,
            qty: 2.0,
            is_buyer_maker: true,
        };
        let tick = Tick::from_raw(&raw).unwrap();
        assert_eq!(tick.epoch_seconds(), 1_700_000_000);
        assert_eq!(tick.side, Side::Sell);
        assert_eq!(tick.ofi, 0.0);

        let raw = RawTick {
            is_buyer_maker: false,
            ..raw
        };
        assert_eq!(Tick::from_raw(&raw).unwrap().side, Side::Buy);
    }

    #[test]
    fn side_text_form() {
        assert_eq!(Side::Buy.to_string(), "buy");
        assert_eq!(Side::Sell.as_str(), "sell");
        assert_eq!(Side::Sell.sign(), -1.0);
    }
}
