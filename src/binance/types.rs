use serde::Deserialize;

use crate::error::AppError;
use crate::model::tick::RawTick;

/// Deserialize Binance string-encoded numbers to f64. Plain JSON numbers are accepted too.
pub fn string_or_number_to_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(deserializer)?;
    match v {
        serde_json::Value::String(s) => s.parse::<f64>().map_err(serde::de::Error::custom),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("invalid number")),
        _ => Err(serde::de::Error::custom("invalid numeric value")),
    }
}

/// Binance trade stream event (symbol@trade).
#[derive(Debug, Deserialize)]
pub struct BinanceTradeEvent {
    #[serde(rename = "e", default)]
    pub event_type: Option<String>,
    #[serde(rename = "E", default)]
    pub event_time: Option<u64>,
    #[serde(rename = "s", default)]
    pub symbol: Option<String>,
    #[serde(rename = "t", default)]
    pub trade_id: Option<u64>,
    #[serde(rename = "T")]
    pub trade_time: u64,
    #[serde(rename = "p", deserialize_with = "string_or_number_to_f64")]
    pub price: f64,
    #[serde(rename = "q", deserialize_with = "string_or_number_to_f64")]
    pub qty: f64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl From<BinanceTradeEvent> for RawTick {
    fn from(event: BinanceTradeEvent) -> Self {
        Self {
            event_time_ms: event.trade_time,
            price: event.price,
            qty: event.qty,
            is_buyer_maker: event.is_buyer_maker,
        }
    }
}

/// Parse one trade payload. Non-finite numbers are rejected as malformed.
pub fn parse_trade(text: &str) -> Result<RawTick, AppError> {
    let event: BinanceTradeEvent = serde_json::from_str(text)?;
    if !event.price.is_finite() || !event.qty.is_finite() {
        return Err(AppError::MalformedTick(format!(
            "non-finite price/qty in trade {:?}",
            event.trade_id
        )));
    }
    Ok(event.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_futures_trade_payload() {
        let text = r#"{"e":"trade","E":1700000000123,"T":1700000000100,"s":"BTCUSDT","t":42,"p":"37000.10","q":"0.005","X":"MARKET","m":true}"#;
        let raw = parse_trade(text).unwrap();
        assert_eq!(raw.event_time_ms, 1_700_000_000_100);
        assert!((raw.price - 37000.10).abs() < 1e-9);
        assert!((raw.qty - 0.005).abs() < 1e-12);
        assert!(raw.is_buyer_maker);
    }

    #[test]
    fn accepts_numeric_price_and_qty() {
        let raw = parse_trade(r#"{"T":1000,"p":1.5,"q":2,"m":false}"#).unwrap();
        assert_eq!(raw.price, 1.5);
        assert_eq!(raw.qty, 2.0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_trade("not json").is_err());
        assert!(parse_trade(r#"{"T":1000,"p":"abc","q":"1","m":false}"#).is_err());
        assert!(parse_trade(r#"{"p":"1","q":"1","m":false}"#).is_err());
    }
}
