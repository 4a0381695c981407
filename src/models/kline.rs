use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

/// Normalized candlestick update as delivered to downstream clients.
///
/// Times are whole epoch seconds (upstream milliseconds are truncated);
/// prices and volume are parsed out of the exchange's decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineUpdate {
  pub time: u64,
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
  pub volume: f64,
}

/// A kline update tagged with its stream identity, as published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineEvent {
  pub symbol: String,
  pub interval: String,
  pub data: KlineUpdate,
}

#[derive(Debug, Clone, Deserialize)]
///
/// Kline payload as sent by the exchange (`k` field of the stream event)
///
pub struct KlinePayload {
  #[serde(rename = "t")]
  pub open_time_ms: u64,
  #[serde(rename = "i")]
  pub interval: String,
  #[serde(rename = "o")]
  pub open: String,
  #[serde(rename = "h")]
  pub high: String,
  #[serde(rename = "l")]
  pub low: String,
  #[serde(rename = "c")]
  pub close: String,
  #[serde(rename = "v")]
  pub volume: String,
}

#[derive(Debug, Clone, Deserialize)]
///
/// Kline stream event: symbol plus the nested candle payload
///
pub struct KlineFrame {
  #[serde(rename = "s")]
  pub symbol: String,
  #[serde(rename = "k")]
  pub kline: KlinePayload,
}

impl KlineFrame {
  /// Normalize the exchange frame into the bus event shape.
  pub fn normalize(&self) -> Result<KlineEvent, GatewayError> {
    Ok(KlineEvent {
      symbol: self.symbol.to_lowercase(),
      interval: self.kline.interval.clone(),
      data: KlineUpdate {
        time: self.kline.open_time_ms / 1000,
        open: parse_price(&self.kline.open)?,
        high: parse_price(&self.kline.high)?,
        low: parse_price(&self.kline.low)?,
        close: parse_price(&self.kline.close)?,
        volume: parse_price(&self.kline.volume)?,
      },
    })
  }
}

fn parse_price(raw: &str) -> Result<f64, GatewayError> {
  raw
    .parse::<f64>()
    .map_err(|e| GatewayError::Protocol(format!("bad decimal {:?}: {}", raw, e)))
}
