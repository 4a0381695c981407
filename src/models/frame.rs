use serde::Deserialize;

use super::kline::KlineFrame;
use super::ticker::TickerItem;

#[derive(Debug, Clone, Deserialize)]
///
/// Combined-streams envelope: `{"stream": "<name>", "data": <payload>}`
///
pub struct CombinedFrame {
  pub stream: String,
  pub data: StreamPayload,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
///
/// Payload carried inside the envelope. The ticker firehose is the only
/// array-shaped payload, so the two variants never overlap.
///
pub enum StreamPayload {
  Tickers(Vec<TickerItem>),
  Kline(KlineFrame),
}
