/// The always-on ticker firehose; pinned into every session's stream list
/// and excluded from reference counting.
pub const TICKER_STREAM: &str = "!ticker@arr";

/// Build the canonical kline stream name, e.g. `btcusdt@kline_1m`.
pub fn kline_stream(symbol: &str, interval: &str) -> String {
  format!("{}@kline_{}", symbol.to_lowercase(), interval)
}

/// Extract the base symbol from a stream name (`btcusdt@kline_1m` -> `btcusdt`).
pub fn base_symbol(stream: &str) -> &str {
  stream.split('@').next().unwrap_or(stream)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builds_lowercase_stream_names() {
    assert_eq!(kline_stream("BTCUSDT", "1m"), "btcusdt@kline_1m");
  }

  #[test]
  fn splits_base_symbol() {
    assert_eq!(base_symbol("xauusdt@kline_1h"), "xauusdt");
    assert_eq!(base_symbol("bare"), "bare");
  }
}
