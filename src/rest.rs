//! Upstream REST adapter: exchange universe, historical klines and 24h
//! tickers on both venue base URLs.

use serde::Deserialize;

use crate::config::GatewayConfig;
use crate::errors::GatewayError;
use crate::models::{KlineUpdate, SymbolInfo, TickerBatch, TickerEntry, Venue};

#[derive(Clone)]
pub struct UpstreamRest {
  http: reqwest::Client,
  spot_base: String,
  deriv_base: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
  symbols: Vec<RawSymbol>,
}

#[derive(Debug, Deserialize)]
struct RawSymbol {
  symbol: String,
  #[serde(rename = "baseAsset")]
  base_asset: String,
  #[serde(rename = "quoteAsset")]
  quote_asset: String,
  status: String,
}

#[derive(Debug, Deserialize)]
struct Raw24hTicker {
  symbol: String,
  #[serde(rename = "lastPrice")]
  last_price: String,
  #[serde(rename = "priceChange")]
  price_change: String,
  #[serde(rename = "priceChangePercent")]
  price_change_percent: String,
  #[serde(rename = "quoteVolume", default)]
  quote_volume: String,
}

impl UpstreamRest {
  pub fn new(config: &GatewayConfig) -> Self {
    Self {
      http: reqwest::Client::new(),
      spot_base: config.spot_api_url.clone(),
      deriv_base: config.deriv_api_url.clone(),
    }
  }

  fn base(&self, venue: Venue) -> &str {
    match venue {
      Venue::Spot => &self.spot_base,
      Venue::Deriv => &self.deriv_base,
    }
  }

  /// Fetch the tradable universe for one venue, filtered to TRADING status.
  pub async fn exchange_info(
    &self,
    venue: Venue,
  ) -> Result<Vec<SymbolInfo>, GatewayError> {
    let url = format!("{}/exchangeInfo", self.base(venue));
    let info: ExchangeInfo = self.get_json(&url, &[]).await?;

    Ok(
      info
        .symbols
        .into_iter()
        .filter(|s| s.status == "TRADING")
        .map(|s| SymbolInfo {
          symbol: s.symbol,
          base_asset: s.base_asset,
          quote_asset: s.quote_asset,
          venue,
        })
        .collect(),
    )
  }

  /// Historical OHLCV, already normalized to seconds and floats.
  pub async fn klines(
    &self,
    venue: Venue,
    symbol: &str,
    interval: &str,
    limit: u32,
  ) -> Result<Vec<KlineUpdate>, GatewayError> {
    let url = format!("{}/klines", self.base(venue));
    let symbol = symbol.to_uppercase();
    let limit = limit.to_string();
    let params = [
      ("symbol", symbol.as_str()),
      ("interval", map_interval(interval)),
      ("limit", limit.as_str()),
    ];
    let rows: Vec<Vec<serde_json::Value>> = self.get_json(&url, &params).await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
      out.push(decode_kline_row(&row)?);
    }
    Ok(out)
  }

  /// 24h ticker stats for an explicit symbol list on one venue.
  pub async fn ticker_24h(
    &self,
    venue: Venue,
    symbols: &[String],
  ) -> Result<TickerBatch, GatewayError> {
    if symbols.is_empty() {
      return Ok(TickerBatch::new());
    }
    let upper: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
    let list = serde_json::to_string(&upper)
      .map_err(|e| GatewayError::UpstreamFetch(e.to_string()))?;

    let url = format!("{}/ticker/24hr", self.base(venue));
    let tickers: Vec<Raw24hTicker> =
      self.get_json(&url, &[("symbols", list.as_str())]).await?;

    let mut out = TickerBatch::new();
    for t in tickers {
      if let Some(entry) = decode_24h(&t) {
        out.insert(t.symbol.to_uppercase(), entry);
      }
    }
    Ok(out)
  }

  /// Every spot symbol ranked by descending 24h quote volume.
  pub async fn ranked_by_quote_volume(&self) -> Result<Vec<String>, GatewayError> {
    let url = format!("{}/ticker/24hr", self.base(Venue::Spot));
    let tickers: Vec<Raw24hTicker> = self.get_json(&url, &[]).await?;

    let mut ranked: Vec<(String, f64)> = tickers
      .into_iter()
      .filter_map(|t| {
        let volume = t.quote_volume.parse::<f64>().ok()?;
        Some((t.symbol, volume))
      })
      .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(ranked.into_iter().map(|(symbol, _)| symbol).collect())
  }

  async fn get_json<T: serde::de::DeserializeOwned>(
    &self,
    url: &str,
    params: &[(&str, &str)],
  ) -> Result<T, GatewayError> {
    self
      .http
      .get(url)
      .query(params)
      .send()
      .await
      .and_then(|resp| resp.error_for_status())
      .map_err(|e| GatewayError::UpstreamFetch(e.to_string()))?
      .json::<T>()
      .await
      .map_err(|e| GatewayError::UpstreamFetch(e.to_string()))
  }
}

/// Map charting-library interval aliases onto the exchange's supported set.
pub fn map_interval(interval: &str) -> &str {
  match interval {
    "60m" | "90m" => "1h",
    "2m" => "1m",
    "5d" | "1wk" => "1w",
    "1mo" | "3mo" => "1M",
    other => other,
  }
}

fn decode_kline_row(row: &[serde_json::Value]) -> Result<KlineUpdate, GatewayError> {
  // Row layout: 0 open time (ms), 1 open, 2 high, 3 low, 4 close, 5 volume, ...
  if row.len() < 6 {
    return Err(GatewayError::UpstreamFetch(format!(
      "short kline row: {} columns",
      row.len()
    )));
  }
  let time_ms = row[0]
    .as_u64()
    .ok_or_else(|| GatewayError::UpstreamFetch("bad kline open time".into()))?;
  let field = |idx: usize| -> Result<f64, GatewayError> {
    row[idx]
      .as_str()
      .and_then(|s| s.parse::<f64>().ok())
      .ok_or_else(|| {
        GatewayError::UpstreamFetch(format!("bad kline column {}", idx))
      })
  };

  Ok(KlineUpdate {
    time: time_ms / 1000,
    open: field(1)?,
    high: field(2)?,
    low: field(3)?,
    close: field(4)?,
    volume: field(5)?,
  })
}

fn decode_24h(raw: &Raw24hTicker) -> Option<TickerEntry> {
  Some(TickerEntry {
    last_price: raw.last_price.parse().ok()?,
    price_change: raw.price_change.parse().ok()?,
    price_change_percent: raw.price_change_percent.parse().ok()?,
  })
}
