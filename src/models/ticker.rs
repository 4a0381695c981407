use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// 24h ticker snapshot for one symbol, as delivered to downstream clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerEntry {
  #[serde(rename = "lastPrice")]
  pub last_price: f64,
  #[serde(rename = "priceChange")]
  pub price_change: f64,
  #[serde(rename = "priceChangePercent")]
  pub price_change_percent: f64,
}

/// One batched ticker dispatch: symbol (uppercase) to its 24h stats.
pub type TickerBatch = HashMap<String, TickerEntry>;

#[derive(Debug, Clone, Deserialize)]
///
/// One element of the exchange's `!ticker@arr` firehose
///
pub struct TickerItem {
  #[serde(rename = "s")]
  pub symbol: String,
  #[serde(rename = "c")]
  pub last_price: String,
  #[serde(rename = "p")]
  pub price_change: String,
  #[serde(rename = "P")]
  pub price_change_percent: String,
}

/// Filter a firehose batch down to the watched symbols, dropping items
/// whose decimal fields fail to parse.
pub fn filter_batch(items: &[TickerItem], watchlist: &HashSet<String>) -> TickerBatch {
  let mut updates = TickerBatch::new();
  for item in items {
    if !watchlist.contains(&item.symbol) {
      continue;
    }
    let entry = match parse_entry(item) {
      Some(entry) => entry,
      None => {
        log::debug!("dropping unparsable ticker item for {}", item.symbol);
        continue;
      }
    };
    updates.insert(item.symbol.clone(), entry);
  }
  updates
}

fn parse_entry(item: &TickerItem) -> Option<TickerEntry> {
  Some(TickerEntry {
    last_price: item.last_price.parse().ok()?,
    price_change: item.price_change.parse().ok()?,
    price_change_percent: item.price_change_percent.parse().ok()?,
  })
}
