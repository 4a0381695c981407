use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
///
/// Upstream venue a symbol is carried on
///
pub enum Venue {
  Spot,
  Deriv,
}

impl fmt::Display for Venue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Spot => write!(f, "SPOT"),
      Self::Deriv => write!(f, "DERIV"),
    }
  }
}

/// Result of classifying a symbol against the current registry snapshot.
///
/// `Unknown` covers symbols outside the snapshot and the window before the
/// first refresh completes; dynamic subscriptions for unknown symbols are
/// routed to the spot venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolClass {
  Spot,
  Deriv,
  Unknown,
}

impl SymbolClass {
  pub fn venue_or_default(self) -> Venue {
    match self {
      Self::Deriv => Venue::Deriv,
      Self::Spot | Self::Unknown => Venue::Spot,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
///
/// One tradable pair from the exchange universe
///
pub struct SymbolInfo {
  pub symbol: String,
  #[serde(rename = "baseAsset")]
  pub base_asset: String,
  #[serde(rename = "quoteAsset")]
  pub quote_asset: String,
  pub venue: Venue,
}
