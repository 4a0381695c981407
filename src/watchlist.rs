use std::collections::HashSet;
use std::sync::Mutex;

/// Default watchlist anchors; present in the global watchlist no matter
/// which clients are connected.
pub const DEFAULT_WATCHLIST: [&str; 3] = ["BTCUSDT", "ETHUSDT", "SOLUSDT"];

/// The set of symbols the upstream ticker firehose is filtered by.
///
/// Written by the client hub (and the bus relay on remote subscribe
/// commands), read by the venue sessions on every ticker batch.
#[derive(Debug)]
pub struct Watchlist {
  defaults: HashSet<String>,
  current: Mutex<HashSet<String>>,
}

impl Watchlist {
  pub fn new() -> Self {
    Self::with_defaults(&DEFAULT_WATCHLIST)
  }

  pub fn with_defaults(symbols: &[&str]) -> Self {
    let defaults: HashSet<String> =
      symbols.iter().map(|s| s.to_uppercase()).collect();
    Self { current: Mutex::new(defaults.clone()), defaults }
  }

  /// Replace the watchlist with defaults ∪ `watched`.
  pub fn replace<I: IntoIterator<Item = String>>(&self, watched: I) {
    let mut next = self.defaults.clone();
    next.extend(watched.into_iter().map(|s| s.to_uppercase()));
    *self.current.lock().unwrap() = next;
  }

  pub fn snapshot(&self) -> HashSet<String> {
    self.current.lock().unwrap().clone()
  }

  pub fn contains(&self, symbol: &str) -> bool {
    self.current.lock().unwrap().contains(&symbol.to_uppercase())
  }

  pub fn len(&self) -> usize {
    self.current.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Default for Watchlist {
  fn default() -> Self {
    Self::new()
  }
}
