//! TTL-bounded cache of the tradable symbol universe.
//!
//! A refresh replaces the whole snapshot atomically, so classification and
//! search never observe a half-applied universe. The snapshot is mirrored
//! to Redis so sibling instances (and restarts within the TTL) can load it
//! without hitting the exchange.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use redis::AsyncCommands;

use crate::errors::GatewayError;
use crate::models::{SymbolClass, SymbolInfo, Venue};
use crate::rest::UpstreamRest;

const KEY_SYMBOLS: &str = "binance:symbols";
const KEY_SPOT_LIST: &str = "binance:spot_list";
const KEY_FUTURES_LIST: &str = "binance:futures_list";
const KEY_POPULAR: &str = "binance:popular";

const POPULAR_LIMIT: usize = 25;

/// Derivative pairs appended to the popular list; they have no spot market
/// but are always worth surfacing.
const PINNED_POPULAR: [&str; 2] = ["XAUUSDT", "XAGUSDT"];

/// Immutable point-in-time view of the symbol universe.
#[derive(Debug)]
pub struct Snapshot {
  /// Spot entries first, derivatives-only entries after; search preserves
  /// this order.
  pub symbols: Vec<SymbolInfo>,
  /// Uppercase spot membership set.
  pub spot: HashSet<String>,
  /// Uppercase derivatives-only membership set, disjoint from `spot`.
  pub deriv: HashSet<String>,
  /// Top spot symbols by 24h quote volume.
  pub popular: Vec<String>,
  fetched_at: Instant,
}

impl Snapshot {
  /// Build a snapshot from the two venue universes, enforcing disjointness:
  /// a symbol listed on both venues is carried as spot only.
  pub fn build(
    spot_symbols: Vec<SymbolInfo>,
    deriv_symbols: Vec<SymbolInfo>,
    popular: Vec<String>,
  ) -> Self {
    let spot: HashSet<String> =
      spot_symbols.iter().map(|s| s.symbol.to_uppercase()).collect();

    let mut symbols = spot_symbols;
    let mut deriv = HashSet::new();
    for mut info in deriv_symbols {
      let upper = info.symbol.to_uppercase();
      if spot.contains(&upper) {
        continue;
      }
      if deriv.insert(upper) {
        info.venue = Venue::Deriv;
        symbols.push(info);
      }
    }

    let popular = popular
      .into_iter()
      .filter(|s| spot.contains(&s.to_uppercase()))
      .take(POPULAR_LIMIT)
      .collect();

    Self { symbols, spot, deriv, popular, fetched_at: Instant::now() }
  }

  pub fn age(&self) -> Duration {
    self.fetched_at.elapsed()
  }
}

pub struct SymbolRegistry {
  rest: UpstreamRest,
  ttl: Duration,
  mirror: Option<redis::aio::ConnectionManager>,
  snapshot: Mutex<Option<Arc<Snapshot>>>,
}

impl SymbolRegistry {
  pub fn new(
    rest: UpstreamRest,
    ttl: Duration,
    mirror: Option<redis::aio::ConnectionManager>,
  ) -> Self {
    Self { rest, ttl, mirror, snapshot: Mutex::new(None) }
  }

  /// Current snapshot handle, if one has been installed.
  pub fn current(&self) -> Option<Arc<Snapshot>> {
    self.snapshot.lock().unwrap().clone()
  }

  /// Install a snapshot, replacing any prior one atomically. Also the test
  /// seam for fixture universes.
  pub fn install(&self, snapshot: Snapshot) {
    *self.snapshot.lock().unwrap() = Some(Arc::new(snapshot));
  }

  /// Fetch both venue universes and the popularity ranking, then swap the
  /// snapshot. On failure the previous snapshot stays valid untouched.
  pub async fn refresh(&self) -> Result<(), GatewayError> {
    let spot_symbols = self.rest.exchange_info(Venue::Spot).await?;
    let deriv_symbols = self.rest.exchange_info(Venue::Deriv).await?;
    let ranked = self.rest.ranked_by_quote_volume().await?;

    let snapshot = Snapshot::build(spot_symbols, deriv_symbols, ranked);
    log::info!(
      "symbol registry refreshed: {} spot, {} derivatives-only",
      snapshot.spot.len(),
      snapshot.deriv.len()
    );

    self.mirror_snapshot(&snapshot).await;
    self.install(snapshot);
    Ok(())
  }

  /// Make sure some snapshot exists: try the Redis mirror first, then the
  /// exchange. Called lazily from classification.
  pub async fn ensure(&self) -> Result<(), GatewayError> {
    if self.current().is_some() {
      return Ok(());
    }
    if self.load_mirror().await {
      return Ok(());
    }
    self.refresh().await
  }

  /// Classify against whatever snapshot is currently installed.
  pub fn classify_cached(&self, symbol: &str) -> SymbolClass {
    let upper = symbol.to_uppercase();
    match self.current() {
      Some(snapshot) if snapshot.spot.contains(&upper) => SymbolClass::Spot,
      Some(snapshot) if snapshot.deriv.contains(&upper) => SymbolClass::Deriv,
      Some(_) => SymbolClass::Unknown,
      None => SymbolClass::Unknown,
    }
  }

  /// Classify a symbol, populating the snapshot first if absent.
  pub async fn classify(&self, symbol: &str) -> SymbolClass {
    if let Err(e) = self.ensure().await {
      log::warn!("symbol classification without snapshot: {}", e);
    }
    self.classify_cached(symbol)
  }

  /// Case-insensitive substring match on the symbol, exact match on the
  /// base asset; results keep snapshot insertion order.
  pub fn search(&self, query: &str, limit: usize) -> Vec<SymbolInfo> {
    let snapshot = match self.current() {
      Some(snapshot) => snapshot,
      None => return Vec::new(),
    };
    let query = query.to_uppercase();

    snapshot
      .symbols
      .iter()
      .filter(|s| {
        query.is_empty()
          || s.symbol.to_uppercase().contains(&query)
          || s.base_asset.to_uppercase() == query
      })
      .take(limit)
      .cloned()
      .collect()
  }

  /// Precomputed popular list with the pinned derivative pairs appended.
  pub fn popular(&self) -> Vec<String> {
    let mut list = self
      .current()
      .map(|snapshot| snapshot.popular.clone())
      .unwrap_or_default();
    list.extend(PINNED_POPULAR.iter().map(|s| s.to_string()));
    list
  }

  /// Periodic refresh driver; spawned once at startup.
  pub async fn refresh_task(self: Arc<Self>) {
    if self.load_mirror().await {
      log::info!("symbol registry primed from cache mirror");
    }
    loop {
      match self.refresh().await {
        Ok(()) => {}
        Err(e) => {
          log::error!("symbol registry refresh failed, keeping prior snapshot: {}", e);
        }
      }
      tokio::time::sleep(self.ttl).await;
    }
  }

  async fn mirror_snapshot(&self, snapshot: &Snapshot) {
    let Some(mirror) = &self.mirror else { return };
    let mut conn = mirror.clone();
    let ttl = self.ttl.as_secs();

    if let Err(e) = write_mirror(&mut conn, snapshot, ttl).await {
      log::warn!("failed to mirror symbol snapshot to redis: {}", e);
    }
  }

  async fn load_mirror(&self) -> bool {
    let Some(mirror) = &self.mirror else { return false };
    let mut conn = mirror.clone();

    let symbols: Option<String> = match conn.get(KEY_SYMBOLS).await {
      Ok(value) => value,
      Err(e) => {
        log::warn!("failed to read symbol mirror: {}", e);
        return false;
      }
    };
    let Some(symbols) = symbols else { return false };

    let parsed: Vec<SymbolInfo> = match serde_json::from_str(&symbols) {
      Ok(parsed) => parsed,
      Err(e) => {
        log::warn!("corrupt symbol mirror, ignoring: {}", e);
        return false;
      }
    };
    let popular: Vec<String> = conn
      .get::<_, Option<String>>(KEY_POPULAR)
      .await
      .ok()
      .flatten()
      .and_then(|raw| serde_json::from_str(&raw).ok())
      .unwrap_or_default();

    let (spot, deriv): (Vec<SymbolInfo>, Vec<SymbolInfo>) =
      parsed.into_iter().partition(|s| s.venue == Venue::Spot);
    self.install(Snapshot::build(spot, deriv, popular));
    true
  }
}

async fn write_mirror(
  conn: &mut redis::aio::ConnectionManager,
  snapshot: &Snapshot,
  ttl: u64,
) -> redis::RedisResult<()> {
  let symbols_json = serde_json::to_string(&snapshot.symbols).unwrap_or_default();
  let popular_json = serde_json::to_string(&snapshot.popular).unwrap_or_default();

  let _: () = conn.set_ex(KEY_SYMBOLS, symbols_json, ttl).await?;
  let _: () = conn.set_ex(KEY_POPULAR, popular_json, ttl).await?;

  for (key, members) in [(KEY_SPOT_LIST, &snapshot.spot), (KEY_FUTURES_LIST, &snapshot.deriv)] {
    let _: () = conn.del(key).await?;
    if !members.is_empty() {
      let members: Vec<&String> = members.iter().collect();
      let _: () = conn.sadd(key, members).await?;
      let _: () = conn.expire(key, ttl as i64).await?;
    }
  }
  Ok(())
}
