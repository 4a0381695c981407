use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::bus::Bus;
use crate::config::GatewayConfig;
use crate::errors::GatewayError;
use crate::models::{base_symbol, StreamRequest, Venue, TICKER_STREAM};
use crate::registry::SymbolRegistry;
use crate::upstream::session;
use crate::watchlist::Watchlist;

/// Write handles of the two venue sessions. Each is written only by its
/// owning session task and read (send-only) by subscription management;
/// one lock covers the pair.
#[derive(Debug, Default)]
struct VenueSlots {
  spot: Option<mpsc::UnboundedSender<Message>>,
  deriv: Option<mpsc::UnboundedSender<Message>>,
}

impl VenueSlots {
  fn slot(&mut self, venue: Venue) -> &mut Option<mpsc::UnboundedSender<Message>> {
    match venue {
      Venue::Spot => &mut self.spot,
      Venue::Deriv => &mut self.deriv,
    }
  }
}

/// Per-venue session counters for logging and introspection.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
  pub frames_received: u64,
  pub klines_published: u64,
  pub tickers_published: u64,
  pub reconnects: u64,
}

/// Owner of the two upstream venue sessions and the live subscription set.
///
/// Dynamic SUBSCRIBE commands route by symbol classification: spot symbols
/// on the spot socket, derivatives-only symbols on the derivatives socket,
/// unknown symbols default to spot. A session rebuilds its combined-streams
/// URL from the live set on every (re)connect, so subscriptions survive
/// exchange-side resets.
pub struct UpstreamMux {
  pub(crate) config: GatewayConfig,
  registry: Arc<SymbolRegistry>,
  pub(crate) bus: Arc<dyn Bus>,
  watchlist: Arc<Watchlist>,
  slots: Mutex<VenueSlots>,
  /// Stream name -> venue it was routed to when subscribed.
  live: Mutex<HashMap<String, Venue>>,
  next_request_id: AtomicU64,
  stats: Mutex<[SessionStats; 2]>,
}

impl UpstreamMux {
  pub fn new(
    config: GatewayConfig,
    registry: Arc<SymbolRegistry>,
    bus: Arc<dyn Bus>,
    watchlist: Arc<Watchlist>,
  ) -> Self {
    Self {
      config,
      registry,
      bus,
      watchlist,
      slots: Mutex::new(VenueSlots::default()),
      live: Mutex::new(HashMap::new()),
      next_request_id: AtomicU64::new(1),
      stats: Mutex::new([SessionStats::default(), SessionStats::default()]),
    }
  }

  /// Launch one supervised session per venue.
  pub fn spawn_sessions(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
    vec![
      tokio::spawn(session::run(Arc::clone(self), Venue::Spot)),
      tokio::spawn(session::run(Arc::clone(self), Venue::Deriv)),
    ]
  }

  /// Subscribe a stream on its venue's live socket, if not already carried.
  pub async fn subscribe_stream(&self, stream: &str) {
    if self.live.lock().unwrap().contains_key(stream) {
      return;
    }
    let venue = self
      .registry
      .classify(base_symbol(stream))
      .await
      .venue_or_default();

    let request = StreamRequest::subscribe(&[stream], self.next_request_id());
    match self.send_to(venue, Message::Text(request.to_string().into())) {
      Ok(()) => {
        self.live.lock().unwrap().insert(stream.to_string(), venue);
        log::info!("[{}] dynamic subscribe: {}", venue, stream);
      }
      Err(e) => {
        log::warn!("[{}] cannot subscribe {} yet: {}", venue, stream, e);
      }
    }
  }

  /// Drop a stream from the live set and tell its venue. Local only: no
  /// bus traffic, because sibling instances may still carry the stream.
  pub fn unsubscribe_stream(&self, stream: &str) {
    let venue = match self.live.lock().unwrap().remove(stream) {
      Some(venue) => venue,
      None => return,
    };

    let request = StreamRequest::unsubscribe(&[stream], self.next_request_id());
    match self.send_to(venue, Message::Text(request.to_string().into())) {
      Ok(()) => log::info!("[{}] dynamic unsubscribe: {}", venue, stream),
      Err(e) => log::warn!("[{}] failed to unsubscribe {}: {}", venue, stream, e),
    }
  }

  /// Streams a venue session announces on connect: the ticker firehose is
  /// always included, the rest is the live set routed to that venue.
  pub fn streams_for(&self, venue: Venue) -> Vec<String> {
    let mut streams = vec![TICKER_STREAM.to_string()];
    let live = self.live.lock().unwrap();
    streams.extend(
      live
        .iter()
        .filter(|(_, v)| **v == venue)
        .map(|(stream, _)| stream.clone()),
    );
    streams
  }

  pub fn live_streams(&self) -> Vec<String> {
    self.live.lock().unwrap().keys().cloned().collect()
  }

  pub fn watchlist(&self) -> &Watchlist {
    &self.watchlist
  }

  pub fn stats(&self, venue: Venue) -> SessionStats {
    self.stats.lock().unwrap()[venue_index(venue)].clone()
  }

  pub(crate) fn with_stats<F: FnOnce(&mut SessionStats)>(&self, venue: Venue, f: F) {
    f(&mut self.stats.lock().unwrap()[venue_index(venue)]);
  }

  /// Park a venue's write handle. Called by the owning session on connect;
  /// also the seam tests use to observe outgoing frames.
  pub fn install_slot(&self, venue: Venue, tx: mpsc::UnboundedSender<Message>) {
    *self.slots.lock().unwrap().slot(venue) = Some(tx);
  }

  pub fn clear_slot(&self, venue: Venue) {
    *self.slots.lock().unwrap().slot(venue) = None;
  }

  fn send_to(&self, venue: Venue, message: Message) -> Result<(), GatewayError> {
    let mut slots = self.slots.lock().unwrap();
    match slots.slot(venue) {
      Some(tx) => tx.send(message).map_err(|_| {
        GatewayError::UpstreamStream(format!("{} session is reconnecting", venue))
      }),
      None => Err(GatewayError::UpstreamStream(format!(
        "no live {} session",
        venue
      ))),
    }
  }

  fn next_request_id(&self) -> u64 {
    self.next_request_id.fetch_add(1, Ordering::Relaxed)
  }
}

fn venue_index(venue: Venue) -> usize {
  match venue {
    Venue::Spot => 0,
    Venue::Deriv => 1,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  use crate::bus::MemoryBus;
  use crate::models::{SymbolInfo, Venue};
  use crate::registry::Snapshot;
  use crate::rest::UpstreamRest;

  fn info(symbol: &str, venue: Venue) -> SymbolInfo {
    SymbolInfo {
      symbol: symbol.to_string(),
      base_asset: symbol.trim_end_matches("USDT").to_string(),
      quote_asset: "USDT".to_string(),
      venue,
    }
  }

  fn fixture_mux() -> Arc<UpstreamMux> {
    let config = GatewayConfig::default();
    let registry = Arc::new(SymbolRegistry::new(
      UpstreamRest::new(&config),
      Duration::from_secs(3600),
      None,
    ));
    registry.install(Snapshot::build(
      vec![info("BTCUSDT", Venue::Spot)],
      vec![info("XAUUSDT", Venue::Deriv)],
      Vec::new(),
    ));
    Arc::new(UpstreamMux::new(
      config,
      registry,
      Arc::new(MemoryBus::new()),
      Arc::new(Watchlist::new()),
    ))
  }

  fn text_of(msg: &Message) -> String {
    match msg {
      Message::Text(text) => text.to_string(),
      other => panic!("expected text frame, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn routes_derivative_streams_to_the_deriv_slot() {
    let mux = fixture_mux();
    let (spot_tx, mut spot_rx) = mpsc::unbounded_channel();
    let (deriv_tx, mut deriv_rx) = mpsc::unbounded_channel();
    mux.install_slot(Venue::Spot, spot_tx);
    mux.install_slot(Venue::Deriv, deriv_tx);

    mux.subscribe_stream("xauusdt@kline_1h").await;
    let frame = text_of(&deriv_rx.try_recv().expect("derivatives subscribe"));
    assert!(frame.contains("xauusdt@kline_1h"));
    assert!(spot_rx.try_recv().is_err());

    mux.subscribe_stream("btcusdt@kline_1m").await;
    assert!(spot_rx.try_recv().is_ok());
  }

  #[tokio::test]
  async fn unknown_symbols_default_to_spot() {
    let mux = fixture_mux();
    let (spot_tx, mut spot_rx) = mpsc::unbounded_channel();
    mux.install_slot(Venue::Spot, spot_tx);

    mux.subscribe_stream("dogeusdt@kline_1m").await;
    assert!(spot_rx.try_recv().is_ok());
  }

  #[tokio::test]
  async fn duplicate_subscribe_is_suppressed() {
    let mux = fixture_mux();
    let (spot_tx, mut spot_rx) = mpsc::unbounded_channel();
    mux.install_slot(Venue::Spot, spot_tx);

    mux.subscribe_stream("btcusdt@kline_1m").await;
    mux.subscribe_stream("btcusdt@kline_1m").await;

    assert!(spot_rx.try_recv().is_ok());
    assert!(spot_rx.try_recv().is_err(), "only one SUBSCRIBE expected");
  }

  #[tokio::test]
  async fn reconnect_stream_list_reannounces_live_set() {
    let mux = fixture_mux();
    let (spot_tx, _spot_rx) = mpsc::unbounded_channel();
    let (deriv_tx, _deriv_rx) = mpsc::unbounded_channel();
    mux.install_slot(Venue::Spot, spot_tx);
    mux.install_slot(Venue::Deriv, deriv_tx);

    mux.subscribe_stream("btcusdt@kline_1m").await;
    mux.subscribe_stream("xauusdt@kline_1h").await;

    // What a reconnecting spot session would announce in its URL.
    let spot_streams = mux.streams_for(Venue::Spot);
    assert!(spot_streams.contains(&TICKER_STREAM.to_string()));
    assert!(spot_streams.contains(&"btcusdt@kline_1m".to_string()));
    assert!(!spot_streams.contains(&"xauusdt@kline_1h".to_string()));

    let deriv_streams = mux.streams_for(Venue::Deriv);
    assert!(deriv_streams.contains(&TICKER_STREAM.to_string()));
    assert!(deriv_streams.contains(&"xauusdt@kline_1h".to_string()));
  }

  #[tokio::test]
  async fn subscribe_without_live_session_is_not_recorded() {
    let mux = fixture_mux();
    mux.subscribe_stream("btcusdt@kline_1m").await;
    assert!(mux.live_streams().is_empty());
  }

  #[tokio::test]
  async fn request_ids_are_monotonic() {
    let mux = fixture_mux();
    let (spot_tx, mut spot_rx) = mpsc::unbounded_channel();
    mux.install_slot(Venue::Spot, spot_tx);

    mux.subscribe_stream("btcusdt@kline_1m").await;
    mux.unsubscribe_stream("btcusdt@kline_1m");

    let first: serde_json::Value =
      serde_json::from_str(&text_of(&spot_rx.try_recv().unwrap())).unwrap();
    let second: serde_json::Value =
      serde_json::from_str(&text_of(&spot_rx.try_recv().unwrap())).unwrap();
    assert!(second["id"].as_u64().unwrap() > first["id"].as_u64().unwrap());
  }
}
