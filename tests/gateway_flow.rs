//! Cross-component tests of the fan-out path over the in-memory bus:
//! client connect -> subscribe command -> relay -> upstream SUBSCRIBE, and
//! bus data events -> relay -> hub -> client queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use marketcast::bus::{
  MemoryBus, CH_CMD_KLINE_SUB, CH_CMD_TICKER_SUB, CH_KLINE, CH_TICKER,
};
use marketcast::bus::Bus;
use marketcast::gateway::Gateway;
use marketcast::registry::Snapshot;
use marketcast::relay::BusRelay;
use marketcast::{GatewayConfig, SymbolInfo, Venue};

fn info(symbol: &str, venue: Venue) -> SymbolInfo {
  SymbolInfo {
    symbol: symbol.to_string(),
    base_asset: symbol.trim_end_matches("USDT").to_string(),
    quote_asset: "USDT".to_string(),
    venue,
  }
}

struct Harness {
  gateway: Arc<Gateway>,
  bus: Arc<MemoryBus>,
  spot_rx: mpsc::UnboundedReceiver<Message>,
  deriv_rx: mpsc::UnboundedReceiver<Message>,
}

/// Assemble a gateway around the in-memory bus with fake venue sockets and
/// a fixture symbol universe; spawn only the relay (no real upstream).
fn harness() -> Harness {
  let config = GatewayConfig { client_buffer: 8, ..GatewayConfig::default() };
  let bus = Arc::new(MemoryBus::new());
  let gateway = Gateway::assemble(config, bus.clone(), None);

  gateway.registry.install(Snapshot::build(
    vec![info("BTCUSDT", Venue::Spot), info("ETHUSDT", Venue::Spot)],
    vec![info("XAUUSDT", Venue::Deriv)],
    vec!["BTCUSDT".to_string()],
  ));

  let (spot_tx, spot_rx) = mpsc::unbounded_channel();
  let (deriv_tx, deriv_rx) = mpsc::unbounded_channel();
  gateway.mux.install_slot(Venue::Spot, spot_tx);
  gateway.mux.install_slot(Venue::Deriv, deriv_tx);

  BusRelay::new(
    Arc::clone(&gateway.hub),
    Arc::clone(&gateway.mux),
    bus.clone() as Arc<dyn Bus>,
  )
  .spawn();

  Harness { gateway, bus, spot_rx, deriv_rx }
}

async fn settle() {
  tokio::time::sleep(Duration::from_millis(30)).await;
}

fn text_of(msg: &Message) -> String {
  match msg {
    Message::Text(text) => text.to_string(),
    other => panic!("expected text frame, got {:?}", other),
  }
}

#[tokio::test]
async fn kline_interest_reaches_the_spot_socket() {
  let mut h = harness();

  let (_id, _rx) = h.gateway.hub.connect_kline("btcusdt", "1m");
  settle().await;

  // Exactly one command crossed the bus.
  assert_eq!(h.bus.published_on(CH_CMD_KLINE_SUB).len(), 1);

  // The relay routed it to the spot venue socket.
  let frame = text_of(&h.spot_rx.try_recv().expect("subscribe frame"));
  assert!(frame.contains("SUBSCRIBE"));
  assert!(frame.contains("btcusdt@kline_1m"));
  assert!(h.deriv_rx.try_recv().is_err());

  // Quiescence: ref-counted streams equal the carried streams.
  assert_eq!(
    h.gateway.hub.active_streams(),
    h.gateway.mux.live_streams()
  );
}

#[tokio::test]
async fn derivative_interest_routes_to_the_deriv_socket() {
  let mut h = harness();

  let (_id, _rx) = h.gateway.hub.connect_kline("xauusdt", "1h");
  settle().await;

  let frame = text_of(&h.deriv_rx.try_recv().expect("derivatives subscribe"));
  assert!(frame.contains("xauusdt@kline_1h"));
  assert!(h.spot_rx.try_recv().is_err());
}

#[tokio::test]
async fn bus_kline_events_fan_out_to_clients() {
  let h = harness();

  let (_id, mut rx) = h.gateway.hub.connect_kline("btcusdt", "1m");
  settle().await;

  h.bus.publish(
    CH_KLINE,
    r#"{"symbol":"btcusdt","interval":"1m","data":{"time":1700000000,"open":27000.5,"high":27100.0,"low":26950.0,"close":27050.0,"volume":12.5}}"#
      .to_string(),
  );
  settle().await;

  let payload = rx.try_recv().expect("kline update");
  let update: serde_json::Value = serde_json::from_str(&payload).unwrap();
  assert_eq!(update["time"], 1_700_000_000u64);
  assert_eq!(update["open"], 27000.5);

  // A second update for the same bucket is delivered as well; the client
  // treats the repeated time as an in-place replacement.
  h.bus.publish(
    CH_KLINE,
    r#"{"symbol":"btcusdt","interval":"1m","data":{"time":1700000000,"open":27000.5,"high":27120.0,"low":26950.0,"close":27110.0,"volume":14.0}}"#
      .to_string(),
  );
  settle().await;
  let payload = rx.try_recv().expect("superseding update");
  let update: serde_json::Value = serde_json::from_str(&payload).unwrap();
  assert_eq!(update["time"], 1_700_000_000u64);
  assert_eq!(update["close"], 27110.0);
}

#[tokio::test]
async fn bus_kline_events_for_other_streams_are_not_delivered() {
  let h = harness();

  let (_id, mut rx) = h.gateway.hub.connect_kline("btcusdt", "1m");
  settle().await;

  h.bus.publish(
    CH_KLINE,
    r#"{"symbol":"ethusdt","interval":"1m","data":{"time":1,"open":1.0,"high":1.0,"low":1.0,"close":1.0,"volume":1.0}}"#
      .to_string(),
  );
  settle().await;
  assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn ticker_batches_reach_every_ticker_client() {
  let h = harness();

  let (_a, mut rx_a) = h.gateway.hub.connect_ticker();
  let (_b, mut rx_b) = h.gateway.hub.connect_ticker();

  h.bus.publish(
    CH_TICKER,
    r#"{"BTCUSDT":{"lastPrice":27000.5,"priceChange":120.5,"priceChangePercent":0.45}}"#
      .to_string(),
  );
  settle().await;

  for rx in [&mut rx_a, &mut rx_b] {
    let payload = rx.try_recv().expect("ticker batch");
    assert!(payload.contains("BTCUSDT"));
  }
}

#[tokio::test]
async fn remote_ticker_commands_extend_the_watchlist() {
  let h = harness();

  h.bus
    .publish(CH_CMD_TICKER_SUB, r#"{"symbols":["adausdt"]}"#.to_string());
  settle().await;

  assert!(h.gateway.watchlist.contains("ADAUSDT"));
  // Anchors stay regardless of commands.
  assert!(h.gateway.watchlist.contains("BTCUSDT"));
}

#[tokio::test]
async fn undecodable_bus_messages_are_dropped_silently() {
  let h = harness();

  let (_id, mut rx) = h.gateway.hub.connect_kline("btcusdt", "1m");
  settle().await;

  h.bus.publish(CH_KLINE, "{broken".to_string());
  h.bus.publish(
    CH_KLINE,
    r#"{"symbol":"btcusdt","interval":"1m","data":{"time":2,"open":1.0,"high":1.0,"low":1.0,"close":1.0,"volume":1.0}}"#
      .to_string(),
  );
  settle().await;

  // The bad frame is skipped, the next one still flows.
  let payload = rx.try_recv().expect("update after bad frame");
  assert!(payload.contains("\"time\":2"));
}

#[tokio::test]
async fn full_round_trip_from_interest_to_update() {
  let mut h = harness();

  // Client A and B share a stream: one bus command, one SUBSCRIBE.
  let (a, mut rx_a) = h.gateway.hub.connect_kline("btcusdt", "1m");
  let (b, mut rx_b) = h.gateway.hub.connect_kline("btcusdt", "1m");
  settle().await;
  assert_eq!(h.bus.published_on(CH_CMD_KLINE_SUB).len(), 1);
  assert_eq!(
    h.spot_rx.try_recv().ok().map(|m| text_of(&m).contains("SUBSCRIBE")),
    Some(true)
  );

  h.bus.publish(
    CH_KLINE,
    r#"{"symbol":"btcusdt","interval":"1m","data":{"time":3,"open":1.0,"high":2.0,"low":0.5,"close":1.5,"volume":9.0}}"#
      .to_string(),
  );
  settle().await;
  assert!(rx_a.try_recv().is_ok());
  assert!(rx_b.try_recv().is_ok());

  // A leaves: stream stays live. B leaves: local unsubscribe fires.
  h.gateway.hub.disconnect_kline(a, "btcusdt", "1m");
  settle().await;
  assert!(h.spot_rx.try_recv().is_err());

  h.gateway.hub.disconnect_kline(b, "btcusdt", "1m");
  settle().await;
  let frame = text_of(&h.spot_rx.try_recv().expect("unsubscribe frame"));
  assert!(frame.contains("UNSUBSCRIBE"));
  assert!(h.gateway.mux.live_streams().is_empty());
  assert!(h.gateway.hub.active_streams().is_empty());
}
