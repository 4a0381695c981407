//! One supervised WebSocket session per venue.
//!
//! A session connects to the combined-streams endpoint with whatever the
//! multiplexer currently carries for its venue, parks its write handle in
//! the venue slot so subscription management can push live frames, then
//! reads until something goes wrong. Every exit path clears the slot,
//! waits out the backoff and reconnects; the other venue is unaffected.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::bus::{encode_payload, CH_KLINE, CH_TICKER};
use crate::errors::GatewayError;
use crate::models::{filter_batch, CombinedFrame, StreamPayload, Venue};
use crate::upstream::UpstreamMux;

pub(crate) async fn run(mux: Arc<UpstreamMux>, venue: Venue) {
  let reconnect_delay = mux.config.reconnect_delay;

  loop {
    let streams = mux.streams_for(venue);
    let url = match combined_url(ws_base(&mux, venue), &streams) {
      Ok(url) => url,
      Err(e) => {
        log::error!("[{}] bad stream URL: {}", venue, e);
        tokio::time::sleep(reconnect_delay).await;
        continue;
      }
    };

    log::info!("[{}] connecting with {} streams", venue, streams.len());
    let ws = match connect_async(url.as_str()).await {
      Ok((ws, _response)) => ws,
      Err(e) => {
        log::error!("[{}] connect failed: {}", venue, e);
        mux.with_stats(venue, |s| s.reconnects += 1);
        tokio::time::sleep(reconnect_delay).await;
        continue;
      }
    };
    log::info!("[{}] websocket connected", venue);

    let (write, read) = ws.split();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    mux.install_slot(venue, cmd_tx.clone());

    let reason = read_loop(&mux, venue, write, read, cmd_tx, cmd_rx).await;
    mux.clear_slot(venue);
    mux.with_stats(venue, |s| s.reconnects += 1);
    log::error!(
      "[{}] session ended: {}; reconnecting in {:?}",
      venue,
      reason,
      reconnect_delay
    );
    tokio::time::sleep(reconnect_delay).await;
  }
}

async fn read_loop<W, R>(
  mux: &Arc<UpstreamMux>,
  venue: Venue,
  mut write: W,
  mut read: R,
  cmd_tx: mpsc::UnboundedSender<Message>,
  mut cmd_rx: mpsc::UnboundedReceiver<Message>,
) -> GatewayError
where
  W: SinkExt<Message> + Unpin,
  W::Error: std::fmt::Display,
  R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
    + Unpin,
{
  let mut ping_timer = tokio::time::interval(mux.config.ping_interval);
  // The immediate first tick would ping before any frame has arrived.
  ping_timer.tick().await;
  let mut last_frame = Instant::now();

  loop {
    tokio::select! {
      frame = read.next() => match frame {
        Some(Ok(message)) => {
          last_frame = Instant::now();
          if let Err(e) = handle_message(mux, venue, message, &cmd_tx) {
            return e;
          }
        }
        Some(Err(e)) => {
          return GatewayError::UpstreamStream(e.to_string());
        }
        None => {
          return GatewayError::UpstreamStream("connection closed".to_string());
        }
      },
      command = cmd_rx.recv() => {
        // The sender half lives in this scope, so recv never yields None.
        if let Some(message) = command {
          if let Err(e) = write.send(message).await {
            return GatewayError::UpstreamStream(format!("send failed: {}", e));
          }
        }
      },
      _ = ping_timer.tick() => {
        if last_frame.elapsed() > mux.config.ping_timeout + mux.config.ping_interval {
          return GatewayError::UpstreamStream(format!(
            "no frames within {:?}",
            mux.config.ping_timeout
          ));
        }
        if let Err(e) = write.send(Message::Ping(Bytes::new())).await {
          return GatewayError::UpstreamStream(format!("ping failed: {}", e));
        }
      }
    }
  }
}

fn handle_message(
  mux: &Arc<UpstreamMux>,
  venue: Venue,
  message: Message,
  cmd_tx: &mpsc::UnboundedSender<Message>,
) -> Result<(), GatewayError> {
  match message {
    Message::Text(text) => handle_text(mux, venue, text.as_ref()),
    Message::Ping(data) => {
      let _ = cmd_tx.send(Message::Pong(data));
      Ok(())
    }
    Message::Pong(_) => Ok(()),
    Message::Close(frame) => Err(GatewayError::UpstreamStream(format!(
      "closed by upstream: {:?}",
      frame
    ))),
    // The exchange only sends text on this endpoint.
    Message::Binary(_) | Message::Frame(_) => Ok(()),
  }
}

fn handle_text(
  mux: &Arc<UpstreamMux>,
  venue: Venue,
  text: &str,
) -> Result<(), GatewayError> {
  mux.with_stats(venue, |s| s.frames_received += 1);

  let value: serde_json::Value = serde_json::from_str(text)
    .map_err(|e| GatewayError::UpstreamStream(format!("bad frame: {}", e)))?;

  let frame: CombinedFrame = match serde_json::from_value(value) {
    Ok(frame) => frame,
    Err(_) => {
      // Subscription acks and other service messages; ids are opaque.
      log::debug!("[{}] ignoring non-stream frame", venue);
      return Ok(());
    }
  };

  match frame.data {
    StreamPayload::Tickers(items) => {
      let updates = filter_batch(&items, &mux.watchlist().snapshot());
      if !updates.is_empty() {
        mux.bus.publish(CH_TICKER, encode_payload(&updates));
        mux.with_stats(venue, |s| s.tickers_published += 1);
      }
    }
    StreamPayload::Kline(kline) => {
      let event = kline.normalize()?;
      log::debug!(
        "[{}] kline {}@{} close={}",
        venue,
        event.symbol,
        event.interval,
        event.data.close
      );
      mux.bus.publish(CH_KLINE, encode_payload(&event));
      mux.with_stats(venue, |s| s.klines_published += 1);
    }
  }
  Ok(())
}

fn ws_base<'a>(mux: &'a Arc<UpstreamMux>, venue: Venue) -> &'a str {
  match venue {
    Venue::Spot => &mux.config.spot_ws_url,
    Venue::Deriv => &mux.config.deriv_ws_url,
  }
}

fn combined_url(base: &str, streams: &[String]) -> Result<url::Url, GatewayError> {
  let joined = streams.join("/");
  url::Url::parse(&format!("{}/stream?streams={}", base, joined))
    .map_err(|e| GatewayError::UpstreamStream(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::time::Duration;

  use crate::bus::MemoryBus;
  use crate::config::GatewayConfig;
  use crate::registry::{Snapshot, SymbolRegistry};
  use crate::rest::UpstreamRest;
  use crate::watchlist::Watchlist;

  fn fixture_mux(bus: Arc<MemoryBus>) -> Arc<UpstreamMux> {
    let config = GatewayConfig::default();
    let registry = Arc::new(SymbolRegistry::new(
      UpstreamRest::new(&config),
      Duration::from_secs(3600),
      None,
    ));
    registry.install(Snapshot::build(Vec::new(), Vec::new(), Vec::new()));
    Arc::new(UpstreamMux::new(
      config,
      registry,
      bus,
      Arc::new(Watchlist::new()),
    ))
  }

  #[test]
  fn builds_combined_stream_url() {
    let url = combined_url(
      "wss://stream.binance.com:9443",
      &["!ticker@arr".to_string(), "btcusdt@kline_1m".to_string()],
    )
    .unwrap();
    assert_eq!(
      url.as_str(),
      "wss://stream.binance.com:9443/stream?streams=!ticker@arr/btcusdt@kline_1m"
    );
  }

  #[tokio::test]
  async fn kline_frames_are_normalized_onto_the_bus() {
    let bus = Arc::new(MemoryBus::new());
    let mux = fixture_mux(bus.clone());

    let text = r#"{"stream":"btcusdt@kline_1m","data":{"s":"BTCUSDT","k":{"t":1700000000000,"i":"1m","o":"27000.5","h":"27100.0","l":"26950.0","c":"27050.0","v":"12.5"}}}"#;
    handle_text(&mux, Venue::Spot, text).unwrap();

    let published = bus.published_on(CH_KLINE);
    assert_eq!(published.len(), 1);
    let event: serde_json::Value = serde_json::from_str(&published[0]).unwrap();
    assert_eq!(event["symbol"], "btcusdt");
    assert_eq!(event["interval"], "1m");
    assert_eq!(event["data"]["time"], 1_700_000_000u64);
    assert_eq!(event["data"]["open"], 27000.5);

    let stats = mux.stats(Venue::Spot);
    assert_eq!(stats.frames_received, 1);
    assert_eq!(stats.klines_published, 1);
  }

  #[tokio::test]
  async fn ticker_frames_are_filtered_by_the_watchlist() {
    let bus = Arc::new(MemoryBus::new());
    let mux = fixture_mux(bus.clone());

    let text = r#"{"stream":"!ticker@arr","data":[
      {"s":"BTCUSDT","c":"27000.5","p":"120.5","P":"0.45"},
      {"s":"DOGEUSDT","c":"0.07","p":"0.001","P":"1.2"}
    ]}"#;
    handle_text(&mux, Venue::Spot, text).unwrap();

    let published = bus.published_on(CH_TICKER);
    assert_eq!(published.len(), 1);
    let batch: serde_json::Value = serde_json::from_str(&published[0]).unwrap();
    assert!(batch.get("BTCUSDT").is_some());
    assert!(batch.get("DOGEUSDT").is_none());
    assert_eq!(batch["BTCUSDT"]["lastPrice"], 27000.5);
  }

  #[tokio::test]
  async fn ticker_batch_outside_watchlist_publishes_nothing() {
    let bus = Arc::new(MemoryBus::new());
    let mux = fixture_mux(bus.clone());

    let text = r#"{"stream":"!ticker@arr","data":[{"s":"DOGEUSDT","c":"0.07","p":"0.001","P":"1.2"}]}"#;
    handle_text(&mux, Venue::Spot, text).unwrap();
    assert!(bus.published_on(CH_TICKER).is_empty());
  }

  #[tokio::test]
  async fn subscription_acks_are_ignored() {
    let bus = Arc::new(MemoryBus::new());
    let mux = fixture_mux(bus.clone());

    handle_text(&mux, Venue::Spot, r#"{"result":null,"id":3}"#).unwrap();
    assert!(bus.published_on(CH_KLINE).is_empty());
  }

  #[tokio::test]
  async fn invalid_json_tears_the_session_down() {
    let bus = Arc::new(MemoryBus::new());
    let mux = fixture_mux(bus);
    assert!(handle_text(&mux, Venue::Spot, "not json").is_err());
  }
}
