//! Intra-cluster pub/sub bus.
//!
//! Four JSON channels with at-most-once delivery and no retention: data
//! events fan out to every instance's relay, subscription commands let any
//! instance ask the one holding the live upstream socket to subscribe.
//! A missed message is tolerable because live upstream ticks replay every
//! kline subscription within one candle interval.

use std::sync::Mutex;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::GatewayError;
use crate::models::{KlineEvent, TickerBatch};

pub const CH_KLINE: &str = "market:kline";
pub const CH_TICKER: &str = "market:ticker";
pub const CH_CMD_KLINE_SUB: &str = "market:cmd_kline_sub";
pub const CH_CMD_TICKER_SUB: &str = "market:cmd_ticker_sub";

pub const ALL_CHANNELS: [&str; 4] =
  [CH_KLINE, CH_TICKER, CH_CMD_KLINE_SUB, CH_CMD_TICKER_SUB];

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Raw message as it crosses the bus: channel name plus UTF-8 JSON payload.
#[derive(Debug, Clone)]
pub struct BusFrame {
  pub channel: String,
  pub payload: String,
}

/// Ask the instance holding the live socket to carry a kline stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlineSubCmd {
  pub stream: String,
}

/// Announce newly watched ticker symbols to every instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSubCmd {
  pub symbols: Vec<String>,
}

/// Decoded bus message. One decoder per channel; the dispatcher selects by
/// channel name, never by probing the payload shape.
#[derive(Debug, Clone)]
pub enum BusMessage {
  Kline(KlineEvent),
  Ticker(TickerBatch),
  KlineSub(KlineSubCmd),
  TickerSub(TickerSubCmd),
}

impl BusMessage {
  pub fn decode(channel: &str, payload: &str) -> Result<Self, GatewayError> {
    match channel {
      CH_KLINE => Ok(Self::Kline(decode_json(payload)?)),
      CH_TICKER => Ok(Self::Ticker(decode_json(payload)?)),
      CH_CMD_KLINE_SUB => Ok(Self::KlineSub(decode_json(payload)?)),
      CH_CMD_TICKER_SUB => Ok(Self::TickerSub(decode_json(payload)?)),
      other => {
        Err(GatewayError::Protocol(format!("unknown bus channel: {}", other)))
      }
    }
  }
}

fn decode_json<'a, T: Deserialize<'a>>(payload: &'a str) -> Result<T, GatewayError> {
  serde_json::from_str(payload)
    .map_err(|e| GatewayError::Protocol(format!("bad bus payload: {}", e)))
}

/// Serialize a bus payload; every bus message type serializes infallibly.
pub fn encode_payload<T: Serialize>(value: &T) -> String {
  serde_json::to_string(value).expect("failed to serialize bus payload to JSON")
}

/// Publish/subscribe transport used between gateway instances.
///
/// `publish` is fire-and-forget: transport failures are logged, never
/// surfaced to the caller, and never block the caller on I/O.
pub trait Bus: Send + Sync {
  fn publish(&self, channel: &'static str, payload: String);
  fn subscribe(&self) -> mpsc::UnboundedReceiver<BusFrame>;
}

/// Redis-backed bus used in production.
///
/// Publishes drain through a single writer task; each subscriber runs its
/// own supervised pub/sub connection that resubscribes after transport
/// failures.
pub struct RedisBus {
  client: redis::Client,
  publish_tx: mpsc::UnboundedSender<(&'static str, String)>,
}

impl RedisBus {
  pub async fn connect(url: &str) -> Result<Self, GatewayError> {
    let client = redis::Client::open(url)
      .map_err(|e| GatewayError::BusTransport(e.to_string()))?;
    let mut conn = client
      .get_connection_manager()
      .await
      .map_err(|e| GatewayError::BusTransport(e.to_string()))?;

    let (publish_tx, mut publish_rx) =
      mpsc::unbounded_channel::<(&'static str, String)>();
    tokio::spawn(async move {
      while let Some((channel, payload)) = publish_rx.recv().await {
        let result: redis::RedisResult<()> =
          redis::AsyncCommands::publish(&mut conn, channel, payload).await;
        if let Err(e) = result {
          log::error!("bus publish on {} failed: {}", channel, e);
        }
      }
    });

    Ok(Self { client, publish_tx })
  }
}

impl Bus for RedisBus {
  fn publish(&self, channel: &'static str, payload: String) {
    if self.publish_tx.send((channel, payload)).is_err() {
      log::error!("bus publisher task is gone, dropping message on {}", channel);
    }
  }

  fn subscribe(&self) -> mpsc::UnboundedReceiver<BusFrame> {
    let (tx, rx) = mpsc::unbounded_channel();
    let client = self.client.clone();

    tokio::spawn(async move {
      loop {
        let mut pubsub = match client.get_async_pubsub().await {
          Ok(pubsub) => pubsub,
          Err(e) => {
            log::error!("bus subscribe connection failed: {}", e);
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
            continue;
          }
        };

        let mut subscribed = true;
        for channel in ALL_CHANNELS {
          if let Err(e) = pubsub.subscribe(channel).await {
            log::error!("bus subscribe to {} failed: {}", channel, e);
            subscribed = false;
            break;
          }
        }

        if subscribed {
          log::info!("subscribed to {} bus channels", ALL_CHANNELS.len());
          let mut messages = pubsub.on_message();
          while let Some(msg) = messages.next().await {
            let channel = msg.get_channel_name().to_string();
            let payload = match msg.get_payload::<String>() {
              Ok(payload) => payload,
              Err(e) => {
                log::debug!("non-utf8 bus payload on {}: {}", channel, e);
                continue;
              }
            };
            if tx.send(BusFrame { channel, payload }).is_err() {
              // Receiver dropped: close the pub/sub connection and stop.
              return;
            }
          }
        }

        log::warn!(
          "bus subscription lost, resubscribing in {:?}",
          RESUBSCRIBE_DELAY
        );
        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
      }
    });

    rx
  }
}

/// In-memory bus used for tests: synchronous fan-out to every subscriber,
/// with a log of published frames for assertions.
#[derive(Default)]
pub struct MemoryBus {
  subscribers: Mutex<Vec<mpsc::UnboundedSender<BusFrame>>>,
  published: Mutex<Vec<BusFrame>>,
}

impl MemoryBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Helper used in tests.
  pub fn published_on(&self, channel: &str) -> Vec<String> {
    self
      .published
      .lock()
      .unwrap()
      .iter()
      .filter(|frame| frame.channel == channel)
      .map(|frame| frame.payload.clone())
      .collect()
  }
}

impl Bus for MemoryBus {
  fn publish(&self, channel: &'static str, payload: String) {
    let frame = BusFrame { channel: channel.to_string(), payload };
    self.published.lock().unwrap().push(frame.clone());
    self
      .subscribers
      .lock()
      .unwrap()
      .retain(|tx| tx.send(frame.clone()).is_ok());
  }

  fn subscribe(&self) -> mpsc::UnboundedReceiver<BusFrame> {
    let (tx, rx) = mpsc::unbounded_channel();
    self.subscribers.lock().unwrap().push(tx);
    rx
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_by_channel_name() {
    let kline = BusMessage::decode(
      CH_KLINE,
      r#"{"symbol":"btcusdt","interval":"1m","data":{"time":1,"open":1.0,"high":2.0,"low":0.5,"close":1.5,"volume":3.0}}"#,
    )
    .unwrap();
    assert!(matches!(kline, BusMessage::Kline(_)));

    let cmd =
      BusMessage::decode(CH_CMD_KLINE_SUB, r#"{"stream":"btcusdt@kline_1m"}"#)
        .unwrap();
    match cmd {
      BusMessage::KlineSub(cmd) => assert_eq!(cmd.stream, "btcusdt@kline_1m"),
      other => panic!("unexpected message: {:?}", other),
    }
  }

  #[test]
  fn rejects_unknown_channel() {
    assert!(BusMessage::decode("market:orders", "{}").is_err());
  }

  #[test]
  fn rejects_shape_mismatch() {
    // A kline payload on the ticker-command channel must not decode.
    assert!(BusMessage::decode(
      CH_CMD_TICKER_SUB,
      r#"{"stream":"btcusdt@kline_1m"}"#
    )
    .is_err());
  }

  #[tokio::test]
  async fn memory_bus_fans_out_and_records() {
    let bus = MemoryBus::new();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();

    bus.publish(CH_CMD_KLINE_SUB, r#"{"stream":"s"}"#.to_string());

    assert_eq!(a.recv().await.unwrap().channel, CH_CMD_KLINE_SUB);
    assert_eq!(b.recv().await.unwrap().channel, CH_CMD_KLINE_SUB);
    assert_eq!(bus.published_on(CH_CMD_KLINE_SUB).len(), 1);
  }
}
