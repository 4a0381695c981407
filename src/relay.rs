//! Per-instance bus subscriber.
//!
//! Converts bus events into local broadcast calls and forwards kline
//! subscribe commands to the upstream multiplexer. Messages that fail to
//! decode are dropped silently; transport-level recovery (resubscribing
//! after a disconnect) lives inside the bus implementation.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::bus::{Bus, BusMessage};
use crate::hub::ClientHub;
use crate::upstream::UpstreamMux;

pub struct BusRelay {
  hub: Arc<ClientHub>,
  mux: Arc<UpstreamMux>,
  bus: Arc<dyn Bus>,
}

impl BusRelay {
  pub fn new(
    hub: Arc<ClientHub>,
    mux: Arc<UpstreamMux>,
    bus: Arc<dyn Bus>,
  ) -> Self {
    Self { hub, mux, bus }
  }

  pub fn spawn(self) -> JoinHandle<()> {
    tokio::spawn(self.run())
  }

  async fn run(self) {
    let mut frames = self.bus.subscribe();
    log::info!("bus relay started");

    while let Some(frame) = frames.recv().await {
      let message = match BusMessage::decode(&frame.channel, &frame.payload) {
        Ok(message) => message,
        Err(e) => {
          log::debug!("dropping bus message on {}: {}", frame.channel, e);
          continue;
        }
      };

      match message {
        BusMessage::Kline(event) => {
          self
            .hub
            .broadcast_kline(&event.symbol, &event.interval, &event.data);
        }
        BusMessage::Ticker(batch) => {
          self.hub.broadcast_ticker(&batch);
        }
        BusMessage::KlineSub(cmd) => {
          self.mux.subscribe_stream(&cmd.stream).await;
        }
        BusMessage::TickerSub(cmd) => {
          self.hub.merge_watchlist(&cmd.symbols);
        }
      }
    }

    log::info!("bus relay stopped");
  }
}
