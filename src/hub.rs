//! Per-instance registry of downstream WebSocket clients.
//!
//! The hub owns the kline and ticker indices, the stream ref-counter and
//! the watchlist rebuild logic, all behind one mutex that is held only
//! across map manipulation, never across I/O. Broadcasts iterate a snapshot
//! copy of the client list and push through bounded per-client queues: a
//! client whose queue is full has fallen too far behind and is evicted
//! rather than backpressured into the upstream.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::bus::{
  encode_payload, Bus, KlineSubCmd, TickerSubCmd, CH_CMD_KLINE_SUB,
  CH_CMD_TICKER_SUB,
};
use crate::models::{kline_stream, KlineUpdate, TickerBatch};
use crate::upstream::UpstreamMux;
use crate::watchlist::Watchlist;

pub type ClientId = u64;

/// Outbound handle for one connected client. The receiving half is drained
/// by the client's socket task in the server layer.
#[derive(Debug, Clone)]
struct ClientSender {
  id: ClientId,
  tx: mpsc::Sender<String>,
}

/// Per-stream count of interested local clients.
///
/// The set of streams with a positive count is exactly the set this
/// instance has asked the upstream multiplexer to carry.
#[derive(Debug, Default)]
pub struct RefCounter {
  counts: HashMap<String, u32>,
}

impl RefCounter {
  /// Increment; true iff the stream transitioned 0 -> 1.
  pub fn acquire(&mut self, stream: &str) -> bool {
    let count = self.counts.entry(stream.to_string()).or_insert(0);
    *count += 1;
    *count == 1
  }

  /// Decrement; true iff the stream transitioned 1 -> 0.
  pub fn release(&mut self, stream: &str) -> bool {
    match self.counts.get_mut(stream) {
      Some(count) if *count > 1 => {
        *count -= 1;
        false
      }
      Some(_) => {
        self.counts.remove(stream);
        true
      }
      None => {
        // Releasing an untracked stream means connect/disconnect pairing
        // is broken somewhere; flag it loudly instead of clamping.
        log::error!("ref-count underflow on stream {}", stream);
        false
      }
    }
  }

  pub fn count(&self, stream: &str) -> u32 {
    self.counts.get(stream).copied().unwrap_or(0)
  }

  /// Streams currently held by at least one client.
  pub fn active(&self) -> Vec<String> {
    self.counts.keys().cloned().collect()
  }
}

#[derive(Debug, Default)]
struct HubState {
  /// (lowercase symbol, interval) -> connected kline clients
  kline_index: HashMap<(String, String), Vec<ClientSender>>,
  ticker_clients: Vec<ClientSender>,
  /// Declared (uppercase) symbol set per ticker client
  ticker_subs: HashMap<ClientId, HashSet<String>>,
  ref_counts: RefCounter,
}

impl HubState {
  fn watched_union(&self) -> HashSet<String> {
    let mut union = HashSet::new();
    for set in self.ticker_subs.values() {
      union.extend(set.iter().cloned());
    }
    union
  }
}

pub struct ClientHub {
  state: Arc<Mutex<HubState>>,
  watchlist: Arc<Watchlist>,
  bus: Arc<dyn Bus>,
  mux: Arc<UpstreamMux>,
  next_client_id: AtomicU64,
  client_buffer: usize,
}

impl ClientHub {
  pub fn new(
    client_buffer: usize,
    bus: Arc<dyn Bus>,
    mux: Arc<UpstreamMux>,
    watchlist: Arc<Watchlist>,
  ) -> Self {
    Self {
      state: Arc::new(Mutex::new(HubState::default())),
      watchlist,
      bus,
      mux,
      next_client_id: AtomicU64::new(1),
      client_buffer,
    }
  }

  /// Register a kline client. The first client of a stream publishes the
  /// subscribe command on the bus; the instance holding the live upstream
  /// socket picks it up from there.
  pub fn connect_kline(
    &self,
    symbol: &str,
    interval: &str,
  ) -> (ClientId, mpsc::Receiver<String>) {
    let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::channel(self.client_buffer);
    let stream = kline_stream(symbol, interval);

    let (first, total) = {
      let mut state = self.state.lock().unwrap();
      let clients = state
        .kline_index
        .entry(index_key(symbol, interval))
        .or_default();
      clients.push(ClientSender { id, tx });
      let total = clients.len();
      (state.ref_counts.acquire(&stream), total)
    };
    log::info!("client {} connected to {} (total: {})", id, stream, total);

    if first {
      self.bus.publish(
        CH_CMD_KLINE_SUB,
        encode_payload(&KlineSubCmd { stream }),
      );
    }
    (id, rx)
  }

  /// Remove a kline client. Idempotent: eviction during broadcast and the
  /// socket task's own disconnect may both land here.
  pub fn disconnect_kline(&self, id: ClientId, symbol: &str, interval: &str) {
    let stream = kline_stream(symbol, interval);
    let released = {
      let mut state = self.state.lock().unwrap();
      let key = index_key(symbol, interval);
      let mut removed = false;
      if let Some(clients) = state.kline_index.get_mut(&key) {
        let before = clients.len();
        clients.retain(|c| c.id != id);
        removed = clients.len() < before;
        if clients.is_empty() {
          state.kline_index.remove(&key);
        }
      }
      removed && state.ref_counts.release(&stream)
    };

    if released {
      log::info!("last client left {}, scheduling local unsubscribe", stream);
      self.schedule_local_unsubscribe(stream);
    }
  }

  /// Unsubscribing is local only: sibling instances may still hold
  /// interest, so no bus command is emitted for the 1 -> 0 transition.
  fn schedule_local_unsubscribe(&self, stream: String) {
    let state = Arc::clone(&self.state);
    let mux = Arc::clone(&self.mux);
    tokio::spawn(async move {
      // A client re-acquiring the stream in the window cancels the pending
      // unsubscribe and keeps it live.
      let idle = state.lock().unwrap().ref_counts.count(&stream) == 0;
      if idle {
        mux.unsubscribe_stream(&stream);
      }
    });
  }

  pub fn connect_ticker(&self) -> (ClientId, mpsc::Receiver<String>) {
    let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::channel(self.client_buffer);

    let total = {
      let mut state = self.state.lock().unwrap();
      state.ticker_clients.push(ClientSender { id, tx });
      state.ticker_subs.insert(id, HashSet::new());
      state.ticker_clients.len()
    };
    log::info!("client {} connected to ticker stream (total: {})", id, total);
    (id, rx)
  }

  /// Replace (not accumulate) the client's declared symbol set, rebuild the
  /// watchlist and announce the new symbols to sibling instances.
  pub fn subscribe_ticker(&self, id: ClientId, symbols: &[String]) {
    let upper: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();

    {
      let mut state = self.state.lock().unwrap();
      match state.ticker_subs.get_mut(&id) {
        Some(declared) => *declared = upper.iter().cloned().collect(),
        None => return,
      }
      self.watchlist.replace(state.watched_union());
    }
    log::info!(
      "client {} watching {} symbols; watchlist now {}",
      id,
      upper.len(),
      self.watchlist.len()
    );

    if !upper.is_empty() {
      self.bus.publish(
        CH_CMD_TICKER_SUB,
        encode_payload(&TickerSubCmd { symbols: upper }),
      );
    }
  }

  pub fn disconnect_ticker(&self, id: ClientId) {
    let mut state = self.state.lock().unwrap();
    state.ticker_clients.retain(|c| c.id != id);
    if state.ticker_subs.remove(&id).is_some() {
      self.watchlist.replace(state.watched_union());
      log::info!("client {} disconnected from ticker stream", id);
    }
  }

  /// Fold symbols announced by a sibling instance into this instance's
  /// watchlist (bus relay path).
  pub fn merge_watchlist(&self, symbols: &[String]) {
    let state = self.state.lock().unwrap();
    let mut union = state.watched_union();
    union.extend(symbols.iter().map(|s| s.to_uppercase()));
    self.watchlist.replace(union);
    log::info!("global watchlist updated: {} symbols tracked", self.watchlist.len());
  }

  pub fn broadcast_kline(&self, symbol: &str, interval: &str, data: &KlineUpdate) {
    let payload = encode_payload(data);
    // Snapshot copy: evictions below must not invalidate the iteration.
    let clients: Vec<ClientSender> = {
      let state = self.state.lock().unwrap();
      state
        .kline_index
        .get(&index_key(symbol, interval))
        .cloned()
        .unwrap_or_default()
    };

    for client in &clients {
      if client.tx.try_send(payload.clone()).is_err() {
        log::warn!(
          "evicting slow kline client {} on {}@{}",
          client.id,
          symbol,
          interval
        );
        self.disconnect_kline(client.id, symbol, interval);
      }
    }
  }

  /// Send the whole batch to every ticker client; the client renders only
  /// what it asked for, so no per-client filtering happens here.
  pub fn broadcast_ticker(&self, batch: &TickerBatch) {
    let payload = encode_payload(batch);
    let clients: Vec<ClientSender> =
      self.state.lock().unwrap().ticker_clients.clone();

    for client in &clients {
      if client.tx.try_send(payload.clone()).is_err() {
        log::warn!("evicting slow ticker client {}", client.id);
        self.disconnect_ticker(client.id);
      }
    }
  }

  pub fn stream_count(&self, stream: &str) -> u32 {
    self.state.lock().unwrap().ref_counts.count(stream)
  }

  pub fn active_streams(&self) -> Vec<String> {
    self.state.lock().unwrap().ref_counts.active()
  }

  pub fn kline_client_count(&self, symbol: &str, interval: &str) -> usize {
    self
      .state
      .lock()
      .unwrap()
      .kline_index
      .get(&index_key(symbol, interval))
      .map(|clients| clients.len())
      .unwrap_or(0)
  }

  pub fn ticker_client_count(&self) -> usize {
    self.state.lock().unwrap().ticker_clients.len()
  }
}

fn index_key(symbol: &str, interval: &str) -> (String, String) {
  (symbol.to_lowercase(), interval.to_string())
}
