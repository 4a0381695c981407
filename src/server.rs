//! Downstream HTTP/WebSocket surface.
//!
//! Handlers only register clients and proxy registry/REST queries; every
//! long-lived task is owned by the gateway. Client sockets are drained by
//! one task per connection that multiplexes hub updates with inbound
//! (keep-alive or control) frames.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::gateway::Gateway;
use crate::hub::ClientId;
use crate::models::{SymbolClass, TickerBatch, Venue};

pub fn router(gateway: Arc<Gateway>) -> Router {
  Router::new()
    .route("/", get(root))
    .route("/market/ws/tickers", get(ws_tickers))
    .route("/market/ws/{symbol}/{interval}", get(ws_kline))
    .route("/market/klines/{symbol}", get(get_klines))
    .route("/market/tickers", get(get_tickers))
    .route("/market/search", get(search_markets))
    .route("/market/popular", get(get_popular))
    .with_state(gateway)
}

async fn root() -> Json<serde_json::Value> {
  Json(json!({ "message": "marketcast gateway is running" }))
}

async fn ws_kline(
  State(gateway): State<Arc<Gateway>>,
  Path((symbol, interval)): Path<(String, String)>,
  ws: WebSocketUpgrade,
) -> Response {
  ws.on_upgrade(move |socket| serve_kline_client(gateway, socket, symbol, interval))
}

async fn serve_kline_client(
  gateway: Arc<Gateway>,
  socket: WebSocket,
  symbol: String,
  interval: String,
) {
  let (id, mut updates) = gateway.hub.connect_kline(&symbol, &interval);
  let (mut sink, mut stream) = socket.split();

  loop {
    tokio::select! {
      update = updates.recv() => match update {
        Some(payload) => {
          if sink.send(WsMessage::Text(payload.into())).await.is_err() {
            break;
          }
        }
        // The hub evicted this client (it fell behind).
        None => break,
      },
      inbound = stream.next() => match inbound {
        // Clients may send arbitrary frames as keep-alive; discard them.
        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
        Some(Ok(_)) => {}
      },
    }
  }

  gateway.hub.disconnect_kline(id, &symbol, &interval);
}

#[derive(Debug, Deserialize)]
struct TickerControl {
  action: String,
  #[serde(default)]
  symbols: Vec<String>,
}

async fn ws_tickers(
  State(gateway): State<Arc<Gateway>>,
  ws: WebSocketUpgrade,
) -> Response {
  ws.on_upgrade(move |socket| serve_ticker_client(gateway, socket))
}

async fn serve_ticker_client(gateway: Arc<Gateway>, socket: WebSocket) {
  let (id, mut updates) = gateway.hub.connect_ticker();
  let (mut sink, mut stream) = socket.split();

  loop {
    tokio::select! {
      update = updates.recv() => match update {
        Some(payload) => {
          if sink.send(WsMessage::Text(payload.into())).await.is_err() {
            break;
          }
        }
        None => break,
      },
      inbound = stream.next() => match inbound {
        Some(Ok(WsMessage::Text(text))) => {
          handle_ticker_control(&gateway, id, text.as_ref());
        }
        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
        Some(Ok(_)) => {}
      },
    }
  }

  gateway.hub.disconnect_ticker(id);
}

/// A malformed control frame is dropped; the connection stays open.
fn handle_ticker_control(gateway: &Arc<Gateway>, id: ClientId, text: &str) {
  match serde_json::from_str::<TickerControl>(text) {
    Ok(control) if control.action == "subscribe" => {
      gateway.hub.subscribe_ticker(id, &control.symbols);
    }
    Ok(control) => {
      log::debug!("ignoring ticker control action {:?}", control.action);
    }
    Err(e) => {
      log::debug!("dropping malformed ticker control frame: {}", e);
    }
  }
}

#[derive(Debug, Deserialize)]
struct KlinesQuery {
  #[serde(default = "default_interval")]
  interval: String,
  #[serde(default)]
  #[allow(dead_code)]
  asset_type: Option<String>,
}

fn default_interval() -> String {
  "1d".to_string()
}

async fn get_klines(
  State(gateway): State<Arc<Gateway>>,
  Path(symbol): Path<String>,
  Query(query): Query<KlinesQuery>,
) -> Response {
  // Derivatives-only pairs route to the derivatives REST endpoint; the
  // caller's asset_type hint does not override classification.
  let venue = match gateway.registry.classify(&symbol).await {
    SymbolClass::Deriv => Venue::Deriv,
    _ => Venue::Spot,
  };

  match gateway.rest.klines(venue, &symbol, &query.interval, 1000).await {
    Ok(data) if !data.is_empty() => Json(data).into_response(),
    Ok(_) => not_found("Data not found or error fetching data"),
    Err(e) => {
      log::error!("klines fetch for {} failed: {}", symbol, e);
      not_found("Data not found or error fetching data")
    }
  }
}

#[derive(Debug, Deserialize)]
struct TickersQuery {
  #[serde(default)]
  crypto_symbols: String,
  #[serde(default)]
  #[allow(dead_code)]
  stock_symbols: String,
}

async fn get_tickers(
  State(gateway): State<Arc<Gateway>>,
  Query(query): Query<TickersQuery>,
) -> Json<TickerBatch> {
  let mut results = TickerBatch::new();

  let mut spot = Vec::new();
  let mut deriv = Vec::new();
  for symbol in query.crypto_symbols.split(',') {
    let symbol = symbol.trim();
    if symbol.is_empty() {
      continue;
    }
    match gateway.registry.classify(symbol).await {
      SymbolClass::Deriv => deriv.push(symbol.to_uppercase()),
      _ => spot.push(symbol.to_uppercase()),
    }
  }

  // The venues are fetched independently so one failing endpoint only
  // degrades the batch.
  for (venue, symbols) in [(Venue::Spot, spot), (Venue::Deriv, deriv)] {
    if symbols.is_empty() {
      continue;
    }
    match gateway.rest.ticker_24h(venue, &symbols).await {
      Ok(batch) => results.extend(batch),
      Err(e) => log::error!("[{}] 24h ticker fetch failed: {}", venue, e),
    }
  }

  Json(results)
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
  #[serde(default)]
  query: String,
  #[serde(default)]
  limit: Option<usize>,
  #[serde(default)]
  #[allow(dead_code)]
  asset_type: Option<String>,
}

async fn search_markets(
  State(gateway): State<Arc<Gateway>>,
  Query(query): Query<SearchQuery>,
) -> Json<Vec<crate::models::SymbolInfo>> {
  if let Err(e) = gateway.registry.ensure().await {
    log::error!("symbol search without snapshot: {}", e);
  }
  Json(gateway.registry.search(&query.query, query.limit.unwrap_or(10)))
}

async fn get_popular(State(gateway): State<Arc<Gateway>>) -> Json<Vec<String>> {
  if let Err(e) = gateway.registry.ensure().await {
    log::error!("popular list without snapshot: {}", e);
  }
  Json(gateway.registry.popular())
}

fn not_found(detail: &str) -> Response {
  (StatusCode::NOT_FOUND, Json(json!({ "detail": detail }))).into_response()
}
