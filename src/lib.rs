#![warn(rust_2018_idioms, unreachable_pub)]
#![allow(clippy::cognitive_complexity)]

//! # marketcast
//!
//! Real-time market-data fan-out gateway for Binance kline and ticker
//! streams.
//!
//! A small number of upstream WebSocket sessions (one per venue: spot and
//! derivatives) ingest high-rate streams, normalize them and publish the
//! events on a Redis pub/sub bus. Every gateway instance runs a bus relay
//! that turns bus events into local broadcasts, so a whole cluster shares
//! a single pair of upstream connections while each instance serves its
//! own set of downstream WebSocket clients.
//!
//! ## Architecture
//!
//! - [`registry::SymbolRegistry`] - TTL cache of the tradable universe,
//!   split into disjoint spot and derivatives-only sets. Drives
//!   spot-vs-derivatives routing for REST and WebSocket alike.
//! - [`bus`] - four JSON pub/sub channels (kline data, ticker data, kline
//!   subscribe commands, ticker watchlist commands) behind a [`bus::Bus`]
//!   trait with Redis and in-memory implementations.
//! - [`upstream::UpstreamMux`] - two supervised venue sessions with
//!   reconnect, heartbeat and a live, reference-counted subscription set
//!   that survives exchange-side resets.
//! - [`relay::BusRelay`] - per-instance subscriber that dispatches bus
//!   messages to the hub and the multiplexer.
//! - [`hub::ClientHub`] - downstream client registry and broadcast loop.
//!   Slow clients are evicted, never backpressured into the upstream.
//! - [`gateway::Gateway`] - composition root that owns every component and
//!   all background task handles.
//!
//! ## Data flow
//!
//! Upstream frame -> venue session decode + normalize -> bus publish ->
//! every instance's relay -> client hub broadcast -> client socket.
//!
//! New interest flows the other way: a client connect ref-counts its
//! stream, the 0 -> 1 transition publishes a subscribe command on the bus,
//! and the instance holding the live upstream socket sends the SUBSCRIBE
//! frame. Delivery is best effort: nothing is persisted or replayed, and
//! a missed bus message is healed by the next live tick.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use marketcast::{Gateway, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), marketcast::GatewayError> {
//!     let config = GatewayConfig::from_env();
//!     let gateway = Gateway::connect(config.clone()).await?;
//!     gateway.start();
//!
//!     let app = marketcast::server::router(gateway.clone());
//!     let listener = tokio::net::TcpListener::bind(&config.bind_addr)
//!         .await
//!         .expect("bind");
//!     axum::serve(listener, app).await.expect("serve");
//!     Ok(())
//! }
//! ```
//!
//! Clients then stream candles from `/market/ws/<symbol>/<interval>` and
//! 24h tickers from `/market/ws/tickers`.

mod errors;
mod models;

pub mod bus;
pub mod config;
pub mod gateway;
pub mod hub;
pub mod registry;
pub mod relay;
pub mod rest;
pub mod server;
pub mod upstream;
pub mod watchlist;

pub use config::GatewayConfig;
pub use errors::GatewayError;
pub use gateway::Gateway;
pub use models::{
  base_symbol, filter_batch, kline_stream, CombinedFrame, KlineEvent,
  KlineFrame, KlinePayload, KlineUpdate, StreamPayload, StreamRequest,
  SymbolClass, SymbolInfo, TickerBatch, TickerEntry, TickerItem, Venue,
  TICKER_STREAM,
};
