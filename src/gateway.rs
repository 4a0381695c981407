//! Composition root.
//!
//! A `Gateway` value owns every core component as an explicit dependency:
//! registry, bus, watchlist, upstream multiplexer, client hub, bus relay.
//! All long-lived tasks are spawned from `start()` and their handles kept,
//! so shutdown can cancel them in reverse construction order; request
//! handlers only register clients.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::bus::{Bus, RedisBus};
use crate::config::GatewayConfig;
use crate::errors::GatewayError;
use crate::hub::ClientHub;
use crate::registry::SymbolRegistry;
use crate::relay::BusRelay;
use crate::rest::UpstreamRest;
use crate::upstream::UpstreamMux;
use crate::watchlist::Watchlist;

pub struct Gateway {
  pub config: GatewayConfig,
  pub rest: UpstreamRest,
  pub registry: Arc<SymbolRegistry>,
  pub bus: Arc<dyn Bus>,
  pub watchlist: Arc<Watchlist>,
  pub mux: Arc<UpstreamMux>,
  pub hub: Arc<ClientHub>,
  tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
  /// Connect the production transports (Redis bus + cache mirror) and wire
  /// the components together.
  pub async fn connect(config: GatewayConfig) -> Result<Arc<Self>, GatewayError> {
    let url = config.redis_url();
    let bus = Arc::new(RedisBus::connect(&url).await?);

    let mirror = match redis::Client::open(url.as_str()) {
      Ok(client) => match client.get_connection_manager().await {
        Ok(manager) => Some(manager),
        Err(e) => {
          log::warn!("symbol cache mirror unavailable: {}", e);
          None
        }
      },
      Err(e) => {
        log::warn!("symbol cache mirror unavailable: {}", e);
        None
      }
    };

    Ok(Self::assemble(config, bus, mirror))
  }

  /// Wire the components around an externally supplied bus. This is the
  /// seam integration tests use with the in-memory bus.
  pub fn assemble(
    config: GatewayConfig,
    bus: Arc<dyn Bus>,
    mirror: Option<redis::aio::ConnectionManager>,
  ) -> Arc<Self> {
    let rest = UpstreamRest::new(&config);
    let registry = Arc::new(SymbolRegistry::new(
      rest.clone(),
      config.symbol_cache_ttl,
      mirror,
    ));
    let watchlist = Arc::new(Watchlist::new());
    let mux = Arc::new(UpstreamMux::new(
      config.clone(),
      Arc::clone(&registry),
      Arc::clone(&bus),
      Arc::clone(&watchlist),
    ));
    let hub = Arc::new(ClientHub::new(
      config.client_buffer,
      Arc::clone(&bus),
      Arc::clone(&mux),
      Arc::clone(&watchlist),
    ));

    Arc::new(Self {
      config,
      rest,
      registry,
      bus,
      watchlist,
      mux,
      hub,
      tasks: Mutex::new(Vec::new()),
    })
  }

  /// Spawn the long-lived background tasks: registry refresh driver, the
  /// two venue sessions and the bus relay.
  pub fn start(self: &Arc<Self>) {
    let mut tasks = self.tasks.lock().unwrap();
    tasks.push(tokio::spawn(Arc::clone(&self.registry).refresh_task()));
    tasks.extend(self.mux.spawn_sessions());
    tasks.push(
      BusRelay::new(
        Arc::clone(&self.hub),
        Arc::clone(&self.mux),
        Arc::clone(&self.bus),
      )
      .spawn(),
    );
    log::info!("gateway started with {} background tasks", tasks.len());
  }

  /// Cancel background tasks in reverse construction order. In-flight
  /// broadcasts are abandoned; dropping the relay and sessions closes the
  /// bus subscription and the upstream sockets.
  pub async fn shutdown(&self) {
    let tasks: Vec<JoinHandle<()>> =
      self.tasks.lock().unwrap().drain(..).collect();
    for handle in tasks.into_iter().rev() {
      handle.abort();
      let _ = handle.await;
    }
    log::info!("gateway stopped");
  }
}
