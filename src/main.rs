use std::sync::Arc;

use marketcast::config::GatewayConfig;
use marketcast::gateway::Gateway;
use marketcast::server;

#[tokio::main]
async fn main() {
  env_logger::init();

  let config = GatewayConfig::from_env();
  log::info!("starting marketcast on {}", config.bind_addr);

  let gateway: Arc<Gateway> = match Gateway::connect(config.clone()).await {
    Ok(gateway) => gateway,
    Err(e) => {
      log::error!("failed to start gateway: {}", e);
      std::process::exit(1);
    }
  };
  gateway.start();

  let app = server::router(Arc::clone(&gateway));
  let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
    Ok(listener) => listener,
    Err(e) => {
      log::error!("failed to bind {}: {}", config.bind_addr, e);
      std::process::exit(1);
    }
  };
  log::info!("listening on {}", config.bind_addr);

  let serve = axum::serve(listener, app).with_graceful_shutdown(async {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("shutdown signal received");
  });
  if let Err(e) = serve.await {
    log::error!("server error: {}", e);
  }

  gateway.shutdown().await;
}
