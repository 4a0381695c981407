use std::env;
use std::time::Duration;

/// Configuration for the gateway, read from the environment with
/// sensible defaults for a local deployment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Redis host for the pub/sub bus and the symbol cache mirror
    pub redis_host: String,

    /// Redis port
    pub redis_port: u16,

    /// Spot WebSocket base URL (combined-streams endpoint is derived from it)
    pub spot_ws_url: String,

    /// Derivatives WebSocket base URL
    pub deriv_ws_url: String,

    /// Spot REST base URL
    pub spot_api_url: String,

    /// Derivatives REST base URL
    pub deriv_api_url: String,

    /// Address the HTTP/WebSocket server binds to
    pub bind_addr: String,

    /// TTL shared by every symbol-registry dataset
    pub symbol_cache_ttl: Duration,

    /// Upstream heartbeat ping interval
    pub ping_interval: Duration,

    /// How long a session may go without any inbound frame before reconnecting
    pub ping_timeout: Duration,

    /// Delay between upstream reconnection attempts
    pub reconnect_delay: Duration,

    /// Per-client outbound buffer; a client that falls this far behind is dropped
    pub client_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            spot_ws_url: "wss://stream.binance.com:9443".to_string(),
            deriv_ws_url: "wss://fstream.binance.com".to_string(),
            spot_api_url: "https://api.binance.com/api/v3".to_string(),
            deriv_api_url: "https://fapi.binance.com/fapi/v1".to_string(),
            bind_addr: "0.0.0.0:8000".to_string(),
            symbol_cache_ttl: Duration::from_secs(3600),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(20),
            reconnect_delay: Duration::from_secs(5),
            client_buffer: 64,
        }
    }
}

impl GatewayConfig {
    /// Build a configuration from the environment, falling back to the
    /// defaults above for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            redis_host: env_or("REDIS_HOST", defaults.redis_host),
            redis_port: env::var("REDIS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.redis_port),
            // The single-stream suffix is accepted for compatibility with
            // older deployments and trimmed to the base endpoint.
            spot_ws_url: trim_ws_suffix(env_or("BINANCE_WS_URL", defaults.spot_ws_url)),
            deriv_ws_url: trim_ws_suffix(env_or("BINANCE_FUTURES_WS_URL", defaults.deriv_ws_url)),
            spot_api_url: env_or("BINANCE_API_URL", defaults.spot_api_url),
            deriv_api_url: env_or("BINANCE_FUTURES_API_URL", defaults.deriv_api_url),
            bind_addr: env_or("GATEWAY_BIND_ADDR", defaults.bind_addr),
            symbol_cache_ttl: env::var("SYMBOL_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.symbol_cache_ttl),
            ping_interval: defaults.ping_interval,
            ping_timeout: defaults.ping_timeout,
            reconnect_delay: defaults.reconnect_delay,
            client_buffer: defaults.client_buffer,
        }
    }

    /// Connection URL for the Redis instance backing the bus and the cache.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn trim_ws_suffix(url: String) -> String {
    url.trim_end_matches("/ws").trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_suffix_is_trimmed() {
        assert_eq!(
            trim_ws_suffix("wss://stream.binance.com:9443/ws".to_string()),
            "wss://stream.binance.com:9443"
        );
        assert_eq!(
            trim_ws_suffix("wss://fstream.binance.com".to_string()),
            "wss://fstream.binance.com"
        );
    }

    #[test]
    fn defaults_match_local_deployment() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.redis_url(), "redis://localhost:6379/");
        assert_eq!(cfg.symbol_cache_ttl, Duration::from_secs(3600));
    }
}
