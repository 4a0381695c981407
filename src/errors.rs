use std::fmt;

#[derive(Debug, Clone)]
///
/// Errors raised by the gateway, grouped by the resource that failed
///
pub enum GatewayError {
  /// Upstream REST fetch failed; callers keep serving the prior snapshot
  UpstreamFetch(String),
  /// Upstream WebSocket I/O, decode or heartbeat failure
  UpstreamStream(String),
  /// Pub/sub transport failure
  BusTransport(String),
  /// A downstream client socket could not be written
  ClientSend(String),
  /// Malformed frame from a client or the bus
  Protocol(String),
}

impl fmt::Display for GatewayError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::UpstreamFetch(msg) => write!(f, "upstream fetch error: {}", msg),
      Self::UpstreamStream(msg) => write!(f, "upstream stream error: {}", msg),
      Self::BusTransport(msg) => write!(f, "bus transport error: {}", msg),
      Self::ClientSend(msg) => write!(f, "client send error: {}", msg),
      Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
    }
  }
}

impl std::error::Error for GatewayError {}
