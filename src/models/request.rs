use std::fmt;

use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
///
/// Websocket request methods
///
enum RequestMethod {
  Subscribe,
  Unsubscribe,
}

#[derive(Debug, Clone, Serialize)]
///
/// Live subscription management frame sent on an upstream socket.
///
/// Ids are opaque monotonic integers; the gateway never correlates acks.
///
pub struct StreamRequest {
  method: RequestMethod,
  params: Vec<String>,
  id: u64,
}

impl StreamRequest {
  ///
  /// Subscribe to a list of streams
  ///
  pub fn subscribe(streams: &[&str], id: u64) -> StreamRequest {
    StreamRequest {
      method: RequestMethod::Subscribe,
      params: streams.iter().map(|s| s.to_string()).collect(),
      id,
    }
  }

  ///
  /// Unsubscribe from a list of streams
  ///
  pub fn unsubscribe(streams: &[&str], id: u64) -> StreamRequest {
    StreamRequest {
      method: RequestMethod::Unsubscribe,
      params: streams.iter().map(|s| s.to_string()).collect(),
      id,
    }
  }
}

impl fmt::Display for StreamRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let json = serde_json::to_string(self)
      .expect("failed to serialize StreamRequest to JSON");
    write!(f, "{}", json)
  }
}
