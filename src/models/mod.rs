
mod frame;
mod kline;
mod request;
mod stream;
mod symbol;
mod ticker;
pub use self::frame::{CombinedFrame, StreamPayload};
pub use self::kline::{KlineEvent, KlineFrame, KlinePayload, KlineUpdate};
pub use self::request::StreamRequest;
pub use self::stream::{base_symbol, kline_stream, TICKER_STREAM};
pub use self::symbol::{SymbolClass, SymbolInfo, Venue};
pub use self::ticker::{filter_batch, TickerBatch, TickerEntry, TickerItem};
