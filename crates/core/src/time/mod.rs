pub mod market_session;

pub use market_session::{ExchangeRule, MarketSessionTracker, TickerMatch};
