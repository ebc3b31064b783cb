//! Streaming market ingest: one websocket session to the upstream feed
//! maintaining the authoritative last-trade price per symbol.

mod feed;
mod last_price;

pub use feed::MarketIngester;
pub use last_price::{LastPriceMap, NO_TICK};
