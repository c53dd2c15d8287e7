//! Shop lookups behind the cache-aside layer
//!
//! Reads go through [`common_cache::CacheClient`] with whichever strategy the
//! service is configured for. Writes hit Postgres first and only then touch
//! the cache.

pub mod config;
pub mod logging;
pub mod service;
pub mod shop;

pub use service::{ShopError, ShopService};
pub use shop::{PgShopStore, Shop, ShopStore, ShopType};
