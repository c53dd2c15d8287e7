//! Warm the shop cache: load every configured hot shop into a logical entry.
use std::sync::Arc;

use anyhow::Context;
use common_cache::CacheClient;
use common_redis::RedisClient;
use envconfig::Envconfig;
use tracing::{info, warn};

use shop_service::config::Config;
use shop_service::logging::init_tracing;
use shop_service::{PgShopStore, ShopService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().context("invalid configuration")?;
    init_tracing(config.debug);

    let store = PgShopStore::connect(&config.database_url, config.max_pg_connections)
        .await
        .context("failed to connect to postgres")?;

    let redis = RedisClient::with_config(
        config.redis_url.clone(),
        Some(config.redis_response_timeout_ms.0),
        Some(config.redis_connection_timeout_ms.0),
    )
    .await
    .context("failed to connect to redis")?;

    let cache_config = (&config.cache).into();
    let cache = CacheClient::new(Arc::new(redis), cache_config)?;
    let ttl = cache.config().default_ttl;
    let service = ShopService::new(Arc::new(store), Arc::new(cache), config.read_strategy);

    let mut warmed = 0;
    for &id in &config.hot_shop_ids.0 {
        match service.warm_shop(id, ttl).await {
            Ok(()) => warmed += 1,
            Err(e) => warn!(id, error = %e, "failed to warm shop"),
        }
    }
    info!(
        warmed,
        requested = config.hot_shop_ids.0.len(),
        "shop cache warm-up finished"
    );

    service.shutdown().await;
    Ok(())
}
