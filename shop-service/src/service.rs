use std::sync::Arc;
use std::time::Duration;

use common_cache::{CacheClient, CacheError, CacheResult, Strategy};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::shop::{Shop, ShopStore, ShopType, CACHE_SHOP_KEY, CACHE_SHOP_TYPE_KEY, SHOP_TYPE_LIST_ID};

#[derive(Error, Debug)]
pub enum ShopError {
    #[error("shop {0} does not exist")]
    NotFound(i64),
    #[error("invalid shop id {0}")]
    InvalidId(i64),
    #[error("no shop types configured")]
    NoShopTypes,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Shop reads fronted by the cache, writes going to the database first.
pub struct ShopService {
    store: Arc<dyn ShopStore + Send + Sync>,
    cache: Arc<CacheClient>,
    strategy: Strategy,
}

impl ShopService {
    pub fn new(
        store: Arc<dyn ShopStore + Send + Sync>,
        cache: Arc<CacheClient>,
        strategy: Strategy,
    ) -> Self {
        Self {
            store,
            cache,
            strategy,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn shop_ttl(&self) -> Duration {
        self.cache.config().default_ttl
    }

    #[instrument(skip(self), fields(strategy = %self.strategy))]
    pub async fn query_by_id(&self, id: i64) -> Result<Shop, ShopError> {
        if id <= 0 {
            return Err(ShopError::InvalidId(id));
        }

        let store = self.store.clone();
        let loader = move |id: i64| async move { store.find_shop(id).await };
        let ttl = self.shop_ttl();

        let cached: Result<CacheResult<Shop>, CacheError> = match self.strategy {
            Strategy::PassThrough => {
                self.cache
                    .get_pass_through(CACHE_SHOP_KEY, id, loader, ttl)
                    .await
            }
            Strategy::Mutex => {
                self.cache
                    .get_with_mutex(CACHE_SHOP_KEY, id, loader, ttl)
                    .await
            }
            Strategy::LogicalExpire => {
                self.cache
                    .get_with_logical_expire(CACHE_SHOP_KEY, id, loader, ttl)
                    .await
            }
        };

        let shop = match cached {
            Ok(result) => {
                debug!(source = %result.source, "shop lookup");
                result.value
            }
            Err(e) if e.is_store_unavailable() => {
                warn!(error = %e, "cache unavailable, reading shop from database");
                self.store.find_shop(id).await?
            }
            Err(e) => return Err(e.into()),
        };

        shop.ok_or(ShopError::NotFound(id))
    }

    /// Write the shop to the database, then drop or refresh its cache entry.
    ///
    /// With logical expiration the entry is rewritten instead of deleted: that
    /// strategy never loads on a miss, so a deleted hot key would read as
    /// missing until it is warmed again.
    #[instrument(skip_all, fields(id = shop.id, strategy = %self.strategy))]
    pub async fn update(&self, shop: &Shop) -> Result<(), ShopError> {
        if shop.id <= 0 {
            return Err(ShopError::InvalidId(shop.id));
        }

        if !self.store.update_shop(shop).await? {
            return Err(ShopError::NotFound(shop.id));
        }

        let refreshed = match self.strategy {
            Strategy::LogicalExpire => {
                self.cache
                    .set_with_logical_expire(CACHE_SHOP_KEY, shop.id, shop, self.shop_ttl())
                    .await
            }
            Strategy::PassThrough | Strategy::Mutex => {
                self.cache.invalidate(CACHE_SHOP_KEY, shop.id).await
            }
        };

        // the write is committed; a stale entry is bounded by its TTL
        if let Err(e) = refreshed {
            warn!(error = %e, "shop updated but its cache entry was not refreshed");
        }
        Ok(())
    }

    /// Load a shop from the database into a logical entry.
    #[instrument(skip(self))]
    pub async fn warm_shop(&self, id: i64, ttl: Duration) -> Result<(), ShopError> {
        let shop = self
            .store
            .find_shop(id)
            .await?
            .ok_or(ShopError::NotFound(id))?;

        self.cache
            .set_with_logical_expire(CACHE_SHOP_KEY, id, &shop, ttl)
            .await?;
        debug!("shop warmed");
        Ok(())
    }

    /// Shop types change rarely and are cached without expiry.
    #[instrument(skip_all)]
    pub async fn list_types(&self) -> Result<Vec<ShopType>, ShopError> {
        match self
            .cache
            .get::<Vec<ShopType>>(CACHE_SHOP_TYPE_KEY, SHOP_TYPE_LIST_ID)
            .await
        {
            Ok(Some(types)) => return Ok(types),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cache unavailable, reading shop types from database"),
        }

        let types = self.store.list_shop_types().await?;
        if types.is_empty() {
            return Err(ShopError::NoShopTypes);
        }

        if let Err(e) = self
            .cache
            .set(CACHE_SHOP_TYPE_KEY, SHOP_TYPE_LIST_ID, &types, None)
            .await
        {
            warn!(error = %e, "failed to cache shop types");
        }
        Ok(types)
    }

    /// Wait for background rebuilds to finish and refuse new ones.
    pub async fn shutdown(&self) {
        self.cache.rebuild_executor().shutdown().await;
    }
}
