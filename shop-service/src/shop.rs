use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};

pub const CACHE_SHOP_KEY: &str = "cache:shop:";
pub const CACHE_SHOP_TYPE_KEY: &str = "cache:shop-type:";
pub const SHOP_TYPE_LIST_ID: &str = "all";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Shop {
    pub id: i64,
    pub name: String,
    pub type_id: i64,
    pub images: String,
    pub area: Option<String>,
    pub address: String,
    pub x: f64,
    pub y: f64,
    pub avg_price: Option<i64>,
    pub sold: i32,
    pub comments: i32,
    pub score: i32,
    pub open_hours: Option<String>,
    pub update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShopType {
    pub id: i64,
    pub name: String,
    pub icon: String,
    pub sort: i32,
}

/// Source of record for shops. This is what cache loaders call into.
#[async_trait]
pub trait ShopStore {
    async fn find_shop(&self, id: i64) -> Result<Option<Shop>, sqlx::Error>;

    /// Returns false when no shop has this id.
    async fn update_shop(&self, shop: &Shop) -> Result<bool, sqlx::Error>;

    /// All shop types ordered by `sort`.
    async fn list_shop_types(&self) -> Result<Vec<ShopType>, sqlx::Error>;
}

#[derive(Clone)]
pub struct PgShopStore {
    pool: PgPool,
}

impl PgShopStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ShopStore for PgShopStore {
    async fn find_shop(&self, id: i64) -> Result<Option<Shop>, sqlx::Error> {
        let query = r#"
            SELECT id, name, type_id, images, area, address, x, y, avg_price,
                   sold, comments, score, open_hours, update_time
            FROM tb_shop
            WHERE id = $1
        "#;
        sqlx::query_as::<_, Shop>(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn update_shop(&self, shop: &Shop) -> Result<bool, sqlx::Error> {
        let query = r#"
            UPDATE tb_shop
            SET name = $2, type_id = $3, images = $4, area = $5, address = $6,
                x = $7, y = $8, avg_price = $9, sold = $10, comments = $11,
                score = $12, open_hours = $13, update_time = NOW()
            WHERE id = $1
        "#;
        let result = sqlx::query(query)
            .bind(shop.id)
            .bind(&shop.name)
            .bind(shop.type_id)
            .bind(&shop.images)
            .bind(&shop.area)
            .bind(&shop.address)
            .bind(shop.x)
            .bind(shop.y)
            .bind(shop.avg_price)
            .bind(shop.sold)
            .bind(shop.comments)
            .bind(shop.score)
            .bind(&shop.open_hours)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_shop_types(&self) -> Result<Vec<ShopType>, sqlx::Error> {
        sqlx::query_as::<_, ShopType>("SELECT id, name, icon, sort FROM tb_shop_type ORDER BY sort ASC")
            .fetch_all(&self.pool)
            .await
    }
}
