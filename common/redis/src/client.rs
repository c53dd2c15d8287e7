use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::{Client, CustomRedisError};

// Compare-and-delete, so a holder whose TTL lapsed cannot remove a newer holder's key
const DEL_IF_EQ_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// Create a new RedisClient without command or connection timeouts.
    pub async fn new(addr: String) -> Result<RedisClient, CustomRedisError> {
        Self::with_config(addr, None, None).await
    }

    /// Create a new RedisClient with explicit timeouts
    ///
    /// # Arguments
    /// * `addr` - Redis connection string
    /// * `response_timeout` - Timeout for command responses. `None` blocks indefinitely.
    /// * `connection_timeout` - Timeout for establishing connections. `None` blocks indefinitely.
    ///
    /// # Errors
    /// Returns `CustomRedisError::InvalidConfiguration` if `Some(Duration::ZERO)` is passed - use `None` for no timeout instead.
    ///
    /// # Examples
    /// ```no_run
    /// use common_redis::RedisClient;
    /// use std::time::Duration;
    ///
    /// # async fn example() {
    /// let client = RedisClient::with_config(
    ///     "redis://localhost:6379".to_string(),
    ///     Some(Duration::from_millis(100)),
    ///     Some(Duration::from_millis(5000)),
    /// ).await.unwrap();
    /// # }
    /// ```
    pub async fn with_config(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        validate_timeout("response", response_timeout)?;
        validate_timeout("connection", connection_timeout)?;

        let client = redis::Client::open(addr)?;

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }
        if let Some(timeout) = connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;
        debug!(?response_timeout, ?connection_timeout, "redis connection established");

        Ok(RedisClient { connection })
    }
}

fn validate_timeout(name: &str, timeout: Option<Duration>) -> Result<(), CustomRedisError> {
    match timeout {
        Some(timeout) if timeout.is_zero() => Err(CustomRedisError::InvalidConfiguration(
            format!("Redis {name} timeout cannot be Duration::ZERO - use None for no timeout"),
        )),
        _ => Ok(()),
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<Option<Vec<u8>>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let raw: Option<Vec<u8>> = conn.get(k).await?;
        Ok(raw)
    }

    async fn set(&self, k: String, v: Vec<u8>) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(k, v).await?;
        Ok(())
    }

    async fn setex(&self, k: String, v: Vec<u8>, seconds: u64) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(k, v, seconds).await?;
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        k: String,
        v: Vec<u8>,
        seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();

        let result: Result<Option<String>, RedisError> = redis::cmd("SET")
            .arg(&k)
            .arg(&v)
            .arg("EX")
            .arg(seconds)
            .arg("NX")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(Some(_)) => Ok(true), // Key was set
            Ok(None) => Ok(false),   // Key already existed
            Err(e) => Err(e.into()),
        }
    }

    async fn del(&self, k: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(k).await?;
        Ok(())
    }

    async fn del_if_eq(&self, k: String, expected: Vec<u8>) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let deleted: i64 = redis::Script::new(DEL_IF_EQ_SCRIPT)
            .key(k)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn expire(&self, k: String, seconds: u64) -> Result<bool, CustomRedisError> {
        let seconds = i64::try_from(seconds).map_err(|_| {
            CustomRedisError::InvalidConfiguration(format!("TTL of {seconds}s is out of range"))
        })?;
        let mut conn = self.connection.clone();
        let updated: bool = conn.expire(k, seconds).await?;
        Ok(updated)
    }

    async fn hset_multiple(
        &self,
        k: String,
        fields: Vec<(String, String)>,
    ) -> Result<(), CustomRedisError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        conn.hset_multiple::<_, _, _, ()>(k, &fields).await?;
        Ok(())
    }

    async fn hgetall(&self, k: String) -> Result<HashMap<String, String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = conn.hgetall(k).await?;
        Ok(fields)
    }
}
