//! Redis-backed [`KeyValueCache`] and the key layout shared by every cache region.
//!
//! | Key | Value | TTL |
//! |---|---|---|
//! | `meme:{id}` | image bytes served by meme id | image TTL |
//! | `meme:{template}:{line1}:...:{lineN}` | image bytes by render parameters | image TTL |
//! | `memegen-templates` | JSON template catalog | catalog TTL |
//! | `vote:{meme_id}:{voter}` | `up` or `down` | vote TTL |

use crate::{domain::KeyValueCache, errors::CacheError};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult};
use std::{future::Future, time::Duration};

pub const CATALOG_KEY: &str = "memegen-templates";

/// Stands in for an empty line list so the key always has a parameter part.
const NO_LINES_TOKEN: &str = "_";

/// Key of the image rendered from `template` and `lines`.
///
/// `%` and `:` are percent-encoded inside each part, so distinct inputs never
/// share a key while plain text keeps the readable `meme:fry:top:bottom` form.
pub fn image_key(template: &str, lines: &[String]) -> String {
    let template = escape_key_part(template);
    if lines.is_empty() {
        format!("meme:{}:{}", template, NO_LINES_TOKEN)
    } else {
        let lines: Vec<String> = lines.iter().map(|line| escape_key_part(line)).collect();
        format!("meme:{}:{}", template, lines.join(":"))
    }
}

fn escape_key_part(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}

/// Key of the image served for a stored meme.
pub fn meme_id_key(id: u64) -> String {
    format!("meme:{}", id)
}

pub fn vote_key(meme_id: u64, voter: &str) -> String {
    format!("vote:{}:{}", meme_id, voter)
}

#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    timeout: Duration,
}

impl RedisCache {
    /// Opens a managed connection. Every later call is bounded by `timeout`.
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = Client::open(redis_url).map_err(|e| CacheError::InvalidUrl(e.to_string()))?;
        let connection = match tokio::time::timeout(timeout, client.get_connection_manager()).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(CacheError::Backend(e.to_string())),
            Err(_) => return Err(CacheError::Timeout(timeout)),
        };
        tracing::info!(redis_url = %redis_url, "Connected to Redis");
        Ok(Self { connection, timeout })
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        key: &str,
        call: impl Future<Output = RedisResult<T>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(cache_op = op, cache_key = %key, error = %e, "Redis call failed");
                Err(CacheError::Backend(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(cache_op = op, cache_key = %key, timeout = ?self.timeout, "Redis call timed out");
                Err(CacheError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection.clone();
        self.bounded("GET", key, conn.get::<_, Option<Vec<u8>>>(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let seconds = ttl.as_secs().max(1);
        self.bounded("SETEX", key, conn.set_ex::<_, _, ()>(key, value, seconds)).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        self.bounded("DEL", key, conn.del::<_, ()>(key)).await
    }
}
