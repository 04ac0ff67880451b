use std::{env, net::SocketAddr, str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid environment variable format for {0}: {1}")]
    InvalidVar(String, String),
}

/// How long each cache namespace keeps its entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheTtls {
    /// Both image namespaces (`meme:{id}` and `meme:{template}:...`).
    pub image: Duration,
    pub catalog: Duration,
    /// Expiry of a voter's record. A vote after expiry counts as fresh.
    pub vote: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            image: Duration::from_secs(7 * 24 * 60 * 60),
            catalog: Duration::from_secs(24 * 60 * 60),
            vote: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub memegen_url: String,
    pub redis_url: String,
    // Store region as string for simplicity here, aws_clients can convert
    pub aws_region: String,
    // Optional endpoint for DynamoDB Local / LocalStack
    pub localstack_endpoint: Option<String>,
    pub memes_table: String,
    pub comments_table: String,
    pub counters_table: String,
    /// Deletion is refused for everyone when unset.
    pub admin_key: Option<String>,
    pub origin_timeout: Duration,
    pub cache_timeout: Duration,
    pub ttls: CacheTtls,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignores errors, relies on env vars otherwise)
        dotenvy::dotenv().ok();

        let bind_address_str = env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8181".to_string());
        let bind_address = SocketAddr::from_str(&bind_address_str)
            .map_err(|e| ConfigError::InvalidVar("BIND_ADDRESS".into(), e.to_string()))?;

        let memegen_url = env::var("MEMEGEN_URL")
            .unwrap_or_else(|_| "http://localhost:5002".to_string())
            .trim_end_matches('/')
            .to_string();
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let aws_region = env::var("AWS_DEFAULT_REGION")
            .unwrap_or_else(|_| "ca-central-1".to_string());
        let localstack_endpoint = env::var("AWS_ENDPOINT_URL").ok();

        let memes_table = env::var("MEMES_TABLE").unwrap_or_else(|_| "memes".to_string());
        let comments_table = env::var("COMMENTS_TABLE").unwrap_or_else(|_| "meme_comments".to_string());
        let counters_table = env::var("COUNTERS_TABLE").unwrap_or_else(|_| "meme_counters".to_string());

        let admin_key = env::var("ADMIN_KEY").ok().filter(|key| !key.is_empty());
        if admin_key.is_none() {
            tracing::warn!("ADMIN_KEY is not set, meme deletion is disabled");
        }

        let defaults = CacheTtls::default();
        let ttls = CacheTtls {
            image: duration_var("IMAGE_CACHE_TTL_SECS", defaults.image, Duration::from_secs)?,
            catalog: duration_var("CATALOG_CACHE_TTL_SECS", defaults.catalog, Duration::from_secs)?,
            vote: duration_var("VOTE_TTL_SECS", defaults.vote, Duration::from_secs)?,
        };

        Ok(Config {
            bind_address,
            memegen_url,
            redis_url,
            aws_region,
            localstack_endpoint,
            memes_table,
            comments_table,
            counters_table,
            admin_key,
            origin_timeout: duration_var("ORIGIN_TIMEOUT_MS", Duration::from_millis(5000), Duration::from_millis)?,
            cache_timeout: duration_var("CACHE_TIMEOUT_MS", Duration::from_millis(500), Duration::from_millis)?,
            ttls,
        })
    }
}

fn duration_var(
    name: &str,
    default: Duration,
    unit: fn(u64) -> Duration,
) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_duration(name, &raw, unit),
        Err(_) => Ok(default),
    }
}

fn parse_duration(name: &str, raw: &str, unit: fn(u64) -> Duration) -> Result<Duration, ConfigError> {
    let value: u64 = raw
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| ConfigError::InvalidVar(name.into(), e.to_string()))?;
    if value == 0 {
        return Err(ConfigError::InvalidVar(name.into(), "must be greater than zero".into()));
    }
    Ok(unit(value))
}
