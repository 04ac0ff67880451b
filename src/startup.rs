use crate::{
    cache::RedisCache,
    config::Config,
    errors::{AppError, CacheError},
    repositories::TableNames,
};
use aws_sdk_dynamodb::{
    error::SdkError as DynamoSdkError,
    types::{AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType},
    Client as DynamoDbClient,
};
use backoff::{future::retry, ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;
use tracing;

/// How long startup keeps retrying dependencies that are still coming up.
const STARTUP_RETRY_WINDOW: Duration = Duration::from_secs(30);

struct KeyAttribute {
    name: &'static str,
    attribute_type: ScalarAttributeType,
    key_type: KeyType,
}

fn startup_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(250))
        .with_max_elapsed_time(Some(STARTUP_RETRY_WINDOW))
        .build()
}

fn table_layouts(tables: &TableNames) -> Vec<(&str, Vec<KeyAttribute>)> {
    vec![
        (
            tables.memes.as_str(),
            vec![KeyAttribute { name: "meme_id", attribute_type: ScalarAttributeType::N, key_type: KeyType::Hash }],
        ),
        (
            tables.comments.as_str(),
            vec![
                KeyAttribute { name: "meme_id", attribute_type: ScalarAttributeType::N, key_type: KeyType::Hash },
                KeyAttribute { name: "comment_key", attribute_type: ScalarAttributeType::S, key_type: KeyType::Range },
            ],
        ),
        (
            tables.counters.as_str(),
            vec![KeyAttribute { name: "counter", attribute_type: ScalarAttributeType::S, key_type: KeyType::Hash }],
        ),
    ]
}

/// Creates the DynamoDB table if it doesn't exist, retrying while the endpoint is unreachable.
async fn create_dynamodb_table_if_not_exists(
    client: &DynamoDbClient,
    table_name: &str,
    keys: &[KeyAttribute],
) -> Result<(), AppError> {
    let mut request = client
        .create_table()
        .table_name(table_name)
        .billing_mode(BillingMode::PayPerRequest);
    for key in keys {
        request = request
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(key.name)
                    .attribute_type(key.attribute_type.clone())
                    .build()?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(key.name)
                    .key_type(key.key_type.clone())
                    .build()?,
            );
    }

    let request = &request;
    retry(startup_backoff(), || async move {
        match request.clone().send().await {
            Ok(_) => {
                tracing::info!("Startup: Table '{}' created successfully or setup initiated.", table_name);
                Ok(())
            }
            Err(DynamoSdkError::ServiceError(service_err)) => {
                if service_err.err().is_resource_in_use_exception() {
                    tracing::info!("Startup: Table '{}' already exists, no action needed.", table_name);
                    Ok(())
                } else {
                    let context = format!("Startup: Service error creating DynamoDB table '{}'", table_name);
                    tracing::error!("{}: {:?}", context, service_err.err());
                    Err(backoff::Error::permanent(AppError::InitError(format!(
                        "{}: {}",
                        context,
                        service_err.err()
                    ))))
                }
            }
            Err(e) => {
                // Dispatch failures and timeouts: the endpoint may still be starting.
                tracing::warn!("Startup: SDK error creating DynamoDB table '{}', retrying: {}", table_name, e);
                Err(backoff::Error::transient(AppError::InitError(format!(
                    "Startup: SDK error creating DynamoDB table '{}': {}",
                    table_name, e
                ))))
            }
        }
    })
    .await
}

/// Initializes the required DynamoDB tables (memes, comments, id counters).
pub async fn init_resources(db_client: &DynamoDbClient, tables: &TableNames) -> Result<(), AppError> {
    tracing::info!("Startup: Initializing AWS resources...");
    for (table_name, keys) in table_layouts(tables) {
        create_dynamodb_table_if_not_exists(db_client, table_name, &keys).await?;
    }
    tracing::info!("Startup: AWS resource initialization complete.");
    Ok(())
}

/// Connects to Redis, retrying while it is unreachable.
pub async fn connect_cache(config: &Config) -> Result<RedisCache, AppError> {
    tracing::info!("Startup: Connecting to Redis...");
    retry(startup_backoff(), || async move {
        RedisCache::connect(&config.redis_url, config.cache_timeout)
            .await
            .map_err(|e| match e {
                e @ CacheError::InvalidUrl(_) => backoff::Error::permanent(e),
                e => {
                    tracing::warn!("Startup: Redis not reachable yet, retrying: {}", e);
                    backoff::Error::transient(e)
                }
            })
    })
    .await
    .map_err(|e| AppError::InitError(format!("Startup: Failed to connect to Redis at {}: {}", config.redis_url, e)))
}
