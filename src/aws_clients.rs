use crate::config::Config;
use crate::errors::AppError;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use tracing;

/// Provider name reported for the placeholder credentials used against DynamoDB Local.
const LOCAL_CREDENTIALS_SOURCE: &str = "meme-cache-service-local";

fn local_credentials() -> Credentials {
    Credentials::new("local", "local", None, None, LOCAL_CREDENTIALS_SOURCE)
}

/// Loads the shared SDK configuration for the durable store.
///
/// With `AWS_ENDPOINT_URL` set, requests go to that endpoint instead of AWS, and
/// placeholder credentials are supplied when the environment carries none
/// (DynamoDB Local rejects unsigned requests but accepts any key).
pub async fn create_sdk_config(config: &Config) -> Result<SdkConfig, AppError> {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.aws_region.clone()));

    match config.localstack_endpoint.as_deref() {
        Some(endpoint) => {
            let has_credentials = std::env::var_os("AWS_ACCESS_KEY_ID").is_some();
            tracing::info!(
                sdk_region = %config.aws_region,
                endpoint,
                placeholder_credentials = !has_credentials,
                "Durable store: using endpoint override"
            );
            loader = loader.endpoint_url(endpoint);
            if !has_credentials {
                loader = loader.credentials_provider(local_credentials());
            }
        }
        None => {
            tracing::info!(sdk_region = %config.aws_region, "Durable store: using AWS endpoints and the default credential chain");
        }
    }

    Ok(loader.load().await)
}

pub fn create_dynamodb_client(sdk_config: &SdkConfig) -> DynamoDbClient {
    DynamoDbClient::new(sdk_config)
}
