use crate::{
    domain::ImageOrigin,
    errors::{AppError, OriginError},
    models::TemplateCatalogEntry,
};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;

/// HTTP client for a memegen-compatible rendering service.
#[derive(Debug, Clone)]
pub struct MemegenClient {
    http_client: reqwest::Client,
    base_url: Url,
}

impl MemegenClient {
    /// Every request made through this client is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid origin URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(AppError::ConfigError(format!("Origin URL '{}' must be http(s)", base_url)));
        }
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::InitError(format!("Failed to build HTTP client: {}", e)))?;
        tracing::info!(origin = %base_url, ?timeout, "Image origin client ready");
        Ok(Self { http_client, base_url })
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`: http(s) URLs always have path segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, OriginError> {
        tracing::debug!(origin_url = %url, "Requesting from origin");
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| unavailable(url, e))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status == StatusCode::NOT_FOUND {
            tracing::debug!(origin_url = %url, "Origin returned 404");
            Err(OriginError::NotFound(url.to_string()))
        } else if status.is_server_error() {
            tracing::warn!(origin_url = %url, %status, "Origin returned server error");
            Err(OriginError::Unavailable(format!("{} returned {}", url, status)))
        } else {
            Err(OriginError::Rejected { status: status.as_u16(), url: url.to_string() })
        }
    }
}

fn unavailable(url: &str, err: reqwest::Error) -> OriginError {
    if err.is_timeout() {
        tracing::warn!(origin_url = %url, "Origin request timed out");
    } else {
        tracing::warn!(origin_url = %url, error = %err, "Origin request failed");
    }
    OriginError::Unavailable(format!("{}: {}", url, err))
}

#[async_trait]
impl ImageOrigin for MemegenClient {
    /// `/images/{template}/{line1}/.../{lineN}.png`, or `/images/{template}.png` without lines.
    fn image_url(&self, template: &str, lines: &[String]) -> String {
        // Blank lines are spelled `_` by the origin.
        let lines: Vec<&str> = lines
            .iter()
            .map(|line| if line.is_empty() { "_" } else { line.as_str() })
            .collect();

        let last = match lines.split_last() {
            None => format!("{}.png", template),
            Some((last, _)) => format!("{}.png", last),
        };
        let mut segments = vec!["images"];
        if !lines.is_empty() {
            segments.push(template);
            segments.extend(&lines[..lines.len() - 1]);
        }
        segments.push(&last);

        self.endpoint(segments).to_string()
    }

    async fn render(&self, template: &str, lines: &[String]) -> Result<Vec<u8>, OriginError> {
        let url = self.image_url(template, lines);
        self.fetch(&url).await
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, OriginError> {
        let response = self.get(url).await?;
        let bytes = response.bytes().await.map_err(|e| unavailable(url, e))?;
        tracing::debug!(origin_url = %url, size = bytes.len(), "Fetched image from origin");
        Ok(bytes.to_vec())
    }

    async fn templates(&self) -> Result<Vec<TemplateCatalogEntry>, OriginError> {
        let url = self.endpoint(["templates"]).to_string();
        let response = self.get(&url).await?;
        response.json::<Vec<TemplateCatalogEntry>>().await.map_err(|e| {
            if e.is_decode() {
                OriginError::Malformed(format!("{}: {}", url, e))
            } else {
                unavailable(&url, e)
            }
        })
    }
}
