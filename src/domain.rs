use crate::errors::{CacheError, OriginError, RepoError};
use crate::models::{Comment, Meme, NewMeme, TemplateCatalogEntry};
use async_trait::async_trait;
use std::time::Duration;

/// Trait defining operations for storing and retrieving Meme metadata, tallies and comments.
#[async_trait]
pub trait MemeRepository: Send + Sync + 'static { // Send+Sync+'static required for Arc<dyn>
    /// Persists a new meme with a zero tally. The store assigns the id.
    async fn create(&self, meme: NewMeme) -> Result<Meme, RepoError>;

    /// Returns Ok(None) if the meme is not found.
    async fn get_by_id(&self, id: u64) -> Result<Option<Meme>, RepoError>;

    /// All memes, highest tally first.
    async fn list_all(&self) -> Result<Vec<Meme>, RepoError>;

    /// Atomically adds `delta` to the tally and returns the stored value after the write.
    async fn adjust_votes(&self, id: u64, delta: i64) -> Result<i64, RepoError>;

    /// Removes the meme and its comments, returning the removed meme.
    async fn delete(&self, id: u64) -> Result<Meme, RepoError>;

    async fn add_comment(&self, comment: &Comment) -> Result<(), RepoError>;

    /// Comments of a meme, oldest first.
    async fn list_comments(&self, meme_id: u64) -> Result<Vec<Comment>, RepoError>;
}

/// Shared byte-string store with per-entry expiry.
#[async_trait]
pub trait KeyValueCache: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// External service that renders meme images and lists templates.
#[async_trait]
pub trait ImageOrigin: Send + Sync + 'static {
    /// Locator of the rendered image for these parameters.
    fn image_url(&self, template: &str, lines: &[String]) -> String;

    async fn render(&self, template: &str, lines: &[String]) -> Result<Vec<u8>, OriginError>;

    /// Fetches a previously derived locator as-is.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, OriginError>;

    async fn templates(&self) -> Result<Vec<TemplateCatalogEntry>, OriginError>;
}
