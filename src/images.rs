//! Cache-aside resolution of rendered meme images.
//!
//! Two independent regions hold image bytes: one keyed by render parameters
//! (`meme:{template}:{lines...}`) and one keyed by stored meme id (`meme:{id}`).
//! Filling one never fills the other, and deleting a meme must clear both
//! (see [`ImageResolver::invalidate`]).

use crate::{
    cache::{image_key, meme_id_key},
    domain::{ImageOrigin, KeyValueCache, MemeRepository},
    errors::{OriginError, ServiceError},
    models::Meme,
};
use std::{future::Future, sync::Arc, time::Duration};

#[derive(Clone)]
pub struct ImageResolver {
    cache: Arc<dyn KeyValueCache>,
    origin: Arc<dyn ImageOrigin>,
    repo: Arc<dyn MemeRepository>,
    ttl: Duration,
}

impl ImageResolver {
    pub fn new(
        cache: Arc<dyn KeyValueCache>,
        origin: Arc<dyn ImageOrigin>,
        repo: Arc<dyn MemeRepository>,
        ttl: Duration,
    ) -> Self {
        Self { cache, origin, repo, ttl }
    }

    /// Image for `template` and `lines`, served from the parameter-keyed region.
    pub async fn resolve(&self, template: &str, lines: &[String]) -> Result<Vec<u8>, ServiceError> {
        let key = image_key(template, lines);
        self.cached_or_fetch(&key, || self.origin.render(template, lines))
            .await
    }

    /// Image of a stored meme, served from the id-keyed region.
    ///
    /// The store is consulted first, so a deleted meme is `NotFound` even when
    /// a stale `meme:{id}` entry survived its invalidation.
    pub async fn resolve_by_meme_id(&self, id: u64) -> Result<Vec<u8>, ServiceError> {
        let meme = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Meme {}", id)))?;

        let key = meme_id_key(id);
        self.cached_or_fetch(&key, || self.origin.fetch(&meme.url))
            .await
    }

    /// Clears both image regions for `meme`. Failures are logged only; stale entries expire via TTL.
    pub async fn invalidate(&self, meme: &Meme) {
        for key in [meme_id_key(meme.id), image_key(&meme.template, &meme.lines)] {
            match self.cache.delete(&key).await {
                Ok(()) => tracing::debug!(meme_id = meme.id, cache_key = %key, "Invalidated cached image"),
                Err(e) => tracing::warn!(
                    meme_id = meme.id,
                    cache_key = %key,
                    error = %e,
                    "Failed to invalidate cached image, entry will expire via TTL"
                ),
            }
        }
    }

    async fn cached_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<Vec<u8>, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, OriginError>>,
    {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => {
                tracing::debug!(cache_key = %key, size = bytes.len(), "Image cache hit");
                return Ok(bytes);
            }
            Ok(None) => tracing::debug!(cache_key = %key, "Image cache miss"),
            // Degrade to the origin rather than failing the request.
            Err(e) => tracing::warn!(cache_key = %key, error = %e, "Image cache read failed, going to origin"),
        }

        // Misses and failures are never cached.
        let bytes = fetch().await?;

        if let Err(e) = self.cache.set(key, &bytes, self.ttl).await {
            tracing::warn!(cache_key = %key, error = %e, "Failed to cache image");
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::NewMeme,
        testing::{lines, InMemoryCache, InMemoryMemeRepository, StubOrigin},
    };
    use std::sync::atomic::Ordering;

    struct Fixture {
        cache: Arc<InMemoryCache>,
        origin: Arc<StubOrigin>,
        repo: Arc<InMemoryMemeRepository>,
        resolver: ImageResolver,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(InMemoryCache::new());
        let origin = Arc::new(StubOrigin::new());
        let repo = Arc::new(InMemoryMemeRepository::new());
        let resolver = ImageResolver::new(
            cache.clone(),
            origin.clone(),
            repo.clone(),
            Duration::from_secs(7 * 24 * 60 * 60),
        );
        Fixture { cache, origin, repo, resolver }
    }

    async fn store_meme(repo: &InMemoryMemeRepository, template: &str, text: &[&str]) -> Meme {
        repo.create(NewMeme {
            template: template.to_string(),
            lines: lines(text),
            url: format!("http://origin.test/images/{}/{}.png", template, text.join("/")),
            context: String::new(),
            link: String::new(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn second_resolve_is_served_from_cache() {
        let f = fixture();
        let text = lines(&["not sure if", "or just tired"]);

        let first = f.resolver.resolve("fry", &text).await.unwrap();
        assert_eq!(f.origin.renders.load(Ordering::SeqCst), 1);
        assert_eq!(
            f.cache.peek("meme:fry:not sure if:or just tired"),
            Some(StubOrigin::bytes_for("fry", &text))
        );

        let second = f.resolver.resolve("fry", &text).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.origin.renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn origin_not_found_is_not_cached() {
        let f = fixture();
        let text = lines(&["a"]);

        for _ in 0..2 {
            let err = f.resolver.resolve("missing", &text).await.unwrap_err();
            assert!(matches!(err, ServiceError::NotFound(_)));
        }
        assert_eq!(f.origin.renders.load(Ordering::SeqCst), 2);
        assert_eq!(f.cache.writes.load(Ordering::SeqCst), 0);
        assert!(f.cache.peek("meme:missing:a").is_none());
    }

    #[tokio::test]
    async fn transient_origin_failure_writes_nothing() {
        let f = fixture();
        let err = f.resolver.resolve("flaky", &lines(&["a", "b"])).await.unwrap_err();
        assert!(matches!(err, ServiceError::Transient(_)));
        assert_eq!(f.cache.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_outage_degrades_to_origin() {
        let f = fixture();
        f.cache.fail_reads(true);
        f.cache.fail_writes(true);

        let bytes = f.resolver.resolve("doge", &[]).await.unwrap();
        assert_eq!(bytes, StubOrigin::bytes_for("doge", &[]));
        assert_eq!(f.origin.renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn colon_inside_a_line_gets_its_own_entry() {
        let f = fixture();
        let two_lines = lines(&["a", "b"]);
        let one_line = lines(&["a:b"]);

        let first = f.resolver.resolve("fry", &two_lines).await.unwrap();
        let second = f.resolver.resolve("fry", &one_line).await.unwrap();
        assert_eq!(first, StubOrigin::bytes_for("fry", &two_lines));
        assert_eq!(second, StubOrigin::bytes_for("fry", &one_line));
        assert_eq!(f.origin.renders.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_line_list_uses_placeholder_key() {
        let f = fixture();
        f.resolver.resolve("doge", &[]).await.unwrap();
        assert!(f.cache.peek("meme:doge:_").is_some());
    }

    #[tokio::test]
    async fn unknown_meme_id_never_reaches_origin() {
        let f = fixture();
        let err = f.resolver.resolve_by_meme_id(99).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(f.origin.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolve_by_id_fills_only_the_id_region() {
        let f = fixture();
        let meme = store_meme(&f.repo, "fry", &["top", "bottom"]).await;

        let first = f.resolver.resolve_by_meme_id(meme.id).await.unwrap();
        let second = f.resolver.resolve_by_meme_id(meme.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.origin.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(f.cache.peek(&meme_id_key(meme.id)), Some(first));
        assert!(f.cache.peek(&image_key("fry", &meme.lines)).is_none());

        // The parameter region is still cold.
        f.resolver.resolve("fry", &meme.lines).await.unwrap();
        assert_eq!(f.origin.renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_clears_both_regions() {
        let f = fixture();
        let meme = store_meme(&f.repo, "fry", &["top", "bottom"]).await;
        f.resolver.resolve_by_meme_id(meme.id).await.unwrap();
        f.resolver.resolve("fry", &meme.lines).await.unwrap();

        f.resolver.invalidate(&meme).await;
        assert!(f.cache.peek(&meme_id_key(meme.id)).is_none());
        assert!(f.cache.peek(&image_key("fry", &meme.lines)).is_none());
    }

    #[tokio::test]
    async fn invalidate_survives_cache_failure() {
        let f = fixture();
        let meme = store_meme(&f.repo, "fry", &["top"]).await;
        f.resolver.resolve_by_meme_id(meme.id).await.unwrap();

        f.cache.fail_deletes(true);
        f.resolver.invalidate(&meme).await;
        assert!(f.cache.peek(&meme_id_key(meme.id)).is_some());
    }
}
