use crate::{
    cache::CATALOG_KEY,
    domain::{ImageOrigin, KeyValueCache},
    errors::ServiceError,
    models::TemplateCatalogEntry,
};
use std::{sync::Arc, time::Duration};

/// Cache-aside view of the origin's template listing.
///
/// There is no invalidation path: a cached catalog lives until its TTL runs out.
#[derive(Clone)]
pub struct TemplateCatalog {
    cache: Arc<dyn KeyValueCache>,
    origin: Arc<dyn ImageOrigin>,
    ttl: Duration,
}

impl TemplateCatalog {
    pub fn new(cache: Arc<dyn KeyValueCache>, origin: Arc<dyn ImageOrigin>, ttl: Duration) -> Self {
        Self { cache, origin, ttl }
    }

    pub async fn get_templates(&self) -> Result<Vec<TemplateCatalogEntry>, ServiceError> {
        if let Some(templates) = self.cached().await {
            return Ok(templates);
        }

        let templates = self.origin.templates().await?;
        tracing::info!(count = templates.len(), "Fetched template catalog from origin");

        match serde_json::to_vec(&templates) {
            Ok(encoded) => {
                if let Err(e) = self.cache.set(CATALOG_KEY, &encoded, self.ttl).await {
                    tracing::warn!(error = %e, "Failed to cache template catalog");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode template catalog"),
        }
        Ok(templates)
    }

    /// A usable cached catalog. Read failures, undecodable and empty lists all count as misses.
    async fn cached(&self) -> Option<Vec<TemplateCatalogEntry>> {
        let raw = match self.cache.get(CATALOG_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!("Template catalog cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Template catalog cache read failed");
                return None;
            }
        };

        match serde_json::from_slice::<Vec<TemplateCatalogEntry>>(&raw) {
            Ok(templates) if !templates.is_empty() => {
                tracing::debug!(count = templates.len(), "Template catalog cache hit");
                Some(templates)
            }
            Ok(_) => {
                tracing::debug!("Cached template catalog is empty, refetching");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cached template catalog is undecodable, refetching");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{template, InMemoryCache, StubOrigin};
    use std::sync::atomic::Ordering;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn catalog(cache: &Arc<InMemoryCache>, origin: &Arc<StubOrigin>) -> TemplateCatalog {
        TemplateCatalog::new(cache.clone(), origin.clone(), DAY)
    }

    #[tokio::test]
    async fn second_call_within_ttl_skips_origin() {
        let cache = Arc::new(InMemoryCache::new());
        let origin = Arc::new(StubOrigin::with_templates(vec![
            template("fry", "Futurama Fry"),
            template("doge", "Doge"),
            template("ants", "Do You Want Ants?"),
        ]));
        let catalog = catalog(&cache, &origin);

        let first = catalog.get_templates().await.unwrap();
        assert_eq!(origin.template_calls.load(Ordering::SeqCst), 1);

        let second = catalog.get_templates().await.unwrap();
        assert_eq!(origin.template_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        let ids: Vec<&str> = second.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["fry", "doge", "ants"]);
    }

    #[tokio::test(start_paused = true)]
    async fn refetches_after_ttl() {
        let cache = Arc::new(InMemoryCache::new());
        let origin = Arc::new(StubOrigin::with_templates(vec![template("fry", "Futurama Fry")]));
        let catalog = catalog(&cache, &origin);

        catalog.get_templates().await.unwrap();
        tokio::time::advance(DAY + Duration::from_secs(1)).await;
        catalog.get_templates().await.unwrap();
        assert_eq!(origin.template_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_cached_list_is_a_miss() {
        let cache = Arc::new(InMemoryCache::new());
        cache.seed(CATALOG_KEY, b"[]", DAY);
        let origin = Arc::new(StubOrigin::with_templates(vec![template("fry", "Futurama Fry")]));

        let templates = catalog(&cache, &origin).get_templates().await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(origin.template_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn garbage_in_cache_is_a_miss() {
        let cache = Arc::new(InMemoryCache::new());
        cache.seed(CATALOG_KEY, b"{not json", DAY);
        let origin = Arc::new(StubOrigin::with_templates(vec![template("fry", "Futurama Fry")]));

        catalog(&cache, &origin).get_templates().await.unwrap();
        let stored: Vec<TemplateCatalogEntry> =
            serde_json::from_slice(&cache.peek(CATALOG_KEY).unwrap()).unwrap();
        assert_eq!(stored[0].id, "fry");
    }

    #[tokio::test]
    async fn origin_failure_propagates_without_fallback() {
        let cache = Arc::new(InMemoryCache::new());
        let origin = Arc::new(StubOrigin::with_templates(vec![template("fry", "Futurama Fry")]));
        origin.fail_templates(true);

        let err = catalog(&cache, &origin).get_templates().await.unwrap_err();
        assert!(matches!(err, ServiceError::Transient(_)));
        assert!(cache.peek(CATALOG_KEY).is_none());
    }
}
