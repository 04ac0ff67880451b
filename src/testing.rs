//! In-memory stand-ins for the cache, durable store and origin, with call counters and failure switches.

use crate::{
    domain::{ImageOrigin, KeyValueCache, MemeRepository},
    errors::{CacheError, OriginError, RepoError},
    models::{Comment, Meme, NewMeme, TemplateCatalogEntry},
};
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};
use tokio::time::Instant;

// --- Cache ---

#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    pub writes: AtomicUsize,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Live (unexpired) value, bypassing failure switches.
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone())
    }

    pub fn seed(&self, key: &str, value: &[u8], ttl: Duration) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
    }
}

#[async_trait]
impl KeyValueCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("injected read failure".into()));
        }
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Timeout(Duration::from_millis(1)));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.seed(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("injected delete failure".into()));
        }
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

// --- Durable store ---

#[derive(Default)]
struct RepoState {
    last_id: u64,
    memes: BTreeMap<u64, Meme>,
    comments: Vec<Comment>,
}

#[derive(Default)]
pub struct InMemoryMemeRepository {
    state: Mutex<RepoState>,
    /// Adjustments still allowed to succeed before every further one fails.
    adjustment_budget: Mutex<Option<usize>>,
    adjustment_delay: Mutex<Option<Duration>>,
    pub adjustments: AtomicUsize,
}

impl InMemoryMemeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_adjustments_after(&self, successes: usize) {
        *self.adjustment_budget.lock().unwrap() = Some(successes);
    }

    /// Every later adjustment sleeps this long before it is applied.
    pub fn delay_adjustments(&self, delay: Duration) {
        *self.adjustment_delay.lock().unwrap() = Some(delay);
    }

    pub fn tally(&self, id: u64) -> Option<i64> {
        self.state.lock().unwrap().memes.get(&id).map(|m| m.votes)
    }

    pub fn comment_count(&self) -> usize {
        self.state.lock().unwrap().comments.len()
    }
}

#[async_trait]
impl MemeRepository for InMemoryMemeRepository {
    async fn create(&self, meme: NewMeme) -> Result<Meme, RepoError> {
        let mut state = self.state.lock().unwrap();
        state.last_id += 1;
        let meme = Meme {
            id: state.last_id,
            template: meme.template,
            lines: meme.lines,
            url: meme.url,
            context: meme.context,
            link: meme.link,
            votes: 0,
        };
        state.memes.insert(meme.id, meme.clone());
        Ok(meme)
    }

    async fn get_by_id(&self, id: u64) -> Result<Option<Meme>, RepoError> {
        Ok(self.state.lock().unwrap().memes.get(&id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Meme>, RepoError> {
        let mut memes: Vec<Meme> = self.state.lock().unwrap().memes.values().cloned().collect();
        memes.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.id.cmp(&b.id)));
        Ok(memes)
    }

    async fn adjust_votes(&self, id: u64, delta: i64) -> Result<i64, RepoError> {
        {
            let mut budget = self.adjustment_budget.lock().unwrap();
            match budget.as_mut() {
                Some(0) => {
                    return Err(RepoError::BackendError(anyhow::anyhow!("injected write failure")));
                }
                Some(remaining) => *remaining -= 1,
                None => {}
            }
        }
        let delay = *self.adjustment_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        let meme = state.memes.get_mut(&id).ok_or(RepoError::NotFound(id))?;
        meme.votes += delta;
        self.adjustments.fetch_add(1, Ordering::SeqCst);
        Ok(meme.votes)
    }

    async fn delete(&self, id: u64) -> Result<Meme, RepoError> {
        let mut state = self.state.lock().unwrap();
        let meme = state.memes.remove(&id).ok_or(RepoError::NotFound(id))?;
        state.comments.retain(|c| c.meme_id != id);
        Ok(meme)
    }

    async fn add_comment(&self, comment: &Comment) -> Result<(), RepoError> {
        let mut state = self.state.lock().unwrap();
        if !state.memes.contains_key(&comment.meme_id) {
            return Err(RepoError::NotFound(comment.meme_id));
        }
        state.comments.push(comment.clone());
        Ok(())
    }

    async fn list_comments(&self, meme_id: u64) -> Result<Vec<Comment>, RepoError> {
        let state = self.state.lock().unwrap();
        let mut comments: Vec<Comment> =
            state.comments.iter().filter(|c| c.meme_id == meme_id).cloned().collect();
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }
}

// --- Origin ---

/// Renders `png:{template}:{line|line}`. Template `missing` is a 404 and `flaky` is unavailable.
#[derive(Default)]
pub struct StubOrigin {
    templates: Mutex<Vec<TemplateCatalogEntry>>,
    fail_templates: AtomicBool,
    pub renders: AtomicUsize,
    pub fetches: AtomicUsize,
    pub template_calls: AtomicUsize,
}

impl StubOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: Vec<TemplateCatalogEntry>) -> Self {
        let origin = Self::default();
        *origin.templates.lock().unwrap() = templates;
        origin
    }

    pub fn fail_templates(&self, fail: bool) {
        self.fail_templates.store(fail, Ordering::SeqCst);
    }

    pub fn bytes_for(template: &str, lines: &[String]) -> Vec<u8> {
        format!("png:{}:{}", template, lines.join("|")).into_bytes()
    }
}

fn failure_for(template: &str, url: &str) -> Option<OriginError> {
    match template {
        "missing" => Some(OriginError::NotFound(url.to_string())),
        "flaky" => Some(OriginError::Unavailable(format!("{} returned 503", url))),
        _ => None,
    }
}

#[async_trait]
impl ImageOrigin for StubOrigin {
    fn image_url(&self, template: &str, lines: &[String]) -> String {
        format!("http://origin.test/images/{}/{}.png", template, lines.join("/"))
    }

    async fn render(&self, template: &str, lines: &[String]) -> Result<Vec<u8>, OriginError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        match failure_for(template, &self.image_url(template, lines)) {
            Some(err) => Err(err),
            None => Ok(Self::bytes_for(template, lines)),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, OriginError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let template = url
            .strip_prefix("http://origin.test/images/")
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default();
        match failure_for(template, url) {
            Some(err) => Err(err),
            None => Ok(format!("png:{}", url).into_bytes()),
        }
    }

    async fn templates(&self) -> Result<Vec<TemplateCatalogEntry>, OriginError> {
        self.template_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_templates.load(Ordering::SeqCst) {
            return Err(OriginError::Unavailable("templates returned 503".into()));
        }
        Ok(self.templates.lock().unwrap().clone())
    }
}

pub fn template(id: &str, name: &str) -> TemplateCatalogEntry {
    TemplateCatalogEntry {
        id: id.to_string(),
        name: name.to_string(),
        lines: 2,
        blank: format!("http://origin.test/images/{}.png", id),
        example: None,
    }
}

pub fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
