//! One active vote per (meme, voter), reconciled against the durable tally.
//!
//! Vote records live in the key-value cache (`vote:{meme_id}:{voter}`) with the
//! configured vote TTL; the tally lives in the durable store and only moves by
//! single +1/-1 adjustments. Requests for the same pair are serialized in this
//! process by a per-key mutex. Across processes the read-then-write remains
//! unguarded.

use crate::{
    cache::vote_key,
    domain::{KeyValueCache, MemeRepository},
    errors::ServiceError,
    models::{VoteDirection, VoteOutcome},
};
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct VoteLedger {
    cache: Arc<dyn KeyValueCache>,
    repo: Arc<dyn MemeRepository>,
    ttl: Duration,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl VoteLedger {
    pub fn new(cache: Arc<dyn KeyValueCache>, repo: Arc<dyn MemeRepository>, ttl: Duration) -> Self {
        Self {
            cache,
            repo,
            ttl,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Applies `direction` for `voter` on `meme_id` and returns the stored tally.
    ///
    /// Repeating the active direction is `AlreadyVoted` and leaves the tally alone.
    /// Changing direction reverses the prior vote, then applies the new one.
    pub async fn apply_vote(
        &self,
        meme_id: u64,
        voter: &str,
        direction: VoteDirection,
    ) -> Result<VoteOutcome, ServiceError> {
        if voter.trim().is_empty() {
            return Err(ServiceError::InvalidInput("voter identity is empty".into()));
        }
        let key = vote_key(meme_id, voter);

        // Detached so a dropped request cannot stop between the reversal and the new vote.
        let ledger = self.clone();
        tokio::spawn(async move {
            let lock = ledger
                .locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let outcome = {
                let _guard = lock.lock().await;
                ledger.apply_locked(&key, meme_id, direction).await
            };
            drop(lock);
            ledger.locks.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
            outcome
        })
        .await
        .map_err(|e| {
            tracing::error!(meme_id, %direction, error = %e, "Vote task did not complete");
            ServiceError::Fatal(format!("vote task failed: {}", e))
        })?
    }

    async fn apply_locked(
        &self,
        key: &str,
        meme_id: u64,
        direction: VoteDirection,
    ) -> Result<VoteOutcome, ServiceError> {
        match self.active_vote(key).await? {
            Some(prior) if prior == direction => {
                let tally = self
                    .repo
                    .get_by_id(meme_id)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("Meme {}", meme_id)))?
                    .votes;
                tracing::info!(meme_id, vote_key = %key, %direction, tally, "Duplicate vote rejected");
                Ok(VoteOutcome::AlreadyVoted { tally })
            }
            Some(prior) => {
                // Two separate adjustments, so a failure in between is visible in the tally.
                self.repo.adjust_votes(meme_id, -prior.delta()).await?;
                let tally = match self.repo.adjust_votes(meme_id, direction.delta()).await {
                    Ok(tally) => tally,
                    Err(e) => {
                        tracing::error!(
                            meme_id,
                            vote_key = %key,
                            %prior,
                            error = %e,
                            "Vote reversed but new vote not applied, clearing vote record"
                        );
                        // The tally no longer holds any vote from this voter.
                        if let Err(ce) = self.cache.delete(key).await {
                            tracing::warn!(vote_key = %key, error = %ce, "Failed to clear vote record");
                        }
                        return Err(e.into());
                    }
                };
                self.record(key, direction).await;
                tracing::info!(meme_id, vote_key = %key, %prior, %direction, tally, "Vote changed");
                Ok(VoteOutcome::Changed { tally })
            }
            None => {
                let tally = self.repo.adjust_votes(meme_id, direction.delta()).await?;
                self.record(key, direction).await;
                tracing::info!(meme_id, vote_key = %key, %direction, tally, "Vote recorded");
                Ok(VoteOutcome::Recorded { tally })
            }
        }
    }

    async fn active_vote(&self, key: &str) -> Result<Option<VoteDirection>, ServiceError> {
        let raw = match self.cache.get(key).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let parsed = std::str::from_utf8(&raw)
            .map_err(|e| e.to_string())
            .and_then(str::parse::<VoteDirection>);
        match parsed {
            Ok(direction) => Ok(Some(direction)),
            // Guessing "no prior vote" could count this voter twice.
            Err(e) => {
                tracing::warn!(vote_key = %key, error = %e, "Unreadable vote record");
                Err(ServiceError::Transient(format!("vote record '{}' is unreadable", key)))
            }
        }
    }

    /// The tally adjustment already stands, so a failed write is only logged.
    /// The voter's next vote will count as fresh.
    async fn record(&self, key: &str, direction: VoteDirection) {
        if let Err(e) = self.cache.set(key, direction.as_str().as_bytes(), self.ttl).await {
            tracing::warn!(vote_key = %key, %direction, error = %e, "Failed to persist vote record");
        }
    }
}
