//! Per-URL pipeline: lock, cache lookup, fetch, count, persist, unlock.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{ArticleCache, ArticleKey};
use crate::counts::WordCounts;
use crate::error::Result;
use crate::extract::page_tokens;
use crate::fetcher::ContentFetcher;
use crate::words::{ValidWordSet, count_words};

/// Where a processed article's counts came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountSource {
    Cache,
    Fetched,
}

#[derive(Debug, Clone)]
pub struct ArticleRecord {
    pub url: String,
    pub url_hash: String,
    pub frequency_map: WordCounts,
    /// Always true for records that reach aggregation; kept so a record
    /// carries its full processing state.
    pub processed: bool,
    pub source: CountSource,
}

#[derive(Debug, Clone)]
pub enum ArticleOutcome {
    Processed(ArticleRecord),
    Failed { url: String, reason: String },
    /// Another task holds the article's lock; it stays a candidate for a
    /// later run.
    Skipped { url: String },
}

pub struct ArticleProcessor {
    fetcher: Arc<ContentFetcher>,
    cache: Arc<ArticleCache>,
    valid_words: Arc<ValidWordSet>,
}

impl ArticleProcessor {
    pub fn new(
        fetcher: Arc<ContentFetcher>,
        cache: Arc<ArticleCache>,
        valid_words: Arc<ValidWordSet>,
    ) -> Self {
        Self {
            fetcher,
            cache,
            valid_words,
        }
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &Arc<ArticleCache> {
        &self.cache
    }

    /// Runs the pipeline for one URL. Only storage errors are returned as
    /// `Err`; everything else is an outcome.
    pub async fn process(&self, url: &str, label: &str) -> Result<ArticleOutcome> {
        let key = ArticleKey::from_url(url);
        debug!(label, url_hash = %key.url_hash, "Article processing started");

        let Some(lock) = self.cache.try_lock(&key).await? else {
            warn!(
                label,
                url_hash = %key.url_hash,
                "Article processing SKIPPED because of concurrent lock"
            );
            return Ok(ArticleOutcome::Skipped { url: key.url });
        };

        let outcome = self.process_locked(&key, lock.was_stale()).await;
        // Drop covers panics and cancelled futures
        lock.release().await?;
        let outcome = outcome?;

        match &outcome {
            ArticleOutcome::Processed(record) => debug!(
                label,
                url_hash = %key.url_hash,
                words = record.frequency_map.len(),
                source = ?record.source,
                "Article processing ended"
            ),
            ArticleOutcome::Failed { reason, .. } => {
                warn!(label, url_hash = %key.url_hash, "Article processing failed: {}", reason)
            }
            ArticleOutcome::Skipped { .. } => {}
        }
        Ok(outcome)
    }

    async fn process_locked(&self, key: &ArticleKey, stale_lock: bool) -> Result<ArticleOutcome> {
        if stale_lock {
            info!(url_hash = %key.url_hash, "Lock predates this run; reprocessing");
        } else if let Some(frequency_map) = self.cache.read(key).await? {
            return Ok(ArticleOutcome::Processed(ArticleRecord {
                url: key.url.clone(),
                url_hash: key.url_hash.clone(),
                frequency_map,
                processed: true,
                source: CountSource::Cache,
            }));
        }

        let html = match self.fetcher.fetch(&key.url).await {
            Ok(html) => html,
            Err(e) => {
                return Ok(ArticleOutcome::Failed {
                    url: key.url.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let frequency_map = count_words(page_tokens(&html), &self.valid_words);
        if frequency_map.is_empty() {
            return Ok(ArticleOutcome::Failed {
                url: key.url.clone(),
                reason: "no valid words found".to_string(),
            });
        }

        self.cache.write(key, &frequency_map).await?;

        Ok(ArticleOutcome::Processed(ArticleRecord {
            url: key.url.clone(),
            url_hash: key.url_hash.clone(),
            frequency_map,
            processed: true,
            source: CountSource::Fetched,
        }))
    }
}
