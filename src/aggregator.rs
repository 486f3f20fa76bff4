//! Cross-run cumulative state: loading, filtering candidates, and folding a
//! run's results back in.

use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::counts::WordCounts;
use crate::error::Result;
use crate::scheduler::BatchReport;
use crate::storage::{self, LockMarker, StorageLayout};

const TOP_WORDS: usize = 10;

const COMPLETE_MESSAGE: &str = "Run the script again to get remaining articles processed";
const PROCESSING_ONLY_MESSAGE: &str = "The script completed in processing only mode. \
     Articles read here ain't completely counted.";

/// Everything earlier runs have folded in.
#[derive(Debug, Clone, Default)]
pub struct CumulativeState {
    processed_urls: Vec<String>,
    seen: HashSet<String>,
    pub word_counts: WordCounts,
}

impl CumulativeState {
    pub fn from_parts(processed_urls: Vec<String>, word_counts: WordCounts) -> Self {
        let mut state = CumulativeState {
            word_counts,
            ..Default::default()
        };
        for url in processed_urls {
            state.mark_processed(url);
        }
        state
    }

    pub fn processed_urls(&self) -> &[String] {
        &self.processed_urls
    }

    pub fn is_processed(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    /// Returns false when the URL was already recorded.
    pub fn mark_processed(&mut self, url: String) -> bool {
        if !self.seen.insert(url.clone()) {
            return false;
        }
        self.processed_urls.push(url);
        true
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub total_article_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_processed_articles: Option<usize>,
    pub processed_articles: usize,
    pub failed_to_process: usize,
    pub skipped_articles_to_be_processed: usize,
    pub most_common_words: Option<WordCounts>,
    pub message: String,
}

impl RunSummary {
    /// True when cumulative state was not updated by this run.
    pub fn is_processing_only(&self) -> bool {
        self.total_processed_articles.is_none()
    }
}

pub struct RunAggregator {
    layout: StorageLayout,
    /// The cumulative lock marker was already on disk when the run started.
    stale_lock: AtomicBool,
}

impl RunAggregator {
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            layout,
            stale_lock: AtomicBool::new(false),
        }
    }

    /// Like [`RunAggregator::new`], but records a cumulative lock marker that
    /// already exists as left behind by a crashed run. `finalize` takes such
    /// a marker over instead of treating it as a live holder.
    pub async fn open(layout: StorageLayout) -> Result<Self> {
        let stale = storage::lock_exists(&layout.word_counts_path()).await?;
        if stale {
            warn!("Found cumulative lock left by an earlier run");
        }
        Ok(Self {
            layout,
            stale_lock: AtomicBool::new(stale),
        })
    }

    /// Loads cumulative state; missing files are empty state.
    pub async fn load_state(&self) -> Result<CumulativeState> {
        let processed_urls = storage::read_lines(&self.layout.processed_urls_path()).await?;
        debug!(count = processed_urls.len(), "Fetched previously processed urls");

        let word_counts = match fs::read(self.layout.word_counts_path()).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No previous processed count found");
                WordCounts::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(CumulativeState::from_parts(processed_urls, word_counts))
    }

    /// Drops duplicates and already-processed URLs, then shuffles so that
    /// parallel instances are less likely to pick the same article.
    pub fn pending_urls(&self, candidates: &[String], state: &CumulativeState) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut pending: Vec<String> = candidates
            .iter()
            .filter(|url| !state.is_processed(url))
            .filter(|url| seen.insert(*url))
            .cloned()
            .collect();
        pending.shuffle(&mut rand::thread_rng());
        pending
    }

    /// Folds `report` into cumulative state under the cumulative lock and
    /// returns the run summary. If another instance holds the lock, nothing
    /// is persisted and a processing-only summary is returned.
    pub async fn finalize(
        &self,
        candidates: &[String],
        report: &BatchReport,
    ) -> Result<RunSummary> {
        let candidates = unique(candidates);
        let counts_path = self.layout.word_counts_path();

        let lock = if self.stale_lock.swap(false, Ordering::Relaxed) {
            info!("Taking over stale count lock");
            Some(LockMarker::adopt(&counts_path).await?)
        } else {
            LockMarker::try_acquire(&counts_path).await?
        };
        let Some(lock) = lock else {
            warn!("Found lock for count processing. Running in processing only mode");
            return Ok(self.processing_only_summary(&candidates, report));
        };

        // another instance may have folded in results while this one ran
        let mut state = self.load_state().await?;
        let previously_processed = state.processed_urls().len();

        for record in &report.processed {
            if state.mark_processed(record.url.clone()) {
                state.word_counts.merge(&record.frequency_map);
            } else {
                warn!(url_hash = %record.url_hash, "Article already counted by another run");
            }
        }

        if !state.word_counts.is_empty() {
            storage::write_atomic(&counts_path, &serde_json::to_vec(&state.word_counts)?).await?;
        }
        if !state.processed_urls().is_empty() {
            storage::write_lines(&self.layout.processed_urls_path(), state.processed_urls()).await?;
        }

        for record in &report.processed {
            storage::remove_if_exists(&self.layout.article_path(&record.url_hash)).await?;
        }

        info!("Removing count lock file");
        lock.release().await?;

        info!(
            newly_processed = state.processed_urls().len() - previously_processed,
            total_processed = state.processed_urls().len(),
            "Cumulative state updated"
        );

        let failed: HashSet<&str> = report.failed.iter().map(String::as_str).collect();
        let remaining = candidates
            .iter()
            .filter(|url| !state.is_processed(url) && !failed.contains(url.as_str()))
            .count();

        Ok(RunSummary {
            total_article_count: candidates.len(),
            total_processed_articles: Some(state.processed_urls().len()),
            processed_articles: report.processed.len(),
            failed_to_process: report.failed.len(),
            skipped_articles_to_be_processed: remaining,
            most_common_words: top_words(&state.word_counts),
            message: COMPLETE_MESSAGE.to_string(),
        })
    }

    fn processing_only_summary(&self, candidates: &[String], report: &BatchReport) -> RunSummary {
        let mut run_counts = WordCounts::new();
        for record in &report.processed {
            run_counts.merge(&record.frequency_map);
        }

        let pending = report.skipped.len() + report.unscheduled.len();

        RunSummary {
            total_article_count: candidates.len(),
            total_processed_articles: None,
            processed_articles: report.processed.len(),
            failed_to_process: report.failed.len(),
            skipped_articles_to_be_processed: pending,
            most_common_words: top_words(&run_counts),
            message: PROCESSING_ONLY_MESSAGE.to_string(),
        }
    }
}

fn unique(urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.iter().filter(|url| seen.insert(*url)).cloned().collect()
}

fn top_words(counts: &WordCounts) -> Option<WordCounts> {
    if counts.is_empty() {
        None
    } else {
        Some(counts.most_common(TOP_WORDS))
    }
}
