use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::aggregator::{RunAggregator, RunSummary};
use crate::article::ArticleProcessor;
use crate::cache::ArticleCache;
use crate::config::Config;
use crate::error::Result;
use crate::fetcher::{ContentFetcher, RateLimiter, Transport};
use crate::scheduler::BatchScheduler;
use crate::storage::{self, StorageLayout};
use crate::words::ValidWords;

/// Runs one resumable pass over the article list and returns its summary.
pub async fn run(config: &Config, transport: Arc<dyn Transport>) -> Result<RunSummary> {
    let started = Instant::now();
    let layout = StorageLayout::new(&config.cache_root);

    // snapshot lock markers before this run creates any
    let cache = Arc::new(ArticleCache::open(layout.clone()).await?);
    let aggregator = RunAggregator::open(layout.clone()).await?;

    let valid_words = ValidWords::new(
        layout.valid_words_path(),
        config.words_source_url.clone(),
        transport.clone(),
    )
    .get()
    .await?;
    info!("Got {} valid words", valid_words.len());

    let state = aggregator.load_state().await?;
    cache.sweep_stale(state.processed_urls()).await?;

    let candidates = storage::read_lines(&config.article_list_path).await?;
    info!("Total Articles: {}", candidates.len());

    let pending = aggregator.pending_urls(&candidates, &state);
    info!("Articles to process: {}", pending.len());

    let limiter = Arc::new(RateLimiter::new(config.rate_limit_backoff));
    let fetcher = Arc::new(ContentFetcher::new(transport, limiter));
    let processor = ArticleProcessor::new(fetcher, cache, valid_words);

    let report = BatchScheduler::new(config.batch_size, config.max_run_duration)
        .run(&pending, &processor)
        .await?;

    let summary = aggregator.finalize(&candidates, &report).await?;
    if summary.is_processing_only() {
        warn!("Cumulative counts were not updated; the next run folds in this run's articles");
    }
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Run finished");
    Ok(summary)
}
