//! Time-boxed batch scheduling of article processing.

use futures::future::join_all;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::article::{ArticleOutcome, ArticleProcessor, ArticleRecord};
use crate::error::{AppError, Result};

/// Outcomes collected over a whole run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: Vec<ArticleRecord>,
    pub failed: Vec<String>,
    /// Held by a concurrent task when reached.
    pub skipped: Vec<String>,
    /// Never dispatched because the time budget ran out.
    pub unscheduled: Vec<String>,
}

impl BatchReport {
    fn record(&mut self, outcome: ArticleOutcome) {
        match outcome {
            ArticleOutcome::Processed(record) => self.processed.push(record),
            ArticleOutcome::Failed { url, .. } => self.failed.push(url),
            ArticleOutcome::Skipped { url } => self.skipped.push(url),
        }
    }
}

pub struct BatchScheduler {
    batch_size: usize,
    max_duration: Duration,
}

impl BatchScheduler {
    pub fn new(batch_size: usize, max_duration: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_duration,
        }
    }

    /// Processes `urls` batch by batch. Articles within a batch run
    /// concurrently; the next batch starts only after the previous one has
    /// drained and only while the run is within its time budget.
    pub async fn run(&self, urls: &[String], processor: &ArticleProcessor) -> Result<BatchReport> {
        let started = Instant::now();
        let mut report = BatchReport::default();
        let mut storage_error: Option<AppError> = None;

        for (batch_idx, batch) in urls.chunks(self.batch_size).enumerate() {
            let elapsed = started.elapsed();
            if elapsed > self.max_duration {
                error!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    max_secs = self.max_duration.as_secs_f64(),
                    "Reached max processing time; leaving remaining articles for the next run"
                );
                let done = batch_idx * self.batch_size;
                report.unscheduled.extend(urls[done..].iter().cloned());
                break;
            }

            debug!(batch = batch_idx + 1, size = batch.len(), "Batch processing started");
            let batch_started = Instant::now();

            let labels: Vec<String> = (0..batch.len())
                .map(|sub_idx| format!("ARTICLE_{}_{}", batch_idx + 1, sub_idx + 1))
                .collect();
            let results = join_all(
                batch
                    .iter()
                    .zip(&labels)
                    .map(|(url, label)| processor.process(url, label)),
            )
            .await;

            for result in results {
                match result {
                    Ok(outcome) => report.record(outcome),
                    Err(e) => {
                        error!("Storage failure while processing batch: {}", e);
                        storage_error.get_or_insert(e);
                    }
                }
            }

            debug!(
                batch = batch_idx + 1,
                elapsed_ms = batch_started.elapsed().as_millis() as u64,
                "Batch processing ended"
            );

            if let Some(e) = storage_error.take() {
                return Err(e);
            }
        }

        info!(
            processed = report.processed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            unscheduled = report.unscheduled.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Article processing finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ArticleCache, ArticleKey};
    use crate::fetcher::{ContentFetcher, FetchError, HttpResponse, RateLimiter, Transport};
    use crate::storage::StorageLayout;
    use crate::words::ValidWordSet;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Every page takes `delay` and contains "fox", except URLs containing
    /// "broken".
    struct SlowPages {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for SlowPages {
        async fn get(&self, url: &str) -> std::result::Result<HttpResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if url.contains("broken") {
                return Ok(HttpResponse { status: 500, body: String::new() });
            }
            Ok(HttpResponse {
                status: 200,
                body: format!("<p>fox {}</p>", url),
            })
        }
    }

    impl SlowPages {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    async fn processor(root: &std::path::Path, transport: Arc<SlowPages>) -> ArticleProcessor {
        let fetcher = ContentFetcher::new(transport, Arc::new(RateLimiter::new(Duration::ZERO)));
        let cache = ArticleCache::open(StorageLayout::new(root)).await.unwrap();
        let valid: ValidWordSet = ["fox"].into_iter().collect();
        ArticleProcessor::new(Arc::new(fetcher), Arc::new(cache), Arc::new(valid))
    }

    fn urls(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| format!("https://news.test/{}", n)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_batches_run_within_budget() {
        let dir = TempDir::new().unwrap();
        let transport = SlowPages::new(Duration::from_secs(1));
        let processor = processor(dir.path(), transport.clone()).await;
        let scheduler = BatchScheduler::new(2, Duration::from_secs(60));

        let report = scheduler
            .run(&urls(&["a", "b", "broken", "c", "d"]), &processor)
            .await
            .unwrap();

        assert_eq!(report.processed.len(), 4);
        assert_eq!(report.failed, urls(&["broken"]));
        assert!(report.skipped.is_empty());
        assert!(report.unscheduled.is_empty());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_articles_within_a_batch_run_concurrently() {
        let dir = TempDir::new().unwrap();
        let transport = SlowPages::new(Duration::from_secs(5));
        let processor = processor(dir.path(), transport).await;
        let scheduler = BatchScheduler::new(3, Duration::from_secs(60));

        let started = Instant::now();
        scheduler.run(&urls(&["a", "b", "c"]), &processor).await.unwrap();

        // three 5s fetches in one batch overlap
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_stops_new_batches() {
        let dir = TempDir::new().unwrap();
        let transport = SlowPages::new(Duration::from_secs(20));
        let processor = processor(dir.path(), transport.clone()).await;
        let scheduler = BatchScheduler::new(1, Duration::from_secs(30));

        let report = scheduler
            .run(&urls(&["a", "b", "c", "d"]), &processor)
            .await
            .unwrap();

        // batches start at 0s and 20s; at 40s the budget is spent
        assert_eq!(report.processed.len(), 2);
        assert!(report.failed.is_empty());
        assert_eq!(report.unscheduled, urls(&["c", "d"]));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_list() {
        let dir = TempDir::new().unwrap();
        let transport = SlowPages::new(Duration::ZERO);
        let processor = processor(dir.path(), transport).await;

        let report = BatchScheduler::new(4, Duration::from_secs(1))
            .run(&[], &processor)
            .await
            .unwrap();
        assert!(report.processed.is_empty());
        assert!(report.unscheduled.is_empty());
    }

    #[tokio::test]
    async fn test_storage_error_drains_batch_then_aborts() {
        let dir = TempDir::new().unwrap();
        let transport = SlowPages::new(Duration::ZERO);
        let processor = processor(dir.path(), transport.clone()).await;
        let layout = StorageLayout::new(dir.path());
        let list = urls(&["a", "b", "c", "d"]);

        // "b" cannot be cached: its temp file path is taken by a directory
        let mut blocker = layout
            .article_path(&ArticleKey::from_url(&list[1]).url_hash)
            .into_os_string();
        blocker.push(".tmp");
        std::fs::create_dir_all(std::path::PathBuf::from(blocker).join("occupied")).unwrap();

        let result = BatchScheduler::new(3, Duration::from_secs(60))
            .run(&list, &processor)
            .await;

        assert!(result.is_err());
        // the rest of the first batch completed; the second batch never started
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        for url in [&list[0], &list[2]] {
            let entry = layout.article_path(&ArticleKey::from_url(url).url_hash);
            assert!(entry.exists(), "{} should be cached", url);
        }
        let markers: Vec<_> = std::fs::read_dir(layout.articles_dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| crate::storage::is_lock_path(p))
            .collect();
        assert!(markers.is_empty(), "leftover markers: {:?}", markers);
    }
}
