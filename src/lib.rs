pub mod aggregator;
pub mod article;
pub mod cache;
pub mod config;
pub mod counts;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod runner;
pub mod scheduler;
pub mod storage;
pub mod words;

pub use aggregator::{CumulativeState, RunAggregator, RunSummary};
pub use article::{ArticleOutcome, ArticleProcessor, ArticleRecord};
pub use config::Config;
pub use counts::WordCounts;
pub use error::{AppError, Result};
pub use fetcher::{ContentFetcher, RateLimiter, ReqwestTransport, Transport};
