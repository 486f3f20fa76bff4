use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use crate::error::{AppError, Result};

pub const DEFAULT_WORDS_SOURCE_URL: &str =
    "https://raw.githubusercontent.com/dwyl/english-words/master/words.txt";

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding article caches, lock markers and cumulative state
    pub cache_root: PathBuf,
    /// Newline-delimited list of article URLs
    pub article_list_path: PathBuf,
    pub words_source_url: String,
    pub batch_size: usize,
    /// Soft deadline after which no new batch is started
    pub max_run_duration: Duration,
    pub rate_limit_backoff: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup, falling back to defaults
    /// for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let config = Config {
            cache_root: lookup("CACHE_ROOT").map(PathBuf::from).unwrap_or(defaults.cache_root),
            article_list_path: lookup("ARTICLE_LIST_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.article_list_path),
            words_source_url: lookup("WORDS_SOURCE_URL").unwrap_or(defaults.words_source_url),
            batch_size: parse_or(&lookup, "BATCH_SIZE", defaults.batch_size)?,
            max_run_duration: Duration::from_secs(parse_or(
                &lookup,
                "MAX_RUN_SECS",
                defaults.max_run_duration.as_secs(),
            )?),
            rate_limit_backoff: Duration::from_secs(parse_or(
                &lookup,
                "RATE_LIMIT_BACKOFF_SECS",
                defaults.rate_limit_backoff.as_secs(),
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(AppError::ConfigError("BATCH_SIZE must be at least 1".to_string()));
        }
        if self.words_source_url.trim().is_empty() {
            return Err(AppError::ConfigError("WORDS_SOURCE_URL must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_root: PathBuf::from("local_tmp"),
            article_list_path: PathBuf::from("endg-urls"),
            words_source_url: DEFAULT_WORDS_SOURCE_URL.to_string(),
            batch_size: 15,
            max_run_duration: Duration::from_secs(30),
            rate_limit_backoff: Duration::from_secs(10),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| AppError::ConfigError(format!("Invalid {}: {}", key, e))),
        None => Ok(default),
    }
}
