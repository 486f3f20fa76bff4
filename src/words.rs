//! Valid-word dictionary and frequency counting.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::counts::WordCounts;
use crate::error::{AppError, Result};
use crate::fetcher::Transport;
use crate::storage;

/// Characters stripped from both ends of a token before lookup.
const TRIM_CHARS: &[char] = &['"', ',', '+', '.', '\'', '_', '!', '@', '#', '$', '?', '^', '-'];

const MIN_WORD_LEN: usize = 3;

/// Immutable set of accepted lowercase words.
#[derive(Debug, Clone, Default)]
pub struct ValidWordSet {
    words: HashSet<String>,
}

impl ValidWordSet {
    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Builds the set from raw dictionary lines, keeping only alphabetic
    /// entries of at least three characters.
    pub fn from_lines<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let words = lines.into_iter().filter_map(normalize_dictionary_word).collect();
        Self { words }
    }
}

impl<S: AsRef<str>> FromIterator<S> for ValidWordSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            words: iter.into_iter().map(|w| w.as_ref().to_lowercase()).collect(),
        }
    }
}

fn normalize_dictionary_word(raw: &str) -> Option<String> {
    let word = raw.trim();
    if word.chars().count() < MIN_WORD_LEN || !word.chars().all(char::is_alphabetic) {
        return None;
    }
    Some(word.to_lowercase())
}

/// Strips boundary punctuation and lowercases a raw token.
pub fn clean_token(token: &str) -> String {
    token.trim_matches(TRIM_CHARS).to_lowercase()
}

/// Counts the tokens that are valid words after cleaning.
pub fn count_words<I, S>(tokens: I, valid: &ValidWordSet) -> WordCounts
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counts = WordCounts::new();
    for token in tokens {
        let word = clean_token(token.as_ref());
        // a word already counted is known to be valid
        if counts.contains(&word) || valid.contains(&word) {
            counts.add(&word, 1);
        }
    }
    counts
}

/// Process-scoped dictionary loader: memory, then the local file, then the
/// remote list. Populated once and never mutated afterward.
pub struct ValidWords {
    local_path: PathBuf,
    source_url: String,
    transport: Arc<dyn Transport>,
    cell: OnceCell<Arc<ValidWordSet>>,
}

impl ValidWords {
    pub fn new(local_path: PathBuf, source_url: String, transport: Arc<dyn Transport>) -> Self {
        Self {
            local_path,
            source_url,
            transport,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Arc<ValidWordSet>> {
        self.cell
            .get_or_try_init(|| async {
                debug!("Valid words not in memory. Loading");
                let started = std::time::Instant::now();
                let words = match self.read_local().await? {
                    Some(words) => words,
                    None => self.read_remote().await?,
                };
                info!(
                    count = words.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Loaded valid words"
                );
                Ok::<_, AppError>(Arc::new(words))
            })
            .await
            .cloned()
    }

    async fn read_local(&self) -> Result<Option<ValidWordSet>> {
        let raw = match fs::read_to_string(&self.local_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No local valid words file at {}", self.local_path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let words = ValidWordSet::from_lines(raw.lines());
        if words.is_empty() {
            debug!("Local valid words file is empty");
            return Ok(None);
        }
        Ok(Some(words))
    }

    async fn read_remote(&self) -> Result<ValidWordSet> {
        info!("Fetching valid words from {}", self.source_url);
        let response = self.transport.get(&self.source_url).await?;
        if !response.is_success() {
            return Err(AppError::FetchError(format!(
                "valid words source returned HTTP {}",
                response.status
            )));
        }

        let words = ValidWordSet::from_lines(response.body.lines());
        if words.is_empty() {
            return Err(AppError::ParseError(
                "valid words source contained no usable words".to_string(),
            ));
        }

        let mut sorted: Vec<&str> = words.words.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        storage::write_lines(&self.local_path, sorted).await?;

        Ok(words)
    }
}
