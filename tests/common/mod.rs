#![allow(dead_code)]

use article_word_count::Config;
use article_word_count::fetcher::{FetchError, HttpResponse, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const WORDS_URL: &str = "https://words.test/words.txt";

/// In-memory web: fixed responses per URL and a request log.
#[derive(Default)]
pub struct FakeWeb {
    pages: Mutex<HashMap<String, (u16, String)>>,
    requests: Mutex<Vec<String>>,
    touch_on_request: Mutex<HashMap<String, PathBuf>>,
}

impl FakeWeb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, status: u16, body: &str) {
        self.pages.lock().insert(url.to_string(), (status, body.to_string()));
    }

    pub fn page(&self, url: &str, text: &str) {
        self.serve(url, 200, &format!("<html><body><p>{}</p></body></html>", text));
    }

    /// Creates `path` as an empty file whenever `url` is requested.
    pub fn touch_on_request(&self, url: &str, path: PathBuf) {
        self.touch_on_request.lock().insert(url.to_string(), path);
    }

    pub fn hits(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|u| u.as_str() == url).count()
    }

    pub fn article_requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter(|u| u.as_str() != WORDS_URL)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for FakeWeb {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.requests.lock().push(url.to_string());
        if let Some(path) = self.touch_on_request.lock().get(url) {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "").unwrap();
        }
        let (status, body) = self
            .pages
            .lock()
            .get(url)
            .cloned()
            .unwrap_or((404, String::new()));
        Ok(HttpResponse { status, body })
    }
}

pub fn config_for(root: &Path, urls: &[&str]) -> Config {
    let list = root.join("urls.txt");
    let mut body = urls.join("\n");
    body.push('\n');
    std::fs::write(&list, body).unwrap();

    Config {
        cache_root: root.join("cache"),
        article_list_path: list,
        words_source_url: WORDS_URL.to_string(),
        batch_size: 2,
        max_run_duration: Duration::from_secs(60),
        rate_limit_backoff: Duration::ZERO,
    }
}
