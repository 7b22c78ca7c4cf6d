//! Paginated feed fetching: bounded retries with a fixed pause, response
//! cache invalidation on failure, and early pagination stop once a page
//! falls entirely behind the retention window.

use crate::constants::{self, RETENTION_DAYS};
use crate::domain::Language;
use crate::error::{ImporterError, Result};
use crate::feed::{FeedPage, FeedRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, error, info};

/// Raw response to a feed page request.
#[derive(Debug, Clone)]
pub struct FeedResponse {
    pub status: u16,
    pub body: String,
}

/// HTTP seam of the fetcher. Production uses [`HttpFeedClient`]; tests
/// substitute scripted clients.
#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<FeedResponse>;

    /// Drop any cached response for this URL. Default is a no-op for
    /// clients without a response cache.
    async fn invalidate(&self, _url: &str) {}
}

/// reqwest-backed client with an optional in-process response cache.
pub struct HttpFeedClient {
    client: reqwest::Client,
    cache: Option<Mutex<HashMap<String, FeedResponse>>>,
}

impl HttpFeedClient {
    pub fn new(cached: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache: cached.then(|| Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn get(&self, url: &str) -> Result<FeedResponse> {
        if let Some(cache) = &self.cache {
            let cache = cache.lock().unwrap();
            if let Some(hit) = cache.get(url) {
                debug!("Response cache hit for {}", url);
                return Ok(hit.clone());
            }
        }

        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        let response = FeedResponse { status, body };

        if status == 200 {
            if let Some(cache) = &self.cache {
                cache
                    .lock()
                    .unwrap()
                    .insert(url.to_string(), response.clone());
            }
        }
        Ok(response)
    }

    async fn invalidate(&self, url: &str) {
        if let Some(cache) = &self.cache {
            cache.lock().unwrap().remove(url);
        }
    }
}

/// UTC time window of one record, reported by the sink even for records it
/// otherwise skips: the fetcher needs the end times for its early stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Consumer of raw feed records, one call per (language, record) pair.
#[async_trait]
pub trait RecordSink: Send {
    async fn consume(&mut self, language: Language, record: FeedRecord) -> Result<TimeWindow>;
}

/// Pages through the feed, feeding records into a sink.
pub struct FeedFetcher<'a> {
    client: &'a dyn FeedClient,
    base_url: String,
    max_retries: u32,
    retry_delay: std::time::Duration,
}

impl<'a> FeedFetcher<'a> {
    pub fn new(
        client: &'a dyn FeedClient,
        base_url: String,
        max_retries: u32,
        retry_delay_secs: u64,
    ) -> FeedFetcher<'a> {
        FeedFetcher {
            client,
            base_url,
            max_retries,
            retry_delay: std::time::Duration::from_secs(retry_delay_secs),
        }
    }

    /// Fetch one page, retrying transient failures in place. Exhausting the
    /// retry budget yields `FeedUnavailable`, which aborts the whole import:
    /// reconciling against a half-fetched feed would soft-delete live events.
    async fn fetch_page(&self, url: &str) -> Result<FeedPage> {
        for attempt in 1..=self.max_retries {
            let response = self.client.get(url).await?;
            if response.status != 200 {
                error!("Espoo API reported HTTP {}", response.status);
                self.retry_pause(url, attempt).await;
                continue;
            }
            match serde_json::from_str::<FeedPage>(&response.body) {
                Ok(page) => return Ok(page),
                Err(parse_error) => {
                    error!(
                        "Espoo API returned invalid JSON for url {}: {}",
                        url, parse_error
                    );
                    self.retry_pause(url, attempt).await;
                }
            }
        }
        error!("Espoo API is broken, giving up");
        Err(ImporterError::FeedUnavailable {
            url: url.to_string(),
            attempts: self.max_retries,
        })
    }

    async fn retry_pause(&self, url: &str, attempt: u32) {
        self.client.invalidate(url).await;
        if attempt < self.max_retries {
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Fetch every page of one language's listing, following next-page
    /// links. Pagination stops early once the earliest end time on a page
    /// has fallen behind the retention window: the feed is ordered by
    /// descending end date, so later pages are older still.
    pub async fn fetch_all(
        &self,
        first_url: &str,
        language: Language,
        sink: &mut dyn RecordSink,
    ) -> Result<()> {
        let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);
        let mut url = first_url.to_string();
        loop {
            let page = self.fetch_page(&url).await?;
            info!(
                "Fetched {} records for lang {} from {}",
                page.value.len(),
                language,
                url
            );

            let mut earliest_end: Option<DateTime<Utc>> = None;
            for record in page.value {
                let window = sink.consume(language, record).await?;
                if earliest_end.map_or(true, |end| window.end_time < end) {
                    earliest_end = Some(window.end_time);
                }
            }

            if let Some(earliest) = earliest_end {
                if earliest < cutoff {
                    debug!("Page fell behind the retention window, stopping pagination");
                    return Ok(());
                }
            }
            match page.next_link {
                Some(next_link) => url = constants::next_page_url(&self.base_url, &next_link),
                None => return Ok(()),
            }
        }
    }
}
