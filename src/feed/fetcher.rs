use crate::feed::parser::{parse_feed, ParsedFeed};
use crate::feed::post::{normalize, Post};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching one feed.
///
/// None of these abort a run: the feed worker turns them into an empty
/// result and the coordinator records the feed as failed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The whole fetch exceeded the per-feed timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Feed document could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// Per-feed limits applied by the worker.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Upper bound on request plus body download.
    pub timeout: Duration,
    /// Upper bound on the response body in bytes.
    pub max_bytes: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_bytes: DEFAULT_MAX_FEED_SIZE,
        }
    }
}

/// What one feed worker produced.
#[derive(Debug, Default)]
pub struct FeedOutcome {
    /// New posts, sorted ascending. Empty when the feed failed.
    pub posts: Vec<Post>,
    /// Why the feed contributed nothing, if it failed.
    pub error: Option<FetchError>,
}

/// Fetches one feed and returns its new posts, sorted ascending.
///
/// Never fails: a feed that cannot be fetched or parsed is logged and
/// contributes no posts. The cause is kept in [`FeedOutcome::error`].
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    watermark: DateTime<Utc>,
    options: FetchOptions,
) -> FeedOutcome {
    match try_fetch_feed(client, url, watermark, options).await {
        Ok(posts) => FeedOutcome { posts, error: None },
        Err(e) => {
            tracing::warn!(feed = %url, error = %e, "Feed fetch failed, skipping");
            FeedOutcome {
                posts: Vec::new(),
                error: Some(e),
            }
        }
    }
}

async fn try_fetch_feed(
    client: &reqwest::Client,
    url: &str,
    watermark: DateTime<Utc>,
    options: FetchOptions,
) -> Result<Vec<Post>, FetchError> {
    let bytes = tokio::time::timeout(options.timeout, download(client, url, options.max_bytes))
        .await
        .map_err(|_| FetchError::Timeout(options.timeout))??;

    let feed = parse_feed(&bytes)?;
    Ok(collect_entries(url, feed, watermark))
}

/// Normalizes every entry of a parsed feed and sorts the survivors.
fn collect_entries(url: &str, feed: ParsedFeed, watermark: DateTime<Utc>) -> Vec<Post> {
    let ParsedFeed {
        display_name,
        entries,
    } = feed;
    let total = entries.len();

    let mut posts: Vec<Post> = entries
        .into_iter()
        .filter_map(|entry| match normalize(entry, &display_name, watermark) {
            Ok(post) => Some(post),
            Err(rejected) => {
                if rejected.is_malformed() {
                    tracing::warn!(feed = %url, reason = %rejected, "Skipping malformed entry");
                } else {
                    tracing::trace!(feed = %url, reason = %rejected, "Skipping entry");
                }
                None
            }
        })
        .collect();
    posts.sort();

    tracing::debug!(
        feed = %url,
        blog = %display_name,
        entries = total,
        accepted = posts.len(),
        "Feed processed"
    );
    posts
}

async fn download(client: &reqwest::Client, url: &str, limit: usize) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    read_limited_bytes(response, limit).await
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
