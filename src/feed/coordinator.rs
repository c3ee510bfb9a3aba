use crate::feed::fetcher::{fetch_feed, FetchOptions};
use crate::feed::post::Post;
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

/// Options for one collection pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectOptions {
    pub fetch: FetchOptions,
    /// Maximum number of feeds fetched at once. `None` runs one task per URL.
    pub max_concurrent: Option<usize>,
}

/// A feed that contributed nothing because it could not be fetched or parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFeed {
    pub url: String,
    pub error: String,
}

/// Merged result of fetching every configured feed.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    /// All accepted posts, globally sorted ascending.
    pub posts: Vec<Post>,
    /// Feeds that failed, in URL-list order.
    pub failed_feeds: Vec<FailedFeed>,
    /// Number of URLs processed, duplicates included.
    pub feed_count: usize,
}

impl Collection {
    /// True when there was at least one feed and none of them could be fetched.
    pub fn all_failed(&self) -> bool {
        self.feed_count > 0 && self.failed_feeds.len() == self.feed_count
    }
}

/// Fetches every feed concurrently and merges the results.
///
/// Each worker owns its own result slot; the slots are only read after every
/// task has finished. The per-feed sequences are concatenated in URL-list
/// order and then sorted, so the output does not depend on which worker
/// finishes first. Duplicate URLs are fetched independently.
///
/// Dropping the returned future aborts all outstanding workers and discards
/// their output.
pub async fn collect_posts(
    client: &reqwest::Client,
    urls: &[String],
    watermark: DateTime<Utc>,
    options: CollectOptions,
) -> Collection {
    let feed_count = urls.len();
    if feed_count == 0 {
        return Collection::default();
    }

    let limit = options.max_concurrent.unwrap_or(feed_count).max(1);
    let mut slots: Vec<Option<Result<Vec<Post>, String>>> = (0..feed_count).map(|_| None).collect();
    let mut pending = urls.iter().cloned().enumerate();
    let mut workers = JoinSet::new();

    loop {
        while workers.len() < limit {
            let Some((slot, url)) = pending.next() else {
                break;
            };
            let client = client.clone();
            workers.spawn(async move {
                let outcome = fetch_feed(&client, &url, watermark, options.fetch).await;
                let result = match outcome.error {
                    None => Ok(outcome.posts),
                    Some(e) => Err(e.to_string()),
                };
                (slot, result)
            });
        }

        match workers.join_next().await {
            Some(Ok((slot, result))) => slots[slot] = Some(result),
            // The slot stays empty and is reported as failed below.
            Some(Err(e)) => tracing::error!(error = %e, "Feed worker panicked"),
            None => break,
        }
    }

    let mut per_feed = Vec::with_capacity(feed_count);
    let mut failed_feeds = Vec::new();
    for (url, slot) in urls.iter().zip(slots) {
        match slot {
            Some(Ok(feed_posts)) => per_feed.push(feed_posts),
            Some(Err(error)) => failed_feeds.push(FailedFeed {
                url: url.clone(),
                error,
            }),
            None => failed_feeds.push(FailedFeed {
                url: url.clone(),
                error: "worker did not complete".to_string(),
            }),
        }
    }
    let posts = merge(per_feed);

    tracing::info!(
        feeds = feed_count,
        failed = failed_feeds.len(),
        posts = posts.len(),
        "Collected posts"
    );

    Collection {
        posts,
        failed_feeds,
        feed_count,
    }
}

/// Concatenates per-feed sequences in the given order, then sorts globally.
fn merge(per_feed: Vec<Vec<Post>>) -> Vec<Post> {
    let mut posts: Vec<Post> = per_feed.into_iter().flatten().collect();
    posts.sort();
    posts
}
