//! Feed collection: everything between a list of feed URLs and a single
//! time-ordered sequence of new posts.
//!
//! - [`post`] - `Post` record and the per-entry normalizer
//! - [`parser`] - feed document parsing using the `feed-rs` crate
//! - [`fetcher`] - one feed worker: HTTP fetch, parse, normalize, sort
//! - [`coordinator`] - runs one worker per URL and merges their output
//! - [`sources`] - reads the feed URL list
//!
//! # Example
//!
//! ```ignore
//! use feedpress::feed::{collect_posts, read_feed_urls, CollectOptions};
//!
//! let urls = read_feed_urls(&path).await?;
//! let collection = collect_posts(&client, &urls, watermark, CollectOptions::default()).await;
//! ```

mod coordinator;
mod fetcher;
mod parser;
mod post;
mod sources;

pub use coordinator::{collect_posts, CollectOptions, Collection, FailedFeed};
pub use fetcher::{fetch_feed, FeedOutcome, FetchError, FetchOptions};
pub use parser::{parse_feed, ParsedFeed};
pub use post::{normalize, Post, RawEntry, Rejected, Timestamp, UNKNOWN_BLOG};
pub use sources::{read_feed_urls, SourceError};
