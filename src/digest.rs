//! One digest run: watermark → feeds → posts → delivery → watermark.
use crate::config::Config;
use crate::convert::{remove_quietly, EbookConverter};
use crate::feed::{collect_posts, read_feed_urls, CollectOptions, FailedFeed, Post};
use crate::mail::Mailer;
use crate::render::render;
use crate::watermark::WatermarkStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Turns a non-empty, time-ordered list of posts into something the reader receives.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, posts: &[Post]) -> Result<()>;
}

/// Renders HTML, converts it to an e-book and mails it.
pub struct EbookDelivery {
    converter: EbookConverter,
    mailer: Mailer,
    work_dir: PathBuf,
}

impl EbookDelivery {
    pub fn new(converter: EbookConverter, mailer: Mailer, work_dir: PathBuf) -> Self {
        Self {
            converter,
            mailer,
            work_dir,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mailer = Mailer::from_config(&config.mail).context("Invalid mail configuration")?;
        Ok(Self::new(config.converter(), mailer, config.work_dir()))
    }
}

#[async_trait]
impl Delivery for EbookDelivery {
    async fn deliver(&self, posts: &[Post]) -> Result<()> {
        tracing::info!(posts = posts.len(), "Compiling digest");
        let html = render(posts, &self.converter.title);

        tracing::info!(format = ?self.converter.format, "Creating e-book");
        let ebook = self
            .converter
            .convert(&html, &self.work_dir)
            .await
            .context("E-book conversion failed")?;

        tracing::info!("Sending to e-reader address");
        let sent = self.mailer.send(&ebook).await;
        remove_quietly(&ebook.path).await;
        sent.context("Failed to send digest")
    }
}

/// Prints the rendered HTML instead of delivering it.
pub struct PrintDelivery {
    pub title: String,
}

#[async_trait]
impl Delivery for PrintDelivery {
    async fn deliver(&self, posts: &[Post]) -> Result<()> {
        println!("{}", render(posts, &self.title));
        Ok(())
    }
}

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Posts at or before this instant were excluded.
    pub watermark: DateTime<Utc>,
    /// Captured before fetching; becomes the next watermark on success.
    pub started_at: DateTime<Utc>,
    pub posts: usize,
    pub failed_feeds: Vec<FailedFeed>,
    pub delivered: bool,
    pub advanced: bool,
}

/// Everything a run needs, constructed once at start-up.
pub struct Digest {
    client: reqwest::Client,
    feed_file: PathBuf,
    store: Box<dyn WatermarkStore>,
    delivery: Box<dyn Delivery>,
    options: CollectOptions,
    initial_lookback: chrono::Duration,
}

impl Digest {
    pub fn new(
        client: reqwest::Client,
        feed_file: PathBuf,
        store: Box<dyn WatermarkStore>,
        delivery: Box<dyn Delivery>,
    ) -> Self {
        Self {
            client,
            feed_file,
            store,
            delivery,
            options: CollectOptions::default(),
            initial_lookback: chrono::Duration::hours(12),
        }
    }

    pub fn with_options(mut self, options: CollectOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_initial_lookback(mut self, lookback: chrono::Duration) -> Self {
        self.initial_lookback = lookback;
        self
    }

    /// Runs one collection and delivery pass.
    ///
    /// The watermark advances to the run's start time only when the run
    /// succeeded: either delivery went through, or there was nothing new to
    /// deliver. A run where every feed failed leaves the watermark untouched
    /// so the same window is tried again next period.
    ///
    /// # Errors
    ///
    /// Fails when the feed list or the watermark cannot be read or written,
    /// or when delivery fails. Per-feed and per-entry problems never fail a run.
    pub async fn run_once(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        let watermark = self
            .store
            .read()
            .context("Failed to read watermark")?
            .unwrap_or_else(|| {
                started_at
                    .checked_sub_signed(self.initial_lookback)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC)
            });

        tracing::info!(since = %watermark, "Collecting posts");

        let urls = read_feed_urls(&self.feed_file)
            .await
            .context("Failed to load feed list")?;

        let collection = collect_posts(&self.client, &urls, watermark, self.options).await;
        let mut report = RunReport {
            watermark,
            started_at,
            posts: collection.posts.len(),
            failed_feeds: collection.failed_feeds.clone(),
            delivered: false,
            advanced: false,
        };

        if collection.all_failed() {
            tracing::warn!(
                feeds = collection.feed_count,
                "Every feed failed, keeping watermark for the next run"
            );
            return Ok(report);
        }

        tracing::info!(posts = report.posts, "Downloaded posts");

        if !collection.posts.is_empty() {
            self.delivery.deliver(&collection.posts).await?;
            report.delivered = true;
        }

        self.store
            .write(started_at)
            .context("Failed to advance watermark")?;
        report.advanced = true;

        tracing::info!("Finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watermark::MemoryWatermark;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Clone, Default)]
    struct Recorder {
        runs: Arc<Mutex<Vec<Vec<String>>>>,
        fail: bool,
    }

    #[async_trait]
    impl Delivery for Recorder {
        async fn deliver(&self, posts: &[Post]) -> Result<()> {
            self.runs
                .lock()
                .unwrap()
                .push(posts.iter().map(|p| p.title.clone()).collect());
            if self.fail {
                anyhow::bail!("mail server down");
            }
            Ok(())
        }
    }

    struct SharedStore(Arc<MemoryWatermark>);

    impl WatermarkStore for SharedStore {
        fn read(&self) -> Result<Option<DateTime<Utc>>, crate::watermark::WatermarkError> {
            self.0.read()
        }
        fn write(&self, at: DateTime<Utc>) -> Result<(), crate::watermark::WatermarkError> {
            self.0.write(at)
        }
    }

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>News</title>
  <item><title>old</title><link>https://example.com/old</link>
    <pubDate>Sun, 31 Dec 2023 00:00:00 GMT</pubDate><description>o</description></item>
  <item><title>new</title><link>https://example.com/new</link>
    <pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate><description>n</description></item>
</channel></rss>"#;

    fn watermark() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn feed_file(name: &str, urls: &[String]) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("feeds.txt");
        std::fs::write(&path, urls.join("\n")).unwrap();
        path
    }

    async fn serve(status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(status).set_body_string(RSS))
            .mount(&server)
            .await;
        server
    }

    fn digest(feeds: PathBuf, store: Arc<MemoryWatermark>, delivery: Recorder) -> Digest {
        Digest::new(
            reqwest::Client::new(),
            feeds,
            Box::new(SharedStore(store)),
            Box::new(delivery),
        )
    }

    #[tokio::test]
    async fn test_successful_run_delivers_and_advances() {
        let server = serve(200).await;
        let feeds = feed_file("feedpress_digest_test_ok", &[format!("{}/feed", server.uri())]);
        let store = Arc::new(MemoryWatermark::new(Some(watermark())));
        let recorder = Recorder::default();

        let report = digest(feeds, store.clone(), recorder.clone())
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.watermark, watermark());
        assert_eq!(report.posts, 1);
        assert!(report.delivered);
        assert!(report.advanced);
        assert_eq!(store.read().unwrap(), Some(report.started_at));
        assert_eq!(*recorder.runs.lock().unwrap(), vec![vec!["new".to_string()]]);
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_watermark() {
        let server = serve(200).await;
        let feeds = feed_file("feedpress_digest_test_fail", &[format!("{}/feed", server.uri())]);
        let store = Arc::new(MemoryWatermark::new(Some(watermark())));
        let recorder = Recorder {
            fail: true,
            ..Recorder::default()
        };

        let result = digest(feeds, store.clone(), recorder).run_once().await;

        assert!(result.is_err());
        assert_eq!(store.read().unwrap(), Some(watermark()));
    }

    #[tokio::test]
    async fn test_all_feeds_failed_keeps_watermark() {
        let server = serve(503).await;
        let feeds = feed_file("feedpress_digest_test_down", &[format!("{}/feed", server.uri())]);
        let store = Arc::new(MemoryWatermark::new(Some(watermark())));
        let recorder = Recorder::default();

        let report = digest(feeds, store.clone(), recorder.clone())
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.failed_feeds.len(), 1);
        assert!(!report.delivered);
        assert!(!report.advanced);
        assert_eq!(store.read().unwrap(), Some(watermark()));
        assert!(recorder.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_new_advances_without_delivery() {
        let server = serve(200).await;
        let feeds = feed_file("feedpress_digest_test_quiet", &[format!("{}/feed", server.uri())]);
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let store = Arc::new(MemoryWatermark::new(Some(late)));
        let recorder = Recorder::default();

        let report = digest(feeds, store.clone(), recorder.clone())
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.posts, 0);
        assert!(!report.delivered);
        assert!(report.advanced);
        assert!(recorder.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_run_uses_initial_lookback() {
        let feeds = feed_file("feedpress_digest_test_first", &[]);
        let store = Arc::new(MemoryWatermark::default());

        let report = digest(feeds, store, Recorder::default())
            .with_initial_lookback(chrono::Duration::hours(3))
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.started_at - report.watermark, chrono::Duration::hours(3));
        // An empty feed list is not a failure
        assert!(report.advanced);
    }

    #[tokio::test]
    async fn test_unrepresentable_lookback_starts_from_earliest_time() {
        let feeds = feed_file("feedpress_digest_test_max_lookback", &[]);
        let store = Arc::new(MemoryWatermark::default());

        let report = digest(feeds, store, Recorder::default())
            .with_initial_lookback(chrono::Duration::MAX)
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.watermark, DateTime::<Utc>::MIN_UTC);
        assert!(report.advanced);
    }

    #[tokio::test]
    async fn test_missing_feed_list_is_fatal() {
        let store = Arc::new(MemoryWatermark::new(Some(watermark())));
        let result = digest(
            PathBuf::from("/tmp/feedpress_test_nonexistent_feeds.txt"),
            store.clone(),
            Recorder::default(),
        )
        .run_once()
        .await;

        assert!(result.is_err());
        assert_eq!(store.read().unwrap(), Some(watermark()));
    }
}
