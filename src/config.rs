//! Configuration file parser.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
//!
//! Environment variables from the container deployment (`EMAIL_SMTP`,
//! `KINDLE_EMAIL`, ...) override the file, see [`Config::apply_env`].
use crate::convert::{EbookConverter, EbookFormat};
use crate::feed::{CollectOptions, FetchOptions};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// An environment override could not be parsed.
    #[error("Invalid value for {var}: {value:?} is not a number")]
    InvalidEnv { var: &'static str, value: String },

    /// A setting is outside the range the program can represent.
    #[error("{setting} = {value} is out of range (max {max})")]
    OutOfRange {
        setting: &'static str,
        value: u64,
        max: u64,
    },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All sections use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feeds: FeedsConfig,
    pub ebook: EbookConfig,
    pub mail: MailConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    /// Text file with one feed URL per line.
    pub feed_file: PathBuf,
    /// File holding the watermark of the last successful run.
    pub state_file: PathBuf,
    /// Per-feed timeout in seconds, covering request and download.
    pub timeout_secs: u64,
    /// Maximum number of feeds fetched at once. Unset = one task per feed.
    pub max_concurrent: Option<usize>,
    /// Maximum accepted feed document size in bytes.
    pub max_feed_bytes: usize,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        let fetch = FetchOptions::default();
        Self {
            feed_file: PathBuf::from("/config/feeds.txt"),
            state_file: PathBuf::from("/config/last_run"),
            timeout_secs: fetch.timeout.as_secs(),
            max_concurrent: None,
            max_feed_bytes: fetch.max_bytes,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EbookConfig {
    /// Document title shown by the reader.
    pub title: String,
    pub pandoc_path: PathBuf,
    pub ebook_convert_path: PathBuf,
    /// Cover image; skipped with a warning when the file does not exist.
    pub cover_image: Option<PathBuf>,
    pub format: EbookFormat,
    /// Where intermediate and output files are written. Defaults to the system temp dir.
    pub work_dir: Option<PathBuf>,
}

impl Default for EbookConfig {
    fn default() -> Self {
        Self {
            title: "THE DAILY NEWS".to_string(),
            pandoc_path: PathBuf::from("/usr/bin/pandoc"),
            ebook_convert_path: PathBuf::from("ebook-convert"),
            cover_image: Some(PathBuf::from("/config/cover.png")),
            format: EbookFormat::Mobi,
            work_dir: None,
        }
    }
}

/// SMTP delivery settings.
///
/// Custom Debug impl masks `password` to prevent secret leakage
/// in logs, error messages, and debug output.
#[derive(Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub smtp_host: Option<String>,
    /// Implicit-TLS SMTP port.
    pub smtp_port: u16,
    pub username: Option<String>,
    #[serde(deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,
    pub from: Option<String>,
    /// The e-reader's mail-in address.
    pub to: Option<String>,
    pub subject: String,
    pub body: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: 465,
            username: None,
            password: None,
            from: None,
            to: None,
            subject: "Daily News".to_string(),
            body: "This is your daily news.\n\n--\n\n".to_string(),
        }
    }
}

impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("from", &self.from)
            .field("to", &self.to)
            .field("subject", &self.subject)
            .field("body", &self.body)
            .finish()
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Hours between runs when not started with `--once`.
    pub update_period_hours: u64,
    /// How far back the very first run looks. Defaults to one period.
    pub initial_lookback_hours: Option<u64>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            update_period_hours: 12,
            initial_lookback_hours: None,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Upper bound for any hour setting, roughly a century.
    pub const MAX_HOURS: u64 = 876_000;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {} // Size is within limits, proceed
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load the file, then apply environment overrides from the process environment.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Overrides settings from environment variables. Empty values are ignored.
    ///
    /// | Variable          | Setting                      |
    /// |-------------------|------------------------------|
    /// | `EMAIL_SMTP`      | `mail.smtp_host`             |
    /// | `EMAIL_SMTP_PORT` | `mail.smtp_port`             |
    /// | `EMAIL_USER`      | `mail.username`              |
    /// | `EMAIL_PASSWORD`  | `mail.password`              |
    /// | `EMAIL_FROM`      | `mail.from`                  |
    /// | `KINDLE_EMAIL`    | `mail.to`                    |
    /// | `PANDOC_PATH`     | `ebook.pandoc_path`          |
    /// | `UPDATE_PERIOD`   | `schedule.update_period_hours` |
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("EMAIL_SMTP") {
            self.mail.smtp_host = Some(v);
        }
        if let Some(v) = get("EMAIL_SMTP_PORT") {
            self.mail.smtp_port = parse_env("EMAIL_SMTP_PORT", v)?;
        }
        if let Some(v) = get("EMAIL_USER") {
            self.mail.username = Some(v);
        }
        if let Some(v) = get("EMAIL_PASSWORD") {
            self.mail.password = Some(SecretString::from(v));
        }
        if let Some(v) = get("EMAIL_FROM") {
            self.mail.from = Some(v);
        }
        if let Some(v) = get("KINDLE_EMAIL") {
            self.mail.to = Some(v);
        }
        if let Some(v) = get("PANDOC_PATH") {
            self.ebook.pandoc_path = PathBuf::from(v);
        }
        if let Some(v) = get("UPDATE_PERIOD") {
            self.schedule.update_period_hours = parse_env("UPDATE_PERIOD", v)?;
        }
        self.validate()
    }

    /// Rejects hour settings too large to turn into durations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let hours = [
            ("schedule.update_period_hours", Some(self.schedule.update_period_hours)),
            ("schedule.initial_lookback_hours", self.schedule.initial_lookback_hours),
        ];
        for (setting, value) in hours {
            if let Some(value) = value.filter(|v| *v > Self::MAX_HOURS) {
                return Err(ConfigError::OutOfRange {
                    setting,
                    value,
                    max: Self::MAX_HOURS,
                });
            }
        }
        Ok(())
    }

    pub fn collect_options(&self) -> CollectOptions {
        CollectOptions {
            fetch: FetchOptions {
                timeout: Duration::from_secs(self.feeds.timeout_secs.max(1)),
                max_bytes: self.feeds.max_feed_bytes,
            },
            max_concurrent: self.feeds.max_concurrent,
        }
    }

    pub fn converter(&self) -> EbookConverter {
        EbookConverter {
            pandoc: self.ebook.pandoc_path.clone(),
            ebook_convert: self.ebook.ebook_convert_path.clone(),
            cover_image: self.ebook.cover_image.clone(),
            format: self.ebook.format,
            title: self.ebook.title.clone(),
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.ebook
            .work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("feedpress"))
    }

    pub fn update_period(&self) -> Duration {
        let hours = self.schedule.update_period_hours.clamp(1, Self::MAX_HOURS);
        Duration::from_secs(hours * 3600)
    }

    /// Watermark used when none has been recorded yet, relative to the run start.
    pub fn initial_lookback(&self) -> chrono::Duration {
        let hours = self
            .schedule
            .initial_lookback_hours
            .unwrap_or(self.schedule.update_period_hours)
            .min(Self::MAX_HOURS);
        // Bounded above, so the cast and `hours` cannot overflow.
        chrono::Duration::hours(hours as i64)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

fn warn_unknown_keys(raw: &toml::Table) {
    const SECTIONS: [(&str, &[&str]); 4] = [
        (
            "feeds",
            &["feed_file", "state_file", "timeout_secs", "max_concurrent", "max_feed_bytes"],
        ),
        (
            "ebook",
            &["title", "pandoc_path", "ebook_convert_path", "cover_image", "format", "work_dir"],
        ),
        (
            "mail",
            &["smtp_host", "smtp_port", "username", "password", "from", "to", "subject", "body"],
        ),
        ("schedule", &["update_period_hours", "initial_lookback_hours"]),
    ];

    for (key, value) in raw {
        let Some((_, known)) = SECTIONS.iter().find(|(name, _)| *name == key.as_str()) else {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            continue;
        };
        if let Some(table) = value.as_table() {
            for sub in table.keys() {
                if !known.contains(&sub.as_str()) {
                    tracing::warn!(key = %format!("{key}.{sub}"), "Unknown key in config file, ignoring");
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
