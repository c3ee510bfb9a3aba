use chrono::{DateTime, Utc};
use thiserror::Error;

/// Display name used for a feed whose metadata carries no title.
pub const UNKNOWN_BLOG: &str = "---";

const DEFAULT_TITLE: &str = "Null";
const DEFAULT_AUTHOR: &str = "Anonymous";

/// A single post accepted into a digest.
///
/// Field order matters: the derived `Ord` compares `time` first and then the
/// remaining fields as a tuple, which gives a total order and makes merging
/// deterministic when two posts share a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Post {
    pub time: DateTime<Utc>,
    pub blog: String,
    pub title: String,
    pub author: String,
    pub link: String,
    pub body: String,
}

/// A timestamp field as a feed dialect presents it.
///
/// `Null` is distinct from `Absent`: a feed that carries the field with an
/// empty value does not fall back to the next candidate field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Timestamp {
    #[default]
    Absent,
    Null,
    At(DateTime<Utc>),
}

impl From<Option<DateTime<Utc>>> for Timestamp {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map_or(Timestamp::Absent, Timestamp::At)
    }
}

/// A loosely-structured feed entry, before normalization.
///
/// Every field is optional; which ones are populated depends on the feed
/// dialect (RSS 0.9x/2.0, Atom, JSON Feed).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub updated: Timestamp,
    pub published: Timestamp,
    pub title: Option<String>,
    /// Single-author field.
    pub author: Option<String>,
    /// Names of all listed co-authors, used when `author` is absent.
    pub authors: Vec<String>,
    pub link: Option<String>,
    /// Value of the first content block.
    pub content: Option<String>,
    pub summary: Option<String>,
}

/// Why an entry did not become a [`Post`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejected {
    /// Neither an updated nor a published timestamp.
    #[error("entry has no usable timestamp")]
    Undateable,
    /// At or before the watermark: already delivered by a previous run.
    #[error("entry at {0} is not newer than the watermark")]
    Stale(DateTime<Utc>),
    #[error("entry has no link")]
    MissingLink,
    #[error("entry has neither content nor summary")]
    MissingBody,
}

impl Rejected {
    /// Malformed entries are worth a warning; undateable and stale ones are routine.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Rejected::MissingLink | Rejected::MissingBody)
    }
}

/// Converts one raw entry into a [`Post`], or says why it was rejected.
///
/// Fallback order per field:
///
/// - time: `updated`, then `published` (only if `updated` is absent)
/// - title: `title`, then `"Null"`
/// - author: `author`, then co-authors joined with `", "`, then `"Anonymous"`
/// - body: first content block, then `summary`
///
/// A missing link or body is malformed; the caller decides whether to log it.
pub fn normalize(entry: RawEntry, blog: &str, watermark: DateTime<Utc>) -> Result<Post, Rejected> {
    let time = match entry.updated {
        Timestamp::Absent => entry.published,
        other => other,
    };
    let time = match time {
        Timestamp::At(time) => time,
        Timestamp::Absent | Timestamp::Null => return Err(Rejected::Undateable),
    };
    if time <= watermark {
        return Err(Rejected::Stale(time));
    }

    let title = entry.title.unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let author = resolve_author(entry.author, &entry.authors);
    let link = entry.link.ok_or(Rejected::MissingLink)?;
    let body = entry
        .content
        .or(entry.summary)
        .ok_or(Rejected::MissingBody)?;

    Ok(Post {
        time,
        blog: blog.to_string(),
        title,
        author,
        link,
        body,
    })
}

fn resolve_author(author: Option<String>, authors: &[String]) -> String {
    if let Some(author) = author {
        return author;
    }
    if authors.is_empty() {
        return DEFAULT_AUTHOR.to_string();
    }
    authors.join(", ")
}
