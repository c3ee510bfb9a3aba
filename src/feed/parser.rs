use crate::feed::post::{RawEntry, Timestamp, UNKNOWN_BLOG};
use feed_rs::model::{Entry, Link};
use feed_rs::parser;

/// A parsed feed document: its display name and its raw entries.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub display_name: String,
    pub entries: Vec<RawEntry>,
}

/// Parses RSS, Atom or JSON Feed bytes.
///
/// A feed without a usable title gets the placeholder name `"---"`.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let display_name = feed
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNKNOWN_BLOG.to_string());

    let entries = feed.entries.into_iter().map(raw_entry).collect();

    Ok(ParsedFeed {
        display_name,
        entries,
    })
}

fn raw_entry(entry: Entry) -> RawEntry {
    let mut names: Vec<String> = entry
        .authors
        .into_iter()
        .map(|p| p.name.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();
    // feed-rs folds every author element into one list; a lone author is the
    // single-author field, several are co-authors.
    let author = if names.len() == 1 { names.pop() } else { None };

    // feed-rs reports an empty or unparseable date element as `None`, the same
    // as a missing one, so these are only ever `Absent` or `At`.
    RawEntry {
        updated: Timestamp::from(entry.updated),
        published: Timestamp::from(entry.published),
        title: entry.title.map(|t| t.content),
        author,
        authors: names,
        link: entry_link(entry.links),
        content: entry.content.and_then(|c| c.body),
        summary: entry.summary.map(|s| s.content),
    }
}

/// The entry's own page: the first link with no `rel` or `rel="alternate"`,
/// otherwise the first link of any kind.
fn entry_link(links: Vec<Link>) -> Option<String> {
    let alternate = links
        .iter()
        .position(|l| matches!(l.rel.as_deref(), None | Some("alternate")));
    links
        .into_iter()
        .nth(alternate.unwrap_or(0))
        .map(|l| l.href)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::post::normalize;
    use chrono::{TimeZone, Utc};

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Atom</title>
  <id>urn:example</id>
  <updated>2024-01-03T00:00:00Z</updated>
  <entry>
    <title>First</title>
    <id>urn:example:1</id>
    <link href="https://example.com/1"/>
    <updated>2024-01-02T10:00:00Z</updated>
    <author><name>Ada</name></author>
    <content type="html">&lt;p&gt;one&lt;/p&gt;</content>
  </entry>
  <entry>
    <title>Second</title>
    <id>urn:example:2</id>
    <link href="https://example.com/2"/>
    <updated>2024-01-03T10:00:00Z</updated>
    <author><name>Ada</name></author>
    <author><name>Grace</name></author>
    <summary>two</summary>
  </entry>
</feed>"#;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <item>
    <title>Untimed</title>
    <link>https://example.com/untimed</link>
    <description>no date</description>
  </item>
  <item>
    <title>Timed</title>
    <link>https://example.com/timed</link>
    <pubDate>Thu, 01 Feb 2024 00:00:00 GMT</pubDate>
    <description>dated</description>
  </item>
</channel></rss>"#;

    #[test]
    fn test_parse_atom_entries() {
        let feed = parse_feed(ATOM.as_bytes()).unwrap();
        assert_eq!(feed.display_name, "Example Atom");
        assert_eq!(feed.entries.len(), 2);

        let first = &feed.entries[0];
        assert_eq!(
            first.updated,
            Timestamp::At(Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap())
        );
        assert_eq!(first.author.as_deref(), Some("Ada"));
        assert_eq!(first.link.as_deref(), Some("https://example.com/1"));
        assert_eq!(first.content.as_deref(), Some("<p>one</p>"));

        let second = &feed.entries[1];
        assert_eq!(second.author, None);
        assert_eq!(second.authors, vec!["Ada".to_string(), "Grace".to_string()]);
        assert_eq!(second.summary.as_deref(), Some("two"));
    }

    #[test]
    fn test_untitled_rss_uses_placeholder_name() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(feed.display_name, UNKNOWN_BLOG);
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.entries[0].updated, Timestamp::Absent);
        assert_eq!(feed.entries[0].published, Timestamp::Absent);
        assert_eq!(
            feed.entries[1].published,
            Timestamp::At(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_invalid_document_is_an_error() {
        assert!(parse_feed(b"<not valid xml").is_err());
    }

    fn atom_entry(entry: &str) -> String {
        format!(
            r#"<?xml version="1.0"?><feed xmlns="http://www.w3.org/2005/Atom">
<title>Links</title><id>urn:links</id><updated>2024-01-03T00:00:00Z</updated>
<entry><title>Post</title><id>urn:links:1</id>{entry}<summary>body</summary></entry>
</feed>"#
        )
    }

    #[test]
    fn test_alternate_link_preferred_over_earlier_links() {
        let xml = atom_entry(
            r#"<link rel="replies" href="https://example.com/1/comments"/>
<link rel="edit" href="https://example.com/api/1"/>
<link rel="alternate" href="https://example.com/1"/>
<updated>2024-01-02T00:00:00Z</updated>"#,
        );
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(feed.entries[0].link.as_deref(), Some("https://example.com/1"));
    }

    #[test]
    fn test_first_link_used_when_none_is_alternate() {
        let xml = atom_entry(
            r#"<link rel="replies" href="https://example.com/1/comments"/>
<link rel="edit" href="https://example.com/api/1"/>
<updated>2024-01-02T00:00:00Z</updated>"#,
        );
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(
            feed.entries[0].link.as_deref(),
            Some("https://example.com/1/comments")
        );
    }

    #[test]
    fn test_empty_updated_falls_back_to_published() {
        let xml = atom_entry(
            r#"<link href="https://example.com/1"/>
<updated></updated>
<published>2024-01-02T08:00:00Z</published>"#,
        );
        let feed = parse_feed(xml.as_bytes()).unwrap();
        let entry = feed.entries.into_iter().next().unwrap();
        assert_ne!(entry.updated, Timestamp::Null);

        let watermark = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let post = normalize(entry, "Links", watermark).unwrap();
        assert_eq!(post.time, Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap());
    }
}
