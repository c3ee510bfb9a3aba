//! Renders a digest of posts into a single HTML document.
use crate::feed::Post;
use chrono::{DateTime, Utc};
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::fmt::Write;

/// Renders posts, in the order given, as one HTML document titled `title`.
///
/// Post bodies are inserted verbatim since feeds deliver them as HTML; every
/// other field is escaped.
pub fn render(posts: &[Post], title: &str) -> String {
    let mut html = String::with_capacity(1024 + posts.iter().map(|p| p.body.len() + 256).sum::<usize>());

    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    html.push_str("  <meta charset=\"UTF-8\" />\n");
    html.push_str("  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\" />\n");
    let _ = writeln!(html, "  <title>{}</title>", encode_text(title));
    html.push_str("</head>\n<body>\n");

    for post in posts {
        let _ = write!(
            html,
            "\n<article>\n  <h1><a href=\"{link}\">{title}</a></h1>\n  \
             <p><small>By {author} for <i>{blog}</i>, on {date} at {time}.</small></p>\n  \
             {body}\n</article>\n",
            link = encode_double_quoted_attribute(&post.link),
            title = encode_text(&post.title),
            author = encode_text(&post.author),
            blog = encode_text(&post.blog),
            date = nice_date(post.time),
            time = nice_time(post.time),
            body = post.body,
        );
    }

    html.push_str("\n</body>\n</html>\n");
    html
}

/// `2 January 2024`
fn nice_date(at: DateTime<Utc>) -> String {
    at.format("%-d %B %Y").to_string()
}

/// `9:05&thinsp;pm`
fn nice_time(at: DateTime<Utc>) -> String {
    at.format("%-I:%M&thinsp;%p").to_string().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn post(title: &str, body: &str) -> Post {
        Post {
            time: Utc.with_ymd_and_hms(2024, 1, 2, 21, 5, 0).unwrap(),
            blog: "Ben & Jerry's".into(),
            title: title.into(),
            author: "Ada".into(),
            link: "https://example.com/?a=1&b=\"2\"".into(),
            body: body.into(),
        }
    }

    #[test]
    fn test_nice_formats() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 9, 5, 0).unwrap();
        assert_eq!(nice_date(at), "2 January 2024");
        assert_eq!(nice_time(at), "9:05&thinsp;am");
        let at = Utc.with_ymd_and_hms(2024, 11, 20, 12, 30, 0).unwrap();
        assert_eq!(nice_date(at), "20 November 2024");
        assert_eq!(nice_time(at), "12:30&thinsp;pm");
    }

    #[test]
    fn test_render_escapes_metadata_but_not_body() {
        let html = render(&[post("<Hello>", "<p>raw <b>html</b></p>")], "THE DAILY NEWS");

        assert!(html.contains("<title>THE DAILY NEWS</title>"));
        assert!(html.contains("&lt;Hello&gt;"));
        assert!(html.contains("Ben &amp; Jerry's"));
        assert!(html.contains("href=\"https://example.com/?a=1&amp;b=&quot;2&quot;\""));
        assert!(html.contains("<p>raw <b>html</b></p>"));
        assert!(html.contains("By Ada for <i>Ben &amp; Jerry's</i>, on 2 January 2024 at 9:05&thinsp;pm."));
    }

    #[test]
    fn test_render_keeps_post_order() {
        let html = render(&[post("first", "1"), post("second", "2")], "Digest");
        let first = html.find("first").unwrap();
        let second = html.find("second").unwrap();
        assert!(first < second);
        assert_eq!(html.matches("<article>").count(), 2);
    }

    #[test]
    fn test_render_empty_digest() {
        let html = render(&[], "Digest");
        assert!(html.contains("<body>"));
        assert!(!html.contains("<article>"));
    }
}
