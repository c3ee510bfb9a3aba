use std::path::Path;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read feed list {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reads the feed list: one URL per line.
///
/// Blank lines and lines starting with `#` are ignored. Lines that are not
/// http(s) URLs are skipped with a warning. Order and duplicates are kept.
pub async fn read_feed_urls(path: &Path) -> Result<Vec<String>, SourceError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(parse_feed_list(&content))
}

fn parse_feed_list(content: &str) -> Vec<String> {
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match Url::parse(line) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => Some(line.to_string()),
                Ok(url) => {
                    tracing::warn!(line = idx + 1, scheme = %url.scheme(), "Unsupported feed URL scheme, skipping");
                    None
                }
                Err(e) => {
                    tracing::warn!(line = idx + 1, error = %e, "Invalid feed URL, skipping");
                    None
                }
            }
        })
        .collect()
}
