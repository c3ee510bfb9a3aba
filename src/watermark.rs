//! Persistence of the "last run" instant.
//!
//! The watermark is the only state carried between runs. It is read once at
//! the start of a run and written back only after the run succeeded.
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("Failed to access watermark file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Watermark file {path} does not hold an RFC 3339 timestamp: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: chrono::ParseError,
    },
}

/// Durable storage for the watermark.
pub trait WatermarkStore: Send + Sync {
    /// Returns the recorded watermark, or `None` if nothing was recorded yet.
    fn read(&self) -> Result<Option<DateTime<Utc>>, WatermarkError>;

    fn write(&self, at: DateTime<Utc>) -> Result<(), WatermarkError>;
}

/// Stores the watermark as a single RFC 3339 line in a file.
#[derive(Debug, Clone)]
pub struct FileWatermark {
    path: PathBuf,
}

impl FileWatermark {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: std::io::Error) -> WatermarkError {
        WatermarkError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl WatermarkStore for FileWatermark {
    fn read(&self) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No watermark recorded yet");
                return Ok(None);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }

        DateTime::parse_from_rfc3339(content)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|source| WatermarkError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// Writes through a temp file and a rename so a crash never leaves a
    /// half-written record behind.
    fn write(&self, at: DateTime<Utc>) -> Result<(), WatermarkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let temp_path = self.path.with_extension(format!(
            "tmp.{:016x}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));

        let result = (|| {
            let mut temp_file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)?;
            writeln!(temp_file, "{}", at.to_rfc3339())?;
            temp_file.sync_all()?;
            drop(temp_file);
            std::fs::rename(&temp_path, &self.path)
        })();

        if let Err(e) = result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(self.io_error(e));
        }

        tracing::debug!(path = %self.path.display(), watermark = %at, "Watermark advanced");
        Ok(())
    }
}

/// Keeps the watermark in memory only. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryWatermark {
    value: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryWatermark {
    pub fn new(initial: Option<DateTime<Utc>>) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }
}

impl WatermarkStore for MemoryWatermark {
    fn read(&self) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        Ok(*self.value.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn write(&self, at: DateTime<Utc>) -> Result<(), WatermarkError> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_missing_file_reads_none() {
        let store = FileWatermark::new("/tmp/feedpress_test_nonexistent_watermark");
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn test_write_then_read() {
        let dir = std::env::temp_dir().join("feedpress_watermark_test_roundtrip");
        std::fs::create_dir_all(&dir).unwrap();
        let store = FileWatermark::new(dir.join("state").join("last_run"));
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();

        store.write(at).unwrap();
        assert_eq!(store.read().unwrap(), Some(at));

        let later = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        store.write(later).unwrap();
        assert_eq!(store.read().unwrap(), Some(later));

        // No temp files left behind
        let leftovers = std::fs::read_dir(dir.join("state")).unwrap().count();
        assert_eq!(leftovers, 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let dir = std::env::temp_dir().join("feedpress_watermark_test_garbage");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("last_run");
        std::fs::write(&path, "yesterday-ish").unwrap();

        let result = FileWatermark::new(&path).read();
        assert!(matches!(result, Err(WatermarkError::Parse { .. })));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_memory_watermark() {
        let store = MemoryWatermark::default();
        assert_eq!(store.read().unwrap(), None);
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.write(at).unwrap();
        assert_eq!(store.read().unwrap(), Some(at));
    }
}
