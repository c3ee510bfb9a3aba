//! HTML to e-book conversion through external tools.
//!
//! pandoc produces the EPUB; calibre's `ebook-convert` turns it into MOBI
//! when that format is requested.
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

const BASE_NAME: &str = "dailynews";
const MAX_STDERR_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{tool} reported success but {path} was not created")]
    MissingOutput { tool: String, path: PathBuf },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// E-book format delivered to the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EbookFormat {
    Epub,
    Mobi,
}

impl EbookFormat {
    pub fn extension(self) -> &'static str {
        match self {
            EbookFormat::Epub => "epub",
            EbookFormat::Mobi => "mobi",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            EbookFormat::Epub => "application/epub+zip",
            EbookFormat::Mobi => "application/x-mobipocket-ebook",
        }
    }
}

/// A converted e-book on disk. Removing it is the caller's job.
#[derive(Debug, Clone)]
pub struct Ebook {
    pub path: PathBuf,
    pub format: EbookFormat,
}

impl Ebook {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.{}", BASE_NAME, self.format.extension()))
    }
}

#[derive(Debug, Clone)]
pub struct EbookConverter {
    pub pandoc: PathBuf,
    pub ebook_convert: PathBuf,
    pub cover_image: Option<PathBuf>,
    pub format: EbookFormat,
    pub title: String,
}

impl EbookConverter {
    /// Converts an HTML document into an e-book inside `work_dir`.
    ///
    /// Intermediate files are removed whether or not conversion succeeds.
    pub async fn convert(&self, html: &str, work_dir: &Path) -> Result<Ebook, ConvertError> {
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(|source| ConvertError::Io {
                path: work_dir.to_path_buf(),
                source,
            })?;

        let html_path = work_dir.join(format!("{BASE_NAME}.html"));
        let epub_path = work_dir.join(format!("{BASE_NAME}.epub"));

        tokio::fs::write(&html_path, html)
            .await
            .map_err(|source| ConvertError::Io {
                path: html_path.clone(),
                source,
            })?;

        let epub = self.to_epub(&html_path, &epub_path).await;
        remove_quietly(&html_path).await;
        if epub.is_err() {
            // A failed tool may still have left a partial file behind.
            remove_quietly(&epub_path).await;
        }
        epub?;

        match self.format {
            EbookFormat::Epub => Ok(Ebook {
                path: epub_path,
                format: EbookFormat::Epub,
            }),
            EbookFormat::Mobi => {
                let mobi_path = work_dir.join(format!("{BASE_NAME}.mobi"));
                let mobi = run_tool(
                    &self.ebook_convert,
                    vec![epub_path.clone().into(), mobi_path.clone().into()],
                    &mobi_path,
                )
                .await;
                remove_quietly(&epub_path).await;
                if mobi.is_err() {
                    remove_quietly(&mobi_path).await;
                }
                mobi?;
                Ok(Ebook {
                    path: mobi_path,
                    format: EbookFormat::Mobi,
                })
            }
        }
    }

    async fn to_epub(&self, html_path: &Path, epub_path: &Path) -> Result<(), ConvertError> {
        let mut args: Vec<OsString> = vec![
            "--from=html".into(),
            "--to=epub3".into(),
            "--standalone".into(),
            format!("--metadata=title:{}", self.title).into(),
        ];
        match &self.cover_image {
            Some(cover) if cover.exists() => {
                let mut arg = OsString::from("--epub-cover-image=");
                arg.push(cover);
                args.push(arg);
            }
            Some(cover) => {
                tracing::warn!(path = %cover.display(), "Cover image not found, converting without it");
            }
            None => {}
        }
        args.push("--output".into());
        args.push(epub_path.into());
        args.push(html_path.into());

        run_tool(&self.pandoc, args, epub_path).await
    }
}

async fn run_tool(program: &Path, args: Vec<OsString>, output: &Path) -> Result<(), ConvertError> {
    let tool = program.display().to_string();
    tracing::debug!(tool = %tool, ?args, "Running converter");

    let result = Command::new(program)
        .args(&args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ConvertError::Spawn {
            tool: tool.clone(),
            source,
        })?;

    if !result.status.success() {
        let stderr: String = String::from_utf8_lossy(&result.stderr)
            .trim()
            .chars()
            .take(MAX_STDERR_CHARS)
            .collect();
        return Err(ConvertError::Failed {
            tool,
            status: result.status,
            stderr,
        });
    }

    if !tokio::fs::try_exists(output).await.unwrap_or(false) {
        return Err(ConvertError::MissingOutput {
            tool,
            path: output.to_path_buf(),
        });
    }

    Ok(())
}

pub(crate) async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
        }
    }
}
