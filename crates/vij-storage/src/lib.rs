//! Blocking-style HTTP fetch, scoped temporary storage and external archive
//! extraction for the VIJ jobs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
pub use reqwest::Url;
use tempfile::TempDir;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const CRATE_NAME: &str = "vij-storage";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Single-attempt HTTP client. Failures abandon the current unit of work;
/// there is no retry tier, the run simply moves on.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    async fn send_checked(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp)
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let resp = self.send_checked(url).await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        let body = resp.bytes().await?.to_vec();
        debug!(url = %final_url, bytes = body.len(), "fetched");
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }

    /// Stream a (potentially large) body straight to `dest` without holding
    /// it in memory.
    pub async fn download_to_file(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let io_err = |source| DownloadError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut resp = self.send_checked(url).await?;
        let mut file = fs::File::create(dest).await.map_err(&io_err)?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await.map_err(FetchError::Request)? {
            file.write_all(&chunk).await.map_err(&io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(&io_err)?;
        info!(url, bytes = written, dest = %dest.display(), "archive downloaded");
        Ok(written)
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-artifact scratch space: the downloaded archive and its extraction
/// directory both live inside one `TempDir`, so cleanup is guaranteed on
/// every exit path when the workspace drops.
#[derive(Debug)]
pub struct ArtifactWorkspace {
    dir: TempDir,
}

impl ArtifactWorkspace {
    pub fn create(base: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(base)?;
        let dir = TempDir::with_prefix_in("vij-artifact-", base)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn archive_path(&self, file_name: &str) -> PathBuf {
        self.dir.path().join(file_name)
    }

    pub fn extract_dir(&self) -> PathBuf {
        self.dir.path().join("extracted")
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot launch extraction tool {tool}: {source}")]
    Spawn {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("extraction tool exited with {status}: {stderr}")]
    ToolFailed { status: String, stderr: String },
    #[error("preparing extraction dir {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Wraps the external decompression tool (`unrar`-compatible argument
/// convention: `x -y <archive> <dest>`). Success is exit code zero.
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    tool_path: PathBuf,
}

impl ArchiveExtractor {
    pub fn new(tool_path: impl Into<PathBuf>) -> Self {
        Self {
            tool_path: tool_path.into(),
        }
    }

    pub async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ExtractError> {
        fs::create_dir_all(dest).await.map_err(|e| ExtractError::Io {
            path: dest.to_path_buf(),
            source: e,
        })?;
        info!(archive = %archive.display(), dest = %dest.display(), "extracting archive");
        let output = Command::new(&self.tool_path)
            .arg("x")
            .arg("-y")
            .arg(archive)
            .arg(dest)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ExtractError::Spawn {
                tool: self.tool_path.clone(),
                source: e,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ExtractError::ToolFailed {
                status: output.status.to_string(),
                stderr,
            });
        }
        Ok(())
    }
}

/// All files under `dir` whose name ends with `extension`, in a stable
/// (path-sorted) order. Archives sometimes nest their tables in a
/// subdirectory, so the walk is recursive.
pub fn locate_tables(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.to_ascii_lowercase().ends_with(&extension.to_ascii_lowercase()))
                .unwrap_or(false)
        })
        .collect();
    found.sort();
    if found.is_empty() {
        warn!(dir = %dir.display(), extension, "no table files found after extraction");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_is_removed_on_drop() {
        let base = tempfile::tempdir().expect("base dir");
        let scratch;
        {
            let ws = ArtifactWorkspace::create(base.path()).expect("workspace");
            scratch = ws.path().to_path_buf();
            std::fs::write(ws.archive_path("2023.rar"), b"stub").expect("write");
            assert!(scratch.exists());
        }
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn extractor_reports_nonzero_exit_and_leaves_no_tool_residue() {
        let base = tempfile::tempdir().expect("base dir");
        let ws = ArtifactWorkspace::create(base.path()).expect("workspace");
        let archive = ws.archive_path("2023.rar");
        std::fs::write(&archive, b"not really an archive").expect("write");

        let extractor = ArchiveExtractor::new("false");
        let err = extractor
            .extract(&archive, &ws.extract_dir())
            .await
            .expect_err("false always fails");
        assert!(matches!(err, ExtractError::ToolFailed { .. }));
    }

    #[tokio::test]
    async fn extractor_reports_missing_tool() {
        let base = tempfile::tempdir().expect("base dir");
        let ws = ArtifactWorkspace::create(base.path()).expect("workspace");
        let archive = ws.archive_path("2023.rar");
        std::fs::write(&archive, b"stub").expect("write");

        let extractor = ArchiveExtractor::new("/nonexistent/vij-unrar");
        let err = extractor
            .extract(&archive, &ws.extract_dir())
            .await
            .expect_err("missing tool");
        assert!(matches!(err, ExtractError::Spawn { .. }));
    }

    #[test]
    fn locate_tables_walks_nested_dirs_and_filters_extension() {
        let dir = tempfile::tempdir().expect("dir");
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join("top.csv"), b"x").expect("write");
        std::fs::write(nested.join("deep.CSV"), b"x").expect("write");
        std::fs::write(nested.join("readme.txt"), b"x").expect("write");

        let tables = locate_tables(dir.path(), ".csv");
        assert_eq!(tables.len(), 2);
        assert!(tables.iter().all(|p| {
            p.extension()
                .map(|e| e.eq_ignore_ascii_case("csv"))
                .unwrap_or(false)
        }));
    }
}
