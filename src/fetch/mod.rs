//! Retrieval of raw archive bytes.
//!
//! A [`Fetcher`] never writes to disk; the lifecycle code hands the bytes
//! to the archive store. That keeps fetching replaceable by fakes in tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::MipError;
use crate::http::HttpClient;
use crate::runtime::Runtime;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the bytes behind `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Fetcher backed by [`HttpClient`] and its retry policy.
pub struct HttpFetcher {
    http_client: HttpClient,
}

impl HttpFetcher {
    pub fn new(http_client: HttpClient) -> Self {
        Self { http_client }
    }

    pub fn http_client(&self) -> &HttpClient {
        &self.http_client
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        info!("Downloading {}...", url);
        let bytes = self.http_client.get_bytes(url).await?;
        info!("Download complete ({} bytes).", bytes.len());
        Ok(bytes)
    }
}

/// Where an explicitly given archive comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    Url(String),
    File(PathBuf),
}

impl ArchiveSource {
    /// `http(s)://` strings are URLs, everything else is a local path.
    pub fn parse(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            ArchiveSource::Url(source.to_string())
        } else {
            ArchiveSource::File(PathBuf::from(source))
        }
    }

    /// Name used for format detection.
    pub fn location(&self) -> String {
        match self {
            ArchiveSource::Url(url) => url.clone(),
            ArchiveSource::File(path) => path.to_string_lossy().to_string(),
        }
    }
}

impl std::fmt::Display for ArchiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.location())
    }
}

/// Load the bytes of an explicit archive source.
pub async fn read_source<R: Runtime + ?Sized, F: Fetcher + ?Sized>(
    runtime: &R,
    fetcher: &F,
    source: &ArchiveSource,
) -> Result<Vec<u8>> {
    match source {
        ArchiveSource::Url(url) => fetcher.fetch(url).await,
        ArchiveSource::File(path) => read_local(runtime, path),
    }
}

fn read_local<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Vec<u8>> {
    if !runtime.exists(path) {
        anyhow::bail!("File not found: {}", path.display());
    }
    if runtime.is_dir(path) {
        anyhow::bail!("Not a file: {}", path.display());
    }
    runtime
        .read(path)
        .with_context(|| format!("Failed to read archive {}", path.display()))
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Verify archive bytes against an expected SHA-256 (hex, case-insensitive).
pub fn verify_checksum(bytes: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_hex(bytes);
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(MipError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        }
        .into());
    }
    debug!("Checksum verified: {}", actual);
    Ok(())
}
