use anyhow::{Context, Result};
use async_trait::async_trait;
use glob::Pattern;
use log::{debug, info, warn};
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::OnceCell;

use super::{PackageSpec, Registry};
use crate::error::MipError;
use crate::http::HttpClient;
use crate::package::is_valid_name;

pub const DEFAULT_INDEX_URL: &str = "https://mip-org.github.io/mip-core/index.json";

const ARCHIVE_EXTENSIONS: [&str; 4] = ["mhl", "zip", "tar.gz", "tgz"];

#[derive(Deserialize, Debug)]
struct IndexDocument {
    #[serde(default)]
    packages: Vec<IndexEntry>,
}

#[derive(Deserialize, Debug)]
struct IndexEntry {
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    /// Absolute archive URL
    #[serde(default)]
    mhl_url: Option<String>,
    /// Archive file name relative to the index location
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
}

/// Registry backed by the published package index.
///
/// The index is downloaded on the first lookup and cached for the lifetime
/// of the registry, so one CLI invocation fetches it at most once.
pub struct IndexRegistry {
    http_client: HttpClient,
    index_url: String,
    entries: OnceCell<HashMap<String, PackageSpec>>,
}

impl IndexRegistry {
    pub fn new(http_client: HttpClient, index_url: impl Into<String>) -> Self {
        Self {
            http_client,
            index_url: index_url.into(),
            entries: OnceCell::new(),
        }
    }

    pub fn index_url(&self) -> &str {
        &self.index_url
    }

    async fn entries(&self) -> Result<&HashMap<String, PackageSpec>> {
        self.entries.get_or_try_init(|| self.load()).await
    }

    #[tracing::instrument(skip(self))]
    async fn load(&self) -> Result<HashMap<String, PackageSpec>> {
        info!("Fetching package index from {}", self.index_url);
        let document: IndexDocument = self
            .http_client
            .get_json(&self.index_url)
            .await
            .context("Failed to fetch package index")?;
        let base = Url::parse(&self.index_url)
            .with_context(|| format!("Invalid index URL: {}", self.index_url))?;

        let specs: HashMap<String, PackageSpec> = document
            .packages
            .into_iter()
            .filter_map(|entry| entry_to_spec(&base, entry))
            .map(|spec| (spec.name.clone(), spec))
            .collect();
        debug!("Index lists {} packages", specs.len());
        Ok(specs)
    }
}

fn entry_to_spec(base: &Url, entry: IndexEntry) -> Option<PackageSpec> {
    if !is_valid_name(&entry.name) {
        warn!("Skipping index entry with invalid name {:?}", entry.name);
        return None;
    }
    if let Some(dep) = entry.dependencies.iter().find(|d| !is_valid_name(d)) {
        warn!("Skipping '{}': invalid dependency name {:?}", entry.name, dep);
        return None;
    }
    let source_url = match (&entry.mhl_url, &entry.filename) {
        (Some(url), _) => url.clone(),
        (None, Some(filename)) => match base.join(filename) {
            Ok(url) => url.to_string(),
            Err(e) => {
                warn!("Skipping '{}': bad filename {:?}: {}", entry.name, filename, e);
                return None;
            }
        },
        (None, None) => {
            warn!("Skipping '{}': index entry has no archive location", entry.name);
            return None;
        }
    };

    let file_name = source_url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .unwrap_or_default();
    if !matches_archive_name(&entry.name, file_name) {
        warn!(
            "Archive '{}' for '{}' does not follow the <name>-<version>.<ext> naming",
            file_name, entry.name
        );
    }

    let mut spec = PackageSpec::new(entry.name, source_url).with_dependencies(entry.dependencies);
    spec.version = entry.version;
    spec.sha256 = entry.sha256.map(|s| s.to_lowercase());
    Some(spec)
}

/// Whether `file_name` matches `<name>-*.<ext>` for a known archive extension.
fn matches_archive_name(name: &str, file_name: &str) -> bool {
    let escaped = Pattern::escape(name);
    ARCHIVE_EXTENSIONS.iter().any(|ext| {
        Pattern::new(&format!("{}-*.{}", escaped, ext))
            .map(|p| p.matches(file_name))
            .unwrap_or(false)
    })
}

#[async_trait]
impl Registry for IndexRegistry {
    async fn resolve(&self, name: &str) -> Result<PackageSpec> {
        self.entries()
            .await?
            .get(name)
            .cloned()
            .ok_or_else(|| MipError::NotFound(name.to_string()).into())
    }
}
