use anyhow::Result;
use log::debug;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::paths::{lock_root, namespace_root, package_root, resolve_root};
use crate::{
    fetch::HttpFetcher,
    http::HttpClient,
    lifecycle::{Lifecycle, LifecycleOptions},
    lock::LockPolicy,
    registry::{DEFAULT_INDEX_URL, IndexRegistry},
    runtime::Runtime,
};

pub const INDEX_URL_ENV: &str = "MIP_INDEX_URL";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub type CliLifecycle<R> = Lifecycle<R, HttpFetcher, IndexRegistry>;

pub struct Config<R: Runtime + 'static> {
    pub runtime: Arc<R>,
    pub root: PathBuf,
    pub index_url: String,
    pub http_client: HttpClient,
    pub options: LifecycleOptions,
}

impl<R: Runtime + 'static> Config<R> {
    pub fn new(
        runtime: R,
        root: Option<PathBuf>,
        index_url: Option<String>,
        lock_policy: LockPolicy,
    ) -> Result<Self> {
        let root = resolve_root(&runtime, root)?;
        let index_url = index_url
            .or_else(|| runtime.env_var(INDEX_URL_ENV).ok())
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_INDEX_URL.to_string());
        debug!("Using mip root {:?} and index {}", root, index_url);

        let client = Client::builder()
            .user_agent("mip-cli")
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            runtime: Arc::new(runtime),
            root,
            index_url,
            http_client: HttpClient::new(client),
            options: LifecycleOptions {
                lock_policy,
                ..LifecycleOptions::default()
            },
        })
    }

    pub fn package_root(&self) -> PathBuf {
        package_root(&self.root)
    }

    pub fn namespace_root(&self) -> PathBuf {
        namespace_root(&self.root)
    }

    pub fn lock_root(&self) -> PathBuf {
        lock_root(&self.root)
    }

    /// Lifecycle wired to the remote index and the HTTP fetcher.
    pub fn lifecycle(&self) -> CliLifecycle<R> {
        Lifecycle::new(
            Arc::clone(&self.runtime),
            HttpFetcher::new(self.http_client.clone()),
            IndexRegistry::new(self.http_client.clone(), self.index_url.clone()),
            self.package_root(),
            self.namespace_root(),
            self.lock_root(),
            self.options,
        )
    }
}

/// Lock policy from the `--no-wait` and `--lock-timeout` flags.
pub fn lock_policy(no_wait: bool, lock_timeout_secs: u64) -> LockPolicy {
    if no_wait {
        LockPolicy::FailFast
    } else {
        LockPolicy::Wait(Duration::from_secs(lock_timeout_secs))
    }
}
