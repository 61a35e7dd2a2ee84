//! Previously published artifacts, fetched back from the live site.

use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use url::Url;

use crate::clock::Clock;
use crate::error::RecipeError;
use crate::formats::{IndexRecord, PublishedIndex};
use crate::naming::OutputTable;
use crate::recipe::RecipeSpec;

pub const INDEX_FILENAME: &str = "index.json";

const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

pub trait CacheSource {
    fn fetch_index(&self, timeout: Duration) -> anyhow::Result<PublishedIndex>;

    /// Best-effort HEAD for `file`.
    fn probe(&self, file: &str, timeout: Duration) -> anyhow::Result<()>;

    /// Downloads `file` into `dest_dir` under the same name.
    fn download(&self, file: &str, dest_dir: &Path, timeout: Duration) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct HttpCacheSource {
    client: reqwest::blocking::Client,
    site: Url,
}

impl HttpCacheSource {
    pub fn new(site: &str) -> anyhow::Result<Self> {
        let site = if site.ends_with('/') {
            site.to_owned()
        } else {
            format!("{site}/")
        };
        let site = Url::parse(&site).with_context(|| format!("parse publish site: {site}"))?;
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("presspack/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self { client, site })
    }

    fn url_of(&self, file: &str) -> anyhow::Result<Url> {
        self.site
            .join(file)
            .with_context(|| format!("join url: {} + {file}", self.site))
    }
}

impl CacheSource for HttpCacheSource {
    fn fetch_index(&self, timeout: Duration) -> anyhow::Result<PublishedIndex> {
        let url = self.url_of(INDEX_FILENAME)?;
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        response
            .json::<PublishedIndex>()
            .with_context(|| format!("parse {url}"))
    }

    fn probe(&self, file: &str, timeout: Duration) -> anyhow::Result<()> {
        let url = self.url_of(file)?;
        self.client
            .head(url.clone())
            .timeout(timeout)
            .send()
            .with_context(|| format!("HEAD {url}"))?
            .error_for_status()
            .with_context(|| format!("HEAD {url}"))?;
        Ok(())
    }

    fn download(&self, file: &str, dest_dir: &Path, timeout: Duration) -> anyhow::Result<()> {
        let url = self.url_of(file)?;
        let mut response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;

        std::fs::create_dir_all(dest_dir)
            .with_context(|| format!("create dir: {}", dest_dir.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dest_dir)
            .with_context(|| format!("create temp file in {}", dest_dir.display()))?;
        response
            .copy_to(&mut tmp)
            .with_context(|| format!("read body: {url}"))?;
        let dest = dest_dir.join(file);
        tmp.persist(&dest)
            .with_context(|| format!("persist download: {}", dest.display()))?;
        Ok(())
    }
}

/// Timeouts and retries for talking to the live site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachePolicy {
    pub index_timeout: Duration,
    pub index_retries: u32,
    pub file_timeout: Duration,
    pub retry_wait: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            index_timeout: Duration::from_secs(15),
            index_retries: 1,
            file_timeout: Duration::from_secs(30),
            retry_wait: Duration::from_secs(2),
        }
    }
}

/// Fetches the published index; an unreachable site yields an empty index.
pub fn load_index(source: &dyn CacheSource, clock: &dyn Clock, policy: &CachePolicy) -> PublishedIndex {
    let mut timeout = policy.index_timeout;
    for attempt in 0..=policy.index_retries {
        match source.fetch_index(timeout) {
            Ok(index) => {
                tracing::info!(recipes = index.recipes.len(), "loaded cached index");
                return index;
            }
            Err(err) if attempt < policy.index_retries => {
                tracing::warn!(
                    attempt,
                    ?err,
                    wait_secs = policy.retry_wait.as_secs(),
                    "fetch cached index failed; retrying"
                );
                timeout += policy.index_timeout;
                clock.sleep(policy.retry_wait);
            }
            Err(err) => {
                tracing::error!(?err, "fetch cached index failed; continuing without cache");
            }
        }
    }
    PublishedIndex::default()
}

/// Downloads the cached files of `recipe` (source and target formats only).
///
/// Returns the names that were downloaded. Only a source-format failure is an
/// error; target formats are regenerated later when missing.
pub fn download_recipe(
    source: &dyn CacheSource,
    clock: &dyn Clock,
    policy: &CachePolicy,
    recipe: &RecipeSpec,
    records: &[IndexRecord],
    outputs: &mut OutputTable,
) -> Result<Vec<String>, RecipeError> {
    let mut downloaded = Vec::new();
    for record in records {
        let file = record.filename.as_str();
        if file.contains(['/', '\\']) {
            tracing::warn!(file, "ignoring cached file outside the publish dir");
            continue;
        }
        let Some((_, ext)) = file.rsplit_once('.') else {
            continue;
        };
        if !recipe.formats().any(|format| format == ext) {
            continue;
        }

        if let Err(err) = source.probe(file, HEAD_TIMEOUT) {
            tracing::warn!(file, ?err, "HEAD cached file failed");
            clock.sleep(policy.retry_wait);
        }

        let mut timeout = policy.file_timeout;
        let mut fetched = false;
        for attempt in 0..=recipe.retry_attempts {
            tracing::debug!(file, attempt, timeout_secs = timeout.as_secs(), "download cached file");
            match source.download(file, outputs.dir(), timeout) {
                Ok(()) => {
                    fetched = true;
                    break;
                }
                Err(err) if attempt < recipe.retry_attempts => {
                    tracing::warn!(
                        file,
                        attempt,
                        ?err,
                        wait_secs = policy.retry_wait.as_secs(),
                        "download cached file failed; retrying"
                    );
                    timeout += policy.file_timeout;
                    clock.sleep(policy.retry_wait);
                }
                Err(err) => {
                    tracing::error!(file, ?err, "download cached file failed");
                }
            }
        }

        if fetched {
            outputs.insert(file);
            downloaded.push(file.to_owned());
        } else if ext == recipe.src_ext {
            return Err(RecipeError::CacheFetchTimeout {
                file: file.to_owned(),
            });
        }
    }
    Ok(downloaded)
}
