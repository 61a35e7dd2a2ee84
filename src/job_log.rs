use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};

pub const JOB_LOG_FILENAME: &str = "job_log.json";

/// Recipe slug -> epoch seconds of its last successful generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobLog {
    entries: BTreeMap<String, f64>,
}

impl JobLog {
    pub fn path_in(meta_dir: &Path) -> PathBuf {
        meta_dir.join(JOB_LOG_FILENAME)
    }

    /// Loads the log; a missing or unreadable file starts an empty log.
    pub fn load_or_default(path: &Path) -> Self {
        match read_json::<BTreeMap<String, f64>>(path) {
            Ok(Some(entries)) => Self { entries },
            Ok(None) => {
                tracing::info!(path = %path.display(), "no job log yet");
                Self::default()
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), ?err, "unable to load job log");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        write_json_atomic(path, &self.entries).context("write job log")
    }

    pub fn last_run(&self, slug: &str) -> Option<DateTime<Utc>> {
        let secs = *self.entries.get(slug)?;
        if secs <= 0.0 {
            return None;
        }
        DateTime::from_timestamp_millis((secs * 1_000.0) as i64)
    }

    /// Records a generation. Entries never move backwards.
    pub fn record(&mut self, slug: &str, at: DateTime<Utc>) {
        let secs = at.timestamp_millis() as f64 / 1_000.0;
        let entry = self.entries.entry(slug.to_owned()).or_insert(secs);
        if secs > *entry {
            *entry = secs;
        }
    }
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

pub(crate) fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create parent dir: {}", parent.display()))?;
    }

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    std::fs::write(&tmp_path, &data)
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
