//! Output file naming and the lookup table of files already in the publish
//! directory.
//!
//! A recipe with slug `wsj` and format `epub` owns exactly two name shapes:
//! `wsj.epub` (fresh converter output) and `wsj-YYYY-MM-DD.epub` (canonical,
//! date-stamped). `wsj-print.epub` therefore belongs to `wsj-print`, never to
//! `wsj`. When several files match, the lexicographically last name wins;
//! since `-` sorts before `.`, a fresh `wsj.epub` beats any stale dated copy.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};

pub fn canonical_name(slug: &str, ext: &str, published: DateTime<Utc>) -> String {
    format!("{slug}-{}.{ext}", published.format("%Y-%m-%d"))
}

/// Name the converter writes to before the file is renamed.
pub fn fresh_name(slug: &str, ext: &str) -> String {
    format!("{slug}.{ext}")
}

/// Splits `slug[-YYYY-MM-DD].ext` into `(slug, ext)`.
pub fn parse_output_name(file_name: &str) -> Option<(&str, &str)> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    let slug = strip_date_suffix(stem).unwrap_or(stem);
    if slug.is_empty() {
        return None;
    }
    Some((slug, ext))
}

fn strip_date_suffix(stem: &str) -> Option<&str> {
    const SUFFIX_LEN: usize = "-YYYY-MM-DD".len();
    if stem.len() <= SUFFIX_LEN || !stem.is_char_boundary(stem.len() - SUFFIX_LEN) {
        return None;
    }
    let (slug, suffix) = stem.split_at(stem.len() - SUFFIX_LEN);
    let bytes = suffix.as_bytes();
    let is_date = bytes.iter().enumerate().all(|(i, b)| match i {
        0 | 5 | 8 => *b == b'-',
        _ => b.is_ascii_digit(),
    });
    is_date.then_some(slug)
}

/// Slug-keyed view of the outputs present in one directory.
///
/// Built once from a directory listing and then kept in sync as the run
/// produces, downloads, renames or discards files.
#[derive(Debug, Clone, Default)]
pub struct OutputTable {
    dir: PathBuf,
    entries: HashMap<(String, String), BTreeSet<String>>,
}

impl OutputTable {
    pub fn scan(dir: &Path) -> anyhow::Result<Self> {
        let mut table = Self {
            dir: dir.to_path_buf(),
            entries: HashMap::new(),
        };
        let read_dir = match std::fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(table),
            Err(err) => {
                return Err(err).with_context(|| format!("list outputs: {}", dir.display()));
            }
        };
        for entry in read_dir {
            let entry = entry.with_context(|| format!("list outputs: {}", dir.display()))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                table.insert(name);
            }
        }
        Ok(table)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Records a file that now exists in the directory.
    pub fn insert(&mut self, file_name: &str) {
        if let Some((slug, ext)) = parse_output_name(file_name) {
            self.entries
                .entry((slug.to_owned(), ext.to_owned()))
                .or_default()
                .insert(file_name.to_owned());
        }
    }

    /// Forgets a file that was removed or renamed away.
    pub fn remove(&mut self, file_name: &str) {
        if let Some((slug, ext)) = parse_output_name(file_name) {
            let key = (slug.to_owned(), ext.to_owned());
            if let Some(names) = self.entries.get_mut(&key) {
                names.remove(file_name);
                if names.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// Re-checks a single expected file on disk and updates the table.
    pub fn refresh(&mut self, file_name: &str) -> bool {
        if self.path_of(file_name).is_file() {
            self.insert(file_name);
            true
        } else {
            self.remove(file_name);
            false
        }
    }

    pub fn exists(&self, slug: &str, ext: &str) -> bool {
        self.winner(slug, ext).is_some()
    }

    /// The lexicographically last matching name.
    pub fn winner(&self, slug: &str, ext: &str) -> Option<&str> {
        self.entries
            .get(&(slug.to_owned(), ext.to_owned()))
            .and_then(|names| names.iter().next_back())
            .map(String::as_str)
    }

    /// Renames `from` to `to` inside the directory. Renaming a file onto its
    /// own name does nothing.
    pub fn rename(&mut self, from: &str, to: &str) -> anyhow::Result<()> {
        rename_output(&self.dir, from, to)?;
        if from != to {
            self.remove(from);
            self.insert(to);
        }
        Ok(())
    }

    /// Deletes a (possibly partial) file and forgets it.
    pub fn discard(&mut self, file_name: &str) {
        let path = self.path_of(file_name);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "discarded output"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(path = %path.display(), ?err, "discard output failed"),
        }
        self.remove(file_name);
    }
}

/// Atomic same-directory rename; a no-op when the names are equal.
pub fn rename_output(dir: &Path, from: &str, to: &str) -> anyhow::Result<()> {
    if from == to {
        return Ok(());
    }
    let from_path = dir.join(from);
    let to_path = dir.join(to);
    std::fs::rename(&from_path, &to_path).with_context(|| {
        format!(
            "rename output: {} -> {}",
            from_path.display(),
            to_path.display()
        )
    })?;
    tracing::debug!(from, to, "renamed output");
    Ok(())
}

/// Filesystem-safe slug for category names; keeps unicode word characters.
pub fn slugify(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_lowercase();

    let mut out = String::with_capacity(cleaned.len());
    let mut pending_dash = false;
    for c in cleaned.chars() {
        if c == '-' || c.is_whitespace() {
            pending_dash = true;
            continue;
        }
        if pending_dash && !out.is_empty() {
            out.push('-');
        }
        pending_dash = false;
        out.push(c);
    }
    out
}
