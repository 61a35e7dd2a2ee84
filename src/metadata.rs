//! Artifact metadata through the external metadata tool.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use anyhow::Context as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::RecipeError;
use crate::markup::{linkify, xml_escape};

/// Fields written back into a freshly generated artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataUpdate {
    pub cover: Option<PathBuf>,
    pub series: String,
    pub series_index: u32,
    pub publisher: String,
}

impl MetadataUpdate {
    pub fn args(&self, path: &Path) -> Vec<String> {
        let mut args = vec![path.display().to_string()];
        if let Some(cover) = &self.cover {
            args.push(format!("--cover={}", cover.display()));
        }
        args.push(format!("--series={}", self.series));
        args.push(format!("--index={}", self.series_index));
        args.push(format!("--publisher={}", self.publisher));
        args
    }
}

pub trait MetadataReader {
    /// Raw textual metadata listing for the artifact.
    fn read(&self, path: &Path) -> anyhow::Result<String>;

    fn write(&self, path: &Path, update: &MetadataUpdate) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct EbookMetaTool {
    pub bin: String,
}

impl MetadataReader for EbookMetaTool {
    fn read(&self, path: &Path) -> anyhow::Result<String> {
        let output = Command::new(&self.bin)
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .with_context(|| format!("spawn metadata tool: {}", self.bin))?;
        if !output.status.success() {
            anyhow::bail!("metadata tool failed ({})", output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn write(&self, path: &Path, update: &MetadataUpdate) -> anyhow::Result<()> {
        tracing::debug!(path = %path.display(), cover = ?update.cover, "write metadata");
        let status = Command::new(&self.bin)
            .args(update.args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("spawn metadata tool: {}", self.bin))?;
        if !status.success() {
            anyhow::bail!("metadata tool failed ({status})");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactMetadata {
    pub title: String,
    pub published: DateTime<Utc>,
    /// HTML fragment; empty when the artifact has no comments.
    pub description: String,
}

impl ArtifactMetadata {
    pub fn defaults(now: DateTime<Utc>) -> Self {
        Self {
            title: String::new(),
            published: now,
            description: String::new(),
        }
    }
}

static PUBLISHED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Published\s+:\s(?P<pub_date>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})")
        .expect("valid published regex")
});
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Title\s+:\s(?P<title>.+)").expect("valid title regex"));
static COMMENTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Comments\s+:\s(?P<comments>.+)").expect("valid comments regex")
});

/// Reads metadata for `path`. A tool failure is logged and yields defaults.
pub fn extract(reader: &dyn MetadataReader, path: &Path, now: DateTime<Utc>) -> ArtifactMetadata {
    match reader.read(path) {
        Ok(text) => parse_metadata(&text, now),
        Err(err) => {
            let err = RecipeError::MetadataParse(err);
            tracing::warn!(path = %path.display(), error = %err, "using default metadata");
            ArtifactMetadata::defaults(now)
        }
    }
}

pub fn parse_metadata(text: &str, now: DateTime<Utc>) -> ArtifactMetadata {
    let published = PUBLISHED_RE
        .captures(text)
        .and_then(|caps| NaiveDateTime::parse_from_str(&caps["pub_date"], "%Y-%m-%dT%H:%M:%S").ok())
        .map(|naive| naive.and_utc())
        .unwrap_or(now);
    let title = TITLE_RE
        .captures(text)
        .map(|caps| caps["title"].trim().to_owned())
        .unwrap_or_default();
    let description = COMMENTS_RE
        .captures(text)
        .map(|caps| build_description(&caps["comments"]))
        .unwrap_or_default();

    ArtifactMetadata {
        title,
        published,
        description,
    }
}

/// First comment line, interior lines as a list, last line with links.
pub fn build_description(comments: &str) -> String {
    let lines: Vec<String> = comments
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(xml_escape)
        .collect();

    match lines.as_slice() {
        [] => String::new(),
        [only] => linkify(only),
        [first, interior @ .., last] => {
            let mut out = first.clone();
            if !interior.is_empty() {
                out.push_str("\n<ul><li>");
                out.push_str(&interior.join("</li><li>"));
                out.push_str("</li></ul>");
            }
            out.push('\n');
            out.push_str(&linkify(last));
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    const LISTING: &str = "Title               : The Economist: 4 May 2024
Author(s)           : The Economist
Publisher           : calibre
Published           : 2024-05-04T06:30:00+00:00
Language            : English
Comments            : 3 sections, 48 articles
Leaders: The world this week
Briefing: Cities & climate
Read online at https://www.economist.com/weeklyedition.
";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 5, 0, 0, 0).unwrap()
    }

    #[test]
    fn parses_title_date_and_description() {
        let meta = parse_metadata(LISTING, now());
        assert_eq!(meta.title, "The Economist: 4 May 2024");
        assert_eq!(
            meta.published,
            Utc.with_ymd_and_hms(2024, 5, 4, 6, 30, 0).unwrap()
        );
        assert_eq!(
            meta.description,
            "3 sections, 48 articles\n<ul><li>Leaders: The world this week</li><li>Briefing: Cities &amp; climate</li></ul>\nRead online at <a href=\"https://www.economist.com/weeklyedition\" rel=\"noreferrer nofollow noopener\" target=\"_blank\">https://www.economist.com/weeklyedition</a>."
        );
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let meta = parse_metadata("Author(s) : Nobody\n", now());
        assert_eq!(meta, ArtifactMetadata::defaults(now()));
    }

    #[test]
    fn two_line_comments_skip_the_list() {
        assert_eq!(build_description("first\nsecond"), "first\nsecond");
        assert_eq!(build_description("  \n"), "");
    }

    struct FailingReader;

    impl MetadataReader for FailingReader {
        fn read(&self, _path: &Path) -> anyhow::Result<String> {
            anyhow::bail!("not installed")
        }

        fn write(&self, _path: &Path, _update: &MetadataUpdate) -> anyhow::Result<()> {
            anyhow::bail!("not installed")
        }
    }

    #[test]
    fn extract_uses_defaults_when_tool_fails() {
        let meta = extract(&FailingReader, Path::new("x.epub"), now());
        assert_eq!(meta, ArtifactMetadata::defaults(now()));
    }

    #[test]
    fn update_args_put_cover_first() {
        let update = MetadataUpdate {
            cover: Some(PathBuf::from("cover.png")),
            series: "Economist".to_owned(),
            series_index: 2_024_125,
            publisher: "https://example.com/".to_owned(),
        };
        assert_eq!(
            update.args(Path::new("public/economist.mobi")),
            vec![
                "public/economist.mobi",
                "--cover=cover.png",
                "--series=Economist",
                "--index=2024125",
                "--publisher=https://example.com/",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn ebook_meta_tool_reads_stdout() -> anyhow::Result<()> {
        let tool = EbookMetaTool {
            bin: "echo".to_owned(),
        };
        let text = tool.read(Path::new("Title : Sample"))?;
        assert_eq!(parse_metadata(&text, now()).title, "Sample");
        Ok(())
    }
}
