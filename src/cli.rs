use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::recipe::DEFAULT_TITLE_DATE_FORMAT;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Debug logging, converter debug output and `-vv` for converters.
    #[arg(short, long, global = true, env = "PRESSPACK_VERBOSE")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every recipe and publish the catalog.
    Build(BuildArgs),
    /// Print the slugs of recipes whose schedule is enabled now.
    Enabled(EnabledArgs),
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Site the catalog is published at; previous outputs are fetched from it.
    pub publish_site: String,

    /// Source repository URL linked from the page footer.
    pub source_url: String,

    /// Commit the site is built from.
    pub commit_hash: String,

    /// Recipe book (YAML).
    #[arg(long, env = "PRESSPACK_RECIPES", default_value = "recipes.yaml")]
    pub recipes: PathBuf,

    /// Directory with `<recipe>.recipe` definitions.
    #[arg(long, default_value = "recipes")]
    pub recipes_dir: PathBuf,

    /// Output directory for artifacts and the catalog.
    #[arg(long, default_value = "public")]
    pub publish_dir: PathBuf,

    /// Directory for the job log.
    #[arg(long, default_value = "meta")]
    pub meta_dir: PathBuf,

    /// Directory with `site.css`, `site.js` and per-format `<ext>.css`.
    #[arg(long, default_value = "static")]
    pub static_dir: PathBuf,

    /// Page template (default: built-in).
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Output path for the Markdown job summary.
    #[arg(long, default_value = "job_summary.md")]
    pub summary: PathBuf,

    /// Converter binary.
    #[arg(long, env = "PRESSPACK_CONVERTER", default_value = "ebook-convert")]
    pub converter: String,

    /// Metadata tool binary.
    #[arg(long, env = "PRESSPACK_META_TOOL", default_value = "ebook-meta")]
    pub meta_tool: String,

    /// Cover renderer command; covers are left as-is when unset.
    #[arg(long, env = "PRESSPACK_COVER_COMMAND")]
    pub cover_command: Option<String>,

    /// Recipe slugs to skip (comma-separated).
    #[arg(long, env = "PRESSPACK_SKIP", value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Only regenerate these recipe slugs (comma-separated).
    #[arg(long, env = "PRESSPACK_REGENERATE", value_delimiter = ',')]
    pub regenerate: Vec<String>,

    /// Date format for titles, passed to the converter.
    #[arg(long, env = "PRESSPACK_TITLE_DATE_FORMAT", default_value = DEFAULT_TITLE_DATE_FORMAT)]
    pub title_date_format: String,

    /// JSON object of slug -> {"username", "password"}.
    #[arg(long, env = "PRESSPACK_ACCOUNTS", hide_env_values = true)]
    pub accounts: Option<String>,

    /// Timeout for fetching the cached index.
    #[arg(long, default_value_t = 15)]
    pub index_timeout_secs: u64,

    /// Timeout for downloading one cached file.
    #[arg(long, default_value_t = 30)]
    pub cache_timeout_secs: u64,

    /// Wait between cache retries.
    #[arg(long, default_value_t = 2)]
    pub retry_wait_secs: u64,
}

#[derive(Debug, Args)]
pub struct EnabledArgs {
    /// Recipe book (YAML).
    #[arg(long, env = "PRESSPACK_RECIPES", default_value = "recipes.yaml")]
    pub recipes: PathBuf,

    /// Directory with the job log.
    #[arg(long, default_value = "meta")]
    pub meta_dir: PathBuf,
}

/// Trimmed, non-empty list items.
pub fn csv_set(values: &[String]) -> std::collections::BTreeSet<String> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use clap::Parser as _;

    use super::*;

    #[test]
    fn build_args_parse_lists_and_defaults() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "presspack",
            "build",
            "https://example.com/",
            "https://github.com/o/r",
            "abc1234",
            "--skip",
            "wsj, ,ft",
            "-v",
        ])?;
        assert!(cli.verbose);
        let Command::Build(args) = cli.command else {
            anyhow::bail!("expected build");
        };
        assert_eq!(
            csv_set(&args.skip).into_iter().collect::<Vec<_>>(),
            vec!["ft", "wsj"]
        );
        assert!(args.regenerate.is_empty());
        assert_eq!(args.publish_dir, PathBuf::from("public"));
        assert_eq!(args.title_date_format, "%-d %b, %Y");
        assert_eq!(args.index_timeout_secs, 15);
        Ok(())
    }
}
