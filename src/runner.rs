//! Invocation of the external converter.
//!
//! The runner runs exactly one attempt per call and reports expiry as a
//! distinguishable error; retry and backoff belong to the orchestrator.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::time::Duration;

use serde::Deserialize;
use wait_timeout::ChildExt as _;

use crate::error::RunError;
use crate::naming::fresh_name;
use crate::recipe::RecipeSpec;

pub const TITLE_DATE_FORMAT_ENV: &str = "PRESSPACK_TITLE_DATE_FORMAT";
pub const DEBUG_DIR_ENV: &str = "PRESSPACK_DEBUG_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Success,
    Failure(Option<i32>),
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            Self::Success
        } else {
            Self::Failure(status.code())
        }
    }
}

/// Series information stamped into converted formats.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesInfo {
    pub series: String,
    pub index: u32,
    pub publisher: String,
}

pub trait Converter {
    /// Runs the recipe, writing `<publish_dir>/<slug>.<src_ext>`.
    fn run_recipe(&self, recipe: &RecipeSpec, timeout: Duration) -> Result<ProcessExit, RunError>;

    /// Converts an existing artifact into another format.
    fn convert(
        &self,
        recipe: &RecipeSpec,
        source: &Path,
        target: &Path,
        series: &SeriesInfo,
        timeout: Duration,
    ) -> Result<ProcessExit, RunError>;
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Per-recipe site credentials, keyed by slug.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accounts(BTreeMap<String, Credentials>);

impl Accounts {
    /// Parses the accounts JSON object; anything else is logged and ignored.
    pub fn parse(json: &str) -> Self {
        if json.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str::<BTreeMap<String, Credentials>>(json) {
            Ok(accounts) => Self(accounts),
            Err(err) => {
                tracing::error!(?err, "unable to parse accounts as a json object");
                Self::default()
            }
        }
    }

    pub fn get(&self, slug: &str) -> Option<&Credentials> {
        self.0
            .get(slug)
            .filter(|c| !c.username.is_empty() && !c.password.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct CommandConverter {
    pub bin: String,
    pub recipes_dir: PathBuf,
    pub publish_dir: PathBuf,
    pub static_dir: PathBuf,
    pub title_date_format: String,
    pub accounts: Accounts,
    pub verbose: bool,
}

impl CommandConverter {
    pub fn recipe_args(&self, recipe: &RecipeSpec) -> Vec<OsString> {
        let mut args = Vec::new();

        let definition = self.recipes_dir.join(format!("{}.recipe", recipe.recipe));
        if definition.is_file() {
            args.push(definition.into_os_string());
        } else {
            // Converter built-in recipe.
            args.push(OsString::from(format!("{}.recipe", recipe.recipe)));
        }
        args.push(
            self.publish_dir
                .join(fresh_name(&recipe.slug, &recipe.src_ext))
                .into_os_string(),
        );

        args.extend(recipe.conv_options_for(&recipe.src_ext).iter().map(OsString::from));
        if let Some(credentials) = self.accounts.get(&recipe.slug) {
            args.push(OsString::from(format!(
                "--username={}",
                credentials.username
            )));
            args.push(OsString::from(format!(
                "--password={}",
                credentials.password
            )));
        }
        self.push_tail_args(&mut args, &recipe.src_ext);
        args
    }

    pub fn convert_args(
        &self,
        recipe: &RecipeSpec,
        source: &Path,
        target: &Path,
        series: &SeriesInfo,
    ) -> Vec<OsString> {
        let mut args = vec![
            source.as_os_str().to_owned(),
            target.as_os_str().to_owned(),
            OsString::from(format!("--series={}", series.series)),
            OsString::from(format!("--series-index={}", series.index)),
            OsString::from(format!("--publisher={}", series.publisher)),
        ];
        let ext = target
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        args.extend(recipe.conv_options_for(ext).iter().map(OsString::from));
        self.push_tail_args(&mut args, ext);
        args
    }

    fn push_tail_args(&self, args: &mut Vec<OsString>, ext: &str) {
        let extra_css = self.static_dir.join(format!("{ext}.css"));
        if extra_css.is_file() {
            let mut arg = OsString::from("--extra-css=");
            arg.push(extra_css.as_os_str());
            args.push(arg);
        }
        if self.verbose {
            args.push(OsString::from("-vv"));
        }
    }

    fn command(&self, recipe: &RecipeSpec, args: &[OsString]) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args).env(
            TITLE_DATE_FORMAT_ENV,
            recipe.title_date_format(&self.title_date_format),
        );
        if self.verbose {
            cmd.env(DEBUG_DIR_ENV, &self.publish_dir);
        }
        cmd
    }
}

impl Converter for CommandConverter {
    fn run_recipe(&self, recipe: &RecipeSpec, timeout: Duration) -> Result<ProcessExit, RunError> {
        let args = self.recipe_args(recipe);
        tracing::info!(
            bin = %self.bin,
            recipe = %recipe.recipe,
            timeout_secs = timeout.as_secs(),
            "run recipe"
        );
        run_with_timeout(&mut self.command(recipe, &args), &self.bin, timeout)
    }

    fn convert(
        &self,
        recipe: &RecipeSpec,
        source: &Path,
        target: &Path,
        series: &SeriesInfo,
        timeout: Duration,
    ) -> Result<ProcessExit, RunError> {
        let args = self.convert_args(recipe, source, target, series);
        tracing::info!(
            bin = %self.bin,
            source = %source.display(),
            target = %target.display(),
            "convert format"
        );
        run_with_timeout(&mut self.command(recipe, &args), &self.bin, timeout)
    }
}

/// Spawns `cmd` and waits at most `timeout`; the child is killed on expiry.
pub fn run_with_timeout(
    cmd: &mut Command,
    program: &str,
    timeout: Duration,
) -> Result<ProcessExit, RunError> {
    let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
        program: program.to_owned(),
        source,
    })?;

    match child.wait_timeout(timeout) {
        Ok(Some(status)) => Ok(status.into()),
        Ok(None) => {
            stop(&mut child);
            Err(RunError::Expired {
                program: program.to_owned(),
                timeout,
            })
        }
        Err(source) => {
            stop(&mut child);
            Err(RunError::Wait {
                program: program.to_owned(),
                source,
            })
        }
    }
}

/// Kills and reaps the child so no zombie is left behind.
fn stop(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe() -> RecipeSpec {
        serde_yaml::from_str(
            "recipe: example\nslug: example-01\nsrc_ext: epub\ncategory: Examples\ntarget_ext: [pdf]\n",
        )
        .expect("valid recipe yaml")
    }

    fn converter(root: &Path) -> CommandConverter {
        CommandConverter {
            bin: "ebook-convert".to_owned(),
            recipes_dir: root.join("recipes"),
            publish_dir: root.join("public"),
            static_dir: root.join("static"),
            title_date_format: "%-d %b, %Y".to_owned(),
            accounts: Accounts::default(),
            verbose: false,
        }
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn recipe_args_use_local_definition_and_format_options() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        std::fs::create_dir_all(temp.path().join("recipes"))?;
        std::fs::create_dir_all(temp.path().join("static"))?;
        std::fs::write(temp.path().join("recipes/example.recipe"), "")?;
        std::fs::write(temp.path().join("static/epub.css"), "")?;

        let mut converter = converter(temp.path());
        converter.verbose = true;
        converter.accounts =
            Accounts::parse(r#"{"example-01": {"username": "u", "password": "p"}}"#);

        let args = strings(&converter.recipe_args(&recipe()));
        let root = temp.path().display();
        assert_eq!(
            args,
            vec![
                format!("{root}/recipes/example.recipe"),
                format!("{root}/public/example-01.epub"),
                "--output-profile=tablet".to_owned(),
                "--username=u".to_owned(),
                "--password=p".to_owned(),
                format!("--extra-css={root}/static/epub.css"),
                "-vv".to_owned(),
            ]
        );
        Ok(())
    }

    #[test]
    fn recipe_args_fall_back_to_builtin_recipe() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let args = strings(&converter(temp.path()).recipe_args(&recipe()));
        assert_eq!(args[0], "example.recipe");
        assert_eq!(args.len(), 3);
        Ok(())
    }

    #[test]
    fn convert_args_carry_series_and_target_options() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let converter = converter(temp.path());
        let series = SeriesInfo {
            series: "Example".to_owned(),
            index: 2_023_121,
            publisher: "https://example.com/".to_owned(),
        };
        let args = strings(&converter.convert_args(
            &recipe(),
            Path::new("public/example-01.epub"),
            Path::new("public/example-01.pdf"),
            &series,
        ));
        assert_eq!(
            args,
            vec![
                "public/example-01.epub",
                "public/example-01.pdf",
                "--series=Example",
                "--series-index=2023121",
                "--publisher=https://example.com/",
                "--pdf-page-numbers",
            ]
        );
        Ok(())
    }

    #[test]
    fn accounts_ignore_invalid_json() {
        assert_eq!(Accounts::parse("[1, 2]"), Accounts::default());
        assert_eq!(Accounts::parse(""), Accounts::default());
        let accounts = Accounts::parse(r#"{"wsj": {"username": "", "password": "p"}}"#);
        assert!(accounts.get("wsj").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn run_with_timeout_reports_expiry() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exec sleep 5"]);
        let err = run_with_timeout(&mut cmd, "sh", Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, RunError::Expired { .. }), "unexpected error: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn stop_kills_and_reaps_child() -> anyhow::Result<()> {
        let mut child = Command::new("sh").args(["-c", "exec sleep 5"]).spawn()?;
        stop(&mut child);
        let status = child.try_wait()?.expect("child already reaped");
        assert!(!status.success());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn run_with_timeout_reports_exit_code() -> anyhow::Result<()> {
        let mut ok = Command::new("sh");
        ok.args(["-c", "exit 0"]);
        assert_eq!(
            run_with_timeout(&mut ok, "sh", Duration::from_secs(5))?,
            ProcessExit::Success
        );

        let mut failing = Command::new("sh");
        failing.args(["-c", "exit 3"]);
        assert_eq!(
            run_with_timeout(&mut failing, "sh", Duration::from_secs(5))?,
            ProcessExit::Failure(Some(3))
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn run_with_timeout_passes_title_date_format() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let out = temp.path().join("env.txt");
        let mut converter = converter(temp.path());
        converter.bin = "sh".to_owned();
        let mut recipe = recipe();
        recipe.title_date_format = Some("%b %-d, %Y".to_owned());

        let script = format!(
            "printf '%s' \"${TITLE_DATE_FORMAT_ENV}\" > '{}'",
            out.display()
        );
        let mut cmd = converter.command(&recipe, &[OsString::from("-c"), OsString::from(script)]);
        run_with_timeout(&mut cmd, "sh", Duration::from_secs(5))?;
        assert_eq!(std::fs::read_to_string(&out)?, "%b %-d, %Y");
        Ok(())
    }
}
