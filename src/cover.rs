use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::Context as _;

use crate::recipe::CoverOptions;
use crate::runner::{ProcessExit, run_with_timeout};

const COVER_TIMEOUT: Duration = Duration::from_secs(60);

pub trait CoverRenderer {
    /// Renders a PNG cover for `title` at `out`.
    fn render(&self, out: &Path, title: &str, options: &CoverOptions) -> anyhow::Result<()>;
}

/// Delegates cover drawing to an external command.
#[derive(Debug, Clone)]
pub struct CommandCoverRenderer {
    pub bin: String,
}

impl CommandCoverRenderer {
    pub fn args(out: &Path, title: &str, options: &CoverOptions) -> Vec<String> {
        let mut args = vec![
            out.display().to_string(),
            title.to_owned(),
            "--width".to_owned(),
            options.cover_width.to_string(),
            "--height".to_owned(),
            options.cover_height.to_string(),
            "--text-colour".to_owned(),
            options.text_colour.clone(),
            "--background-colour".to_owned(),
            options.background_colour.clone(),
            "--title-font".to_owned(),
            options.title_font_path.clone(),
            "--title-font-size".to_owned(),
            options.title_font_size.to_string(),
            "--date-font".to_owned(),
            options.datestamp_font_path.clone(),
            "--date-font-size".to_owned(),
            options.datestamp_font_size.to_string(),
        ];
        if !options.logo_path_or_url.is_empty() {
            args.push("--logo".to_owned());
            args.push(options.logo_path_or_url.clone());
        }
        args
    }
}

impl CoverRenderer for CommandCoverRenderer {
    fn render(&self, out: &Path, title: &str, options: &CoverOptions) -> anyhow::Result<()> {
        tracing::debug!(bin = %self.bin, out = %out.display(), "render cover");
        let mut cmd = Command::new(&self.bin);
        cmd.args(Self::args(out, title, options))
            .stdin(Stdio::null());
        match run_with_timeout(&mut cmd, &self.bin, COVER_TIMEOUT)
            .with_context(|| format!("run cover command: {}", self.bin))?
        {
            ProcessExit::Success => {}
            ProcessExit::Failure(code) => {
                anyhow::bail!("cover command failed (exit {code:?})");
            }
        }
        if !out.is_file() {
            anyhow::bail!("cover command wrote no file: {}", out.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_include_logo_only_when_configured() {
        let options = CoverOptions::default();
        let args = CommandCoverRenderer::args(Path::new("cover.png"), "Sample", &options);
        assert_eq!(&args[..4], ["cover.png", "Sample", "--width", "889"]);
        assert!(!args.iter().any(|a| a == "--logo"));

        let options = CoverOptions {
            logo_path_or_url: "static/logo.png".to_owned(),
            ..CoverOptions::default()
        };
        let args = CommandCoverRenderer::args(Path::new("cover.png"), "Sample", &options);
        assert_eq!(&args[args.len() - 2..], ["--logo", "static/logo.png"]);
    }

    #[cfg(unix)]
    #[test]
    fn render_fails_when_command_writes_nothing() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let renderer = CommandCoverRenderer {
            bin: "true".to_owned(),
        };
        let out = temp.path().join("cover.png");
        let err = renderer
            .render(&out, "Sample", &CoverOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("wrote no file"), "{err:#}");
        Ok(())
    }
}
