use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn try_main() -> anyhow::Result<()> {
    let cli = presspack::cli::Cli::parse();
    presspack::logging::init(cli.verbose).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        presspack::cli::Command::Build(args) => {
            presspack::build::run(args, cli.verbose).context("build")?;
        }
        presspack::cli::Command::Enabled(args) => {
            presspack::build::enabled(args).context("enabled")?;
        }
    }

    Ok(())
}
