//! Command-line parsing.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

pub const USAGE: &str = "\
Usage: mailsift-app [--config PATH] [--print-rules] (--urls-file PATH | URL...)

Options:
  --config PATH      Read configuration from PATH instead of the default location
  --urls-file PATH   Read URLs from PATH, one per line ('#' starts a comment)
  --print-rules      Print the active email filter rules as JSON and exit
  -h, --help         Show this help
";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub urls_file: Option<PathBuf>,
    pub print_rules: bool,
    pub urls: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Run(CliArgs),
}

pub fn parse_args(args: Vec<String>) -> Result<Command> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--print-rules" => parsed.print_rules = true,
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--urls-file" => {
                let path = args.next().context("--urls-file needs a path")?;
                parsed.urls_file = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n\n{USAGE}"),
            url => parsed.urls.push(url.to_string()),
        }
    }

    if !parsed.print_rules && parsed.urls.is_empty() && parsed.urls_file.is_none() {
        bail!("no URLs given\n\n{USAGE}");
    }
    Ok(Command::Run(parsed))
}

/// Read a URL list, skipping blank lines and `#` comments.
pub fn read_urls_file(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read URL list {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
