//! Mailsift command-line shell
//!
//! Wires configuration, logging, the event stream and the extraction engine
//! together. Core logic lives in the `crates/` directory.

pub mod cli;

use anyhow::{Context, Result};
use cli::{parse_args, read_urls_file, CliArgs, Command, USAGE};
use mailsift_browser::{BrowserEngine, ProxyPool};
use mailsift_core::AppConfig;
use mailsift_scanner::{BatchOrchestrator, EventBus, FilterRules};
use std::sync::Arc;
use tracing::{info, warn};

/// Initialize tracing subscriber for logging
///
/// Logs go to stderr so stdout carries only event lines.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,mailsift=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(cli: &CliArgs) -> Result<AppConfig> {
    let config = match &cli.config {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => AppConfig::load_with_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn collect_urls(cli: &CliArgs) -> Result<Vec<String>> {
    let mut urls = cli.urls.clone();
    if let Some(path) = &cli.urls_file {
        urls.extend(read_urls_file(path)?);
    }
    Ok(urls)
}

pub async fn run(args: Vec<String>) -> Result<()> {
    let cli = match parse_args(args)? {
        Command::Help => {
            print!("{USAGE}");
            return Ok(());
        }
        Command::Run(cli) => cli,
    };

    init_tracing();
    info!("Starting Mailsift v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli).context("failed to load configuration")?;

    if cli.print_rules {
        println!("{}", serde_json::to_string_pretty(&FilterRules::standard())?);
        return Ok(());
    }

    let urls = collect_urls(&cli)?;
    let engine = BrowserEngine::new(config.browser.clone())
        .await
        .context("failed to launch browser")?;
    let proxies = Arc::new(ProxyPool::from_config(&config.proxy));
    info!("proxy pool: {:?}", proxies.stats());

    let (events, mut rx) = EventBus::channel();
    let orchestrator = Arc::new(
        BatchOrchestrator::from_config(Arc::new(engine), proxies, &config).with_events(events),
    );

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("failed to serialize event: {}", e),
            }
        }
    });

    let interrupt = tokio::spawn({
        let control = orchestrator.control();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after in-flight URLs");
                control.stop();
            }
        }
    });

    let outcome = orchestrator.run(urls).await;
    interrupt.abort();
    orchestrator.shutdown(config.browser.close_grace()).await;

    // Last sender goes away with the orchestrator, which ends the printer
    drop(orchestrator);
    if let Err(e) = printer.await {
        warn!("event printer failed: {}", e);
    }

    let summary = outcome?;
    info!(
        "done: {} emails from {} URLs ({} failed)",
        summary.emails.len(),
        summary.total_processed,
        summary.failed_urls.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scanning]\nmax_concurrency = 2").unwrap();

        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            urls: vec!["https://a.com".to_string()],
            ..CliArgs::default()
        };
        let config = load_config(&cli).unwrap();
        assert_eq!(config.scanning.max_concurrency, 2);
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scanning]\nmax_attempts = 0").unwrap();

        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            ..CliArgs::default()
        };
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn test_collect_urls_merges_sources() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "https://b.com").unwrap();

        let cli = CliArgs {
            urls: vec!["https://a.com".to_string()],
            urls_file: Some(file.path().to_path_buf()),
            ..CliArgs::default()
        };
        assert_eq!(collect_urls(&cli).unwrap(), vec!["https://a.com", "https://b.com"]);
    }
}
