use std::process::ExitCode;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use taxonomy_reader::cli::{Cli, OutputFormat, VerbosityLevel};
use taxonomy_reader::config::ConfigManager;
use taxonomy_reader::engine::TaxonomyReader;
use taxonomy_reader::extractors::StandardExtractors;
use taxonomy_reader::output::{Output, RunSummary};

/// Run completed with recorded errors
const EXIT_ERRORS: u8 = 1;
/// Run could not complete
const EXIT_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(&cli);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_ERRORS),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.verbosity().log_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `Ok(true)` for a clean run
async fn run(cli: Cli) -> anyhow::Result<bool> {
    cli.validate().map_err(anyhow::Error::msg)?;

    let config = ConfigManager::load_config(&cli)
        .await
        .context("failed to load configuration")?;
    let format = OutputFormat::from(config.output.format);
    let verbosity = if config.output.quiet {
        VerbosityLevel::Quiet
    } else if cli.debug {
        VerbosityLevel::Debug
    } else if config.output.verbose {
        VerbosityLevel::Verbose
    } else {
        VerbosityLevel::Normal
    };

    let extractors = StandardExtractors::new();
    let reader = extractors.register(TaxonomyReader::new(config));

    let report = reader
        .read(&cli.entry)
        .await
        .with_context(|| format!("failed to read taxonomy {}", cli.entry))?;

    let summary = RunSummary::new(&cli.entry, &report, &extractors);
    let rendered = Output::new(verbosity, format).render(&summary)?;
    if !rendered.is_empty() {
        println!("{}", rendered.trim_end());
    }

    Ok(summary.is_clean())
}
