use anyhow::{Context, Result};
use clap::Parser;
use strata_core::{BuildOutcome, BuildSummary, Builder, Cli, Config, LogLevel, Logger};

fn announce_build_file(logger: &Logger, cli: &Cli, path: &std::path::Path) {
    if cli.file.is_some() {
        logger.log(LogLevel::Info, &format!("Using build file: {}", path.display()));
    } else {
        logger.log(
            LogLevel::Info,
            &format!("No -f argument provided, using default: {}", path.display()),
        );
    }
}

fn report_failures(logger: &Logger, summary: &BuildSummary) {
    let failed: Vec<&str> = summary.failures().map(|o| o.name.as_str()).collect();
    if failed.is_empty() {
        return;
    }

    logger.log(
        LogLevel::Warning,
        &format!("{} command(s) failed: {}", failed.len(), failed.join(", ")),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir().context("Failed to determine working directory")?;
    let config = Config::load_from_dir(&cwd)?;
    let logger = Logger::from_config(&config.display);

    let build_file = config.build_file(&cli);
    announce_build_file(&logger, &cli, &build_file);

    let policy = config.execution.on_failure;
    let builder = Builder::from_file(&build_file, config)?.with_logger(logger.clone());

    let outcome = builder.run().await?;
    match &outcome {
        BuildOutcome::UpToDate => {
            logger.log(LogLevel::Info, "All files are up to date.");
        }
        BuildOutcome::Built(summary) => {
            report_failures(&logger, summary);
            outcome.ensure_success(policy)?;
            logger.log(LogLevel::Info, "Done.");
        }
    }

    Ok(())
}
