//! jit-harness
//!
//! Runs a directory of directive-annotated tests against a subject runtime
//! and prints a report. Exit status: bit 0 for failing tests, bit 1 for
//! configuration errors, 4 when the harness itself could not start.

use clap::Parser;
use jit_harness::report::EXIT_FATAL;
use jit_harness::{
    BatchReport, Classification, Cli, Harness, HarnessConfig, HarnessError, HarnessResult,
    ReportFormat,
};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("JIT_HARNESS_LOG")
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_FATAL as u8)
        }
    }
}

fn run(cli: &Cli) -> HarnessResult<i32> {
    let base = match &cli.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    let config = cli.apply(base);
    let harness = Harness::new(config)?;

    if let Err(e) = harness.cancellation_token().cancel_on_ctrl_c() {
        error!(error = %e, "interrupt handling unavailable");
    }

    let report = harness.run(&cli.root, |outcome| {
        if outcome.classification != Classification::Pass {
            info!(
                test = %outcome.test,
                classification = %outcome.classification,
                reason = %outcome.reason(),
                "finished"
            );
        }
    })?;

    emit(cli, &report)?;
    Ok(report.exit_code())
}

fn emit(cli: &Cli, report: &BatchReport) -> HarnessResult<()> {
    let rendered = match cli.format {
        ReportFormat::Text => report.detailed_summary(),
        ReportFormat::Json => report.to_json()?,
    };
    match &cli.output {
        Some(path) => {
            std::fs::write(path, rendered + "\n").map_err(|e| HarnessError::io(path, e))?;
            println!("{}", report.summary());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
