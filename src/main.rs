//! procrunner - command-line entry point

use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, error, info};

use procrunner::cli::{Cli, Commands};
use procrunner::report::{self, Summary};
use procrunner::{ProcedureEngine, ProcedureFile, StepRegistry};

/// Initialize the logger with appropriate settings
fn init_logger(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "info" };
    // RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn run_procedure(file: &Path, output: Option<&Path>, quiet: bool) -> Result<bool> {
    let definition = ProcedureFile::load_from_file(file)?;
    info!("Running procedure '{}' from {:?}", definition.name, file);

    let engine = ProcedureEngine::new(StepRegistry::with_builtins());
    let report = engine.run(&definition.procedure);

    if !quiet {
        print!("{}", report::render_tree(&report.result));
    }
    println!("{}", Summary::from_result(&report.result));

    if let Some(output) = output {
        report::write_json(output, &report)
            .with_context(|| format!("Failed to write report to {output:?}"))?;
        info!("Report saved to {:?}", output);
    }

    Ok(report.passed())
}

fn validate(file: &Path) -> Result<()> {
    let definition = ProcedureFile::load_from_file(file)?;
    definition.validate(&StepRegistry::with_builtins())?;
    Ok(())
}

fn list_steps() {
    let registry = StepRegistry::with_builtins();
    for (name, kind) in registry.names() {
        println!("{name:<12} {kind}");
    }
}

/// Main application entry point
fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    debug!("CLI arguments parsed");

    match cli.command {
        Commands::Run {
            file,
            output,
            quiet,
        } => match run_procedure(&file, output.as_deref(), quiet) {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::FAILURE,
            Err(e) => {
                error!("Procedure run failed: {:#}", e);
                eprintln!("✗ {:#}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Validate { file } => match validate(&file) {
            Ok(()) => {
                info!("Procedure validation successful");
                println!("✓ Procedure definition is valid: {:?}", file);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Procedure validation failed: {:#}", e);
                eprintln!("✗ Procedure validation failed: {:#}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Steps => {
            list_steps();
            ExitCode::SUCCESS
        }
    }
}
