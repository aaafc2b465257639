use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// procrunner - run structured test and measurement procedures
#[derive(Parser)]
#[command(name = "procrunner")]
#[command(about = "Run test procedures defined as JSON step trees")]
#[command(version)]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a procedure definition file
    Run {
        /// Path to the procedure definition (JSON)
        file: PathBuf,

        /// Save the full run report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only print the summary line
        #[arg(short, long)]
        quiet: bool,
    },
    /// Validate a procedure definition file
    Validate {
        /// Path to the procedure definition to validate
        file: PathBuf,
    },
    /// List the available step types
    Steps,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
