use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "librarian")]
#[command(about = "Organise a TTRPG file collection into a deduplicated library", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan, validate, classify, deduplicate and copy into the library
    Build {
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Scan source paths into the staging file only
    Scan,
    /// Validate one PDF and run the repair cascade if needed
    CheckPdf { path: PathBuf },
    /// Show how one file would be classified
    Classify { path: PathBuf },
    /// List indexed files per game system
    Stats,
    /// Print configuration values
    PrintConfig,
    /// Delete the library index
    ResetIndex,
    #[command(hide = true, subcommand)]
    Worker(WorkerCommand),
}

/// Isolated helpers spawned by the validator. Reply on stdout.
#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    Probe {
        path: PathBuf,
        #[arg(long, default_value_t = 3)]
        max_pages: usize,
    },
    Text {
        path: PathBuf,
        #[arg(long, default_value_t = 3)]
        max_pages: usize,
    },
    Resave { input: PathBuf, output: PathBuf },
}
