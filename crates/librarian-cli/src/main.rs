mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, WorkerCommand};
use dotenv::dotenv;
use librarian_core::classifier::{detect_mime, Classifier, KnowledgeCache};
use librarian_core::document::{
    inspect, is_pdf_candidate, repair, DocumentValidator, Isolation, ProbeReply, TextReply,
    TextSampler,
};
use librarian_core::storage::{Database, INDEX_FILE_NAME};
use librarian_core::{AppConfig, IssueSummary, LibraryEngine, RunSummary};
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let args = Cli::parse();

    // Workers answer on stdout and must stay quiet otherwise.
    if let Some(Commands::Worker(worker)) = &args.command {
        return ExitCode::from(run_worker(worker));
    }

    dotenv().ok();

    let _guard = logging::init_logger();

    let mut config = match librarian_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            return ExitCode::FAILURE;
        }
    };
    if config.documents.worker_program.is_none() {
        match std::env::current_exe() {
            Ok(exe) => config.documents.worker_program = Some(exe.to_string_lossy().into_owned()),
            Err(e) => warn!("Cannot locate own executable, validating in-process: {}", e),
        }
    }

    let result = match args.command {
        Some(Commands::Build { json }) => run_build(&config, json),
        Some(Commands::Scan) => run_scan(&config),
        Some(Commands::CheckPdf { path }) => run_check_pdf(&config, &path),
        Some(Commands::Classify { path }) => run_classify(&config, &path),
        Some(Commands::Stats) => run_stats(&config),
        Some(Commands::PrintConfig) => toml::to_string_pretty(&config)
            .map(|text| println!("{}", text))
            .map_err(Into::into),
        Some(Commands::ResetIndex) => run_reset_index(&config),
        Some(Commands::Worker(_)) => Ok(()),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn print_reply(reply: serde_json::Result<String>, failed: bool) -> u8 {
    match reply {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    }
    if failed {
        2
    } else {
        0
    }
}

fn run_worker(command: &WorkerCommand) -> u8 {
    match command {
        WorkerCommand::Probe { path, max_pages } => {
            let reply = ProbeReply::from_result(inspect::probe_pdf(path, *max_pages));
            print_reply(serde_json::to_string(&reply), reply.error.is_some())
        }
        WorkerCommand::Text { path, max_pages } => {
            let reply = TextReply::from_result(inspect::extract_text_sample(path, *max_pages));
            print_reply(serde_json::to_string(&reply), reply.error.is_some())
        }
        WorkerCommand::Resave { input, output } => match repair::resave(input, output) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("{}", e);
                2
            }
        },
    }
}

fn run_build(config: &AppConfig, json: bool) -> anyhow::Result<()> {
    let mut engine = LibraryEngine::new(config.clone());
    let reporter = CliReporter::new();
    let summary = engine.build(&reporter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    info!(
        "Scan: {}, Validate: {}, Analyse: {}, Copy: {}",
        format!("{:.2}s", summary.scan_secs).green(),
        format!("{:.2}s", summary.validation_secs).green(),
        format!("{:.2}s", summary.analysis_secs).green(),
        format!("{:.2}s", summary.copy_secs).green(),
    );
    info!(
        "{} files scanned, {} unique, {} duplicates superseded",
        format!("{}", summary.files_scanned).cyan(),
        format!("{}", summary.unique_files).cyan(),
        format!("{}", summary.superseded).yellow(),
    );
    info!(
        "{} documents validated, {} repaired, {} degraded",
        format!("{}", summary.documents_validated).cyan(),
        format!("{}", summary.documents_repaired).green(),
        format!("{}", summary.documents_degraded).red(),
    );
    info!(
        "{} copied into the library, {} failed",
        format!("{}", summary.copied).green(),
        format!("{}", summary.failed).red(),
    );
    print_issues(&summary.issues);
}

fn print_issues(issues: &IssueSummary) {
    for (kind, count) in &issues.counts {
        println!("  {:<24} {}", kind.to_string().yellow(), count);
        if let Some(samples) = issues.samples.get(kind) {
            for (path, cause) in samples.iter().take(3) {
                println!("      {} {}", path.dimmed(), cause);
            }
        }
    }
}

fn run_scan(config: &AppConfig) -> anyhow::Result<()> {
    let mut engine = LibraryEngine::new(config.clone());
    let reporter = CliReporter::new();
    let outcome = engine.scan(&reporter)?;
    info!(
        "{} files ({} bytes) staged to {}, {} skipped",
        format!("{}", outcome.files_staged).cyan(),
        outcome.bytes_staged,
        outcome.staging_path.display(),
        format!("{}", outcome.skipped).yellow(),
    );
    print_issues(&outcome.issues);
    Ok(())
}

fn run_check_pdf(config: &AppConfig, path: &Path) -> anyhow::Result<()> {
    if !path.is_file() {
        bail!("{} is not a file", path.display());
    }
    let validator = DocumentValidator::new(config, Isolation::from_config(&config.documents));
    let outcome = validator.validate(path);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    for issue in &outcome.issues {
        println!("  {} {}", issue.kind.to_string().yellow(), issue.cause);
    }
    Ok(())
}

fn run_classify(config: &AppConfig, path: &Path) -> anyhow::Result<()> {
    let cache = match &config.knowledge_db {
        Some(db) => KnowledgeCache::load(Path::new(db)),
        None => KnowledgeCache::empty(),
    };
    let isolation = Isolation::from_config(&config.documents);
    let sampler = TextSampler::new(
        isolation.clone(),
        Duration::from_secs(config.documents.timeout_secs.max(1)),
        config.documents.max_text_pages,
    );
    let classifier = Classifier::new(Arc::new(cache), &config.classifier, sampler);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("path has no file name")?;
    let mime = detect_mime(path);

    // Only a document that validates may have its text read.
    let document =
        is_pdf_candidate(path).then(|| DocumentValidator::new(config, isolation).validate(path));
    let text_source = document
        .as_ref()
        .filter(|d| d.is_valid())
        .map(|d| d.accepted_path(path));
    let result = classifier.classify_document(&name, path, &mime, text_source);

    println!("{} {}", "MIME:".bold(), mime);
    println!("{} {}", "Tier:".bold(), result.tier.unwrap_or("fallback"));
    println!("{}", serde_json::to_string_pretty(&result.classification)?);
    for issue in &result.issues {
        println!("  {} {}", issue.kind.to_string().yellow(), issue.cause);
    }
    Ok(())
}

fn run_stats(config: &AppConfig) -> anyhow::Result<()> {
    let index = config.library_path().join(INDEX_FILE_NAME);
    if !index.is_file() {
        bail!("no index at {}; run `librarian build` first", index.display());
    }
    let db = Database::open(&index)?;
    info!("{} files indexed", format!("{}", db.count_files()?).cyan());
    for (system, count) in db.system_counts()? {
        println!("  {:<40} {}", system, count);
    }
    Ok(())
}

fn run_reset_index(config: &AppConfig) -> anyhow::Result<()> {
    let index = config.library_path().join(INDEX_FILE_NAME);
    if !index.is_file() {
        println!("No index at {}", index.display());
        return Ok(());
    }
    if !prompt_confirm(
        "Are you SURE you want to delete the library index? Copied files are kept.",
        Some(false),
    )? {
        return Ok(());
    }
    Database::open(&index)?.reset()?;
    println!("Index cleared");
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
