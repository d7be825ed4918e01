//! `sbom-parsers`: print the dependency graph of a project.
//!
//! # Flow
//! 1. Parse CLI arguments ([`cli`]).
//! 2. Load config and apply flag overrides ([`sbom_parsers::config::load_config`]).
//! 3. Select parsers for the project ([`sbom_parsers::Orchestrator`]).
//! 4. Run every selected parser on the blocking pool.
//! 5. Render the requested report ([`report`]).
//! 6. Exit `0` when every parser succeeded, else `1`.

mod cli;
mod report;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use cli::{Cli, OutputFormat};
use sbom_parsers::config::{load_config, Config};
use sbom_parsers::orchestrator::Job;
use sbom_parsers::registry::RegistryClient;
use sbom_parsers::{Error, Orchestrator, ParserResult};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let path = cli
        .path
        .canonicalize()
        .unwrap_or_else(|_| cli.path.clone());

    let mut config = load_config(&path, cli.config.as_deref())?;
    if cli.offline {
        config.offline = true;
    }
    if cli.global_settings.is_some() {
        config.global_settings = cli.global_settings.clone();
    }

    // the registry client is blocking, so it is built and dropped off the runtime
    let jobs = match select_jobs(path.clone(), config).await? {
        Ok(jobs) => jobs,
        Err(Error::NoPluginAvailable) => {
            eprintln!("No supported project manifests found in {}", path.display());
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let outcomes = run_jobs(jobs, cli.quiet || cli.format == OutputFormat::Json).await;

    let mut results: Vec<ParserResult> = Vec::new();
    let mut failed = false;
    for (name, outcome) in outcomes {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                failed = true;
                eprintln!("  {} {}: {}", "✗".red(), name, e);
            }
        }
    }

    match cli.format {
        OutputFormat::Tree => report::terminal::render(&results, &path, cli.quiet)?,
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn select_jobs(path: PathBuf, config: Config) -> Result<sbom_parsers::Result<Vec<Job>>> {
    let selected = tokio::task::spawn_blocking(move || -> sbom_parsers::Result<Vec<Job>> {
        let client = RegistryClient::from_config(&config)?;
        Ok(Orchestrator::new(&path, &config, &client)?.into_jobs())
    })
    .await?;
    Ok(selected)
}

/// Run each parser on its own blocking thread; parsers share no state.
async fn run_jobs(
    jobs: Vec<Job>,
    quiet: bool,
) -> Vec<(&'static str, sbom_parsers::Result<ParserResult>)> {
    let pb = if !quiet {
        let pb = ProgressBar::new(jobs.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    } else {
        None
    };

    let futures: Vec<_> = jobs
        .into_iter()
        .map(|mut job| {
            let pb = pb.clone();
            async move {
                let name = job.name();
                let outcome = tokio::task::spawn_blocking(move || job.run())
                    .await
                    .unwrap_or_else(|e| Err(std::io::Error::other(e).into()));
                if let Some(pb) = &pb {
                    pb.inc(1);
                    pb.set_message(name);
                }
                (name, outcome)
            }
        })
        .collect();

    let outcomes = join_all(futures).await;

    if let Some(pb) = pb {
        pb.finish_with_message("Done");
    }
    outcomes
}
