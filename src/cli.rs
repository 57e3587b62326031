//! Command-line interface for scraperbox.
//!
//! Provides a `run` command that drives the whole build-and-run pipeline
//! against a scraper repository, and a `pull-base` command that refreshes
//! the shared base build image.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::events::{RunEvents, StreamKind};
use crate::pipeline::{DockerRunner, RunOptions};
use crate::timing::TimingMetrics;

/// Build and run untrusted scraper code in resource-capped containers.
#[derive(Parser)]
#[command(name = "scraperbox")]
#[command(about = "Run scraper repositories inside isolated containers")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Build a scraper repository and run it to completion.
    Run(RunArgs),

    /// Pull or refresh the shared base build image.
    PullBase,
}

/// Arguments for `scraperbox run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Scraper repository directory.
    #[arg(short, long)]
    pub repo: PathBuf,

    /// Container name; must be unique among concurrent runs. A random name
    /// is generated when omitted.
    #[arg(long)]
    pub name: Option<String>,

    /// Environment variables for the scraper (KEY=VALUE, repeatable).
    #[arg(short, long = "env", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Container labels for bookkeeping (KEY=VALUE, repeatable).
    #[arg(long = "label", value_parser = parse_key_val)]
    pub labels: Vec<(String, String)>,

    /// Output files to copy back after the run, relative to the application
    /// root (repeatable).
    #[arg(short, long = "capture")]
    pub capture: Vec<String>,

    /// Directory captured files are written into.
    #[arg(short, long, default_value = "./scraper-output")]
    pub output_dir: PathBuf,

    /// Base build image override.
    #[arg(long)]
    pub base_image: Option<String>,

    /// Print the run summary as JSON instead of log lines.
    #[arg(long)]
    pub json: bool,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

pub async fn run_with_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => run_scraper(args).await,
        Commands::PullBase => pull_base().await,
    }
}

/// Forwards scraper output to this process's stdout/stderr; internal streams
/// get a prefix so operators can tell them apart.
fn console_events() -> RunEvents {
    RunEvents::new()
        .on_log(|kind, chunk| {
            match kind {
                StreamKind::Stdout => print!("{chunk}"),
                StreamKind::Stderr => eprint!("{chunk}"),
                StreamKind::InternalOut => print!("[{kind}] {chunk}"),
                StreamKind::InternalErr => eprint!("[{kind}] {chunk}"),
            }
            Ok(())
        })
        .on_ip_address(|address| {
            tracing::info!("container address: {address}");
            Ok(())
        })
}

async fn run_scraper(args: RunArgs) -> Result<()> {
    let mut config = RunnerConfig::default();
    if let Some(base_image) = args.base_image {
        config.base_image = base_image;
    }

    let runner = DockerRunner::new(config)?;
    let container_name = args
        .name
        .unwrap_or_else(|| format!("scraper-{}", Uuid::new_v4().simple()));

    let options = RunOptions {
        repo_path: args.repo,
        env: args.env.into_iter().collect(),
        container_name,
        labels: args.labels.into_iter().collect(),
        capture_paths: args.capture,
    };

    let mut events = console_events();
    let result = runner.compile_and_run(&options, &mut events).await?;

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    for (path, content) in &result.files {
        let dest = args.output_dir.join(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, content).with_context(|| format!("writing {}", dest.display()))?;
    }

    if args.json {
        #[derive(serde::Serialize)]
        struct Summary<'a> {
            status_code: i64,
            files: Vec<&'a str>,
            timing: &'a Option<TimingMetrics>,
        }
        let mut files: Vec<&str> = result.files.keys().map(String::as_str).collect();
        files.sort();
        let summary = Summary {
            status_code: result.status_code,
            files,
            timing: &result.timing,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        tracing::info!(
            status = result.status_code,
            files = result.files.len(),
            "run finished"
        );
        if let Some(timing) = &result.timing {
            tracing::info!(
                wall = timing.wall_time,
                user = timing.user_time,
                system = timing.system_time,
                max_rss_kb = timing.max_rss_kb,
                "resource usage"
            );
        }
    }

    if result.status_code != 0 {
        bail!("scraper exited with status {}", result.status_code);
    }
    Ok(())
}

async fn pull_base() -> Result<()> {
    let runner = DockerRunner::new(RunnerConfig::default())?;
    let mut events = RunEvents::new().on_log(|_, chunk| {
        print!("{chunk}");
        Ok(())
    });
    runner.pull_base_image(&mut events).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn key_val_parsing() {
        assert_eq!(
            parse_key_val("SCRAPER_API_URL=http://x").unwrap(),
            ("SCRAPER_API_URL".to_string(), "http://x".to_string())
        );
        assert_eq!(
            parse_key_val("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
    }
}
