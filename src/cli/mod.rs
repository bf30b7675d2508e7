//! Command-line interface for docpipe.
//!
//! Provides commands for reprocessing a document, serving the pipeline
//! over HTTP, running the relay agent, and inspecting configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{Config, Topology};
use crate::core::{Orchestrator, ReprocessReport, ReprocessRequest};
use crate::domain::StepStatus;
use crate::relay::{BearerToken, RelayAgent};
use crate::server;

/// docpipe - Cross-system document reprocessing pipeline
#[derive(Parser, Debug)]
#[command(name = "docpipe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .docpipe/config.yaml discovery)
    #[arg(long, global = true, env = "DOCPIPE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reprocess one document by code
    Reprocess {
        /// Document code, e.g. Q1234567
        code: String,

        /// CSV file written to the import path during staging
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Abandon the run after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve the pipeline over HTTP (POST /reprocess)
    Serve {
        /// Address to bind to
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run the relay agent next to the document store
    Relay {
        /// Address to bind to
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Check that the configured store, transform and ERP are usable
    Check,

    /// Show resolved configuration with secrets redacted
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = Config::load_with(self.config.as_deref())?;

        match self.command {
            Commands::Reprocess {
                code,
                csv,
                deadline_secs,
                json,
            } => reprocess(&config, &code, csv.as_deref(), deadline_secs, json).await,
            Commands::Serve { bind } => {
                serve(&config, bind.as_deref().unwrap_or(&config.server.bind)).await
            }
            Commands::Relay { bind } => {
                run_relay(&config, bind.as_deref().unwrap_or(&config.agent.bind)).await
            }
            Commands::Check => check(&config).await,
            Commands::Config => show_config(&config),
        }
    }
}

fn parse_addr(bind: &str) -> Result<SocketAddr> {
    bind.parse()
        .with_context(|| format!("Invalid bind address: {}", bind))
}

/// Run the pipeline once and print the report
async fn reprocess(
    config: &Config,
    code: &str,
    csv: Option<&Path>,
    deadline_secs: Option<u64>,
    as_json: bool,
) -> Result<()> {
    let code = code.trim();
    if code.is_empty() {
        anyhow::bail!("A document code is required");
    }

    let mut request = ReprocessRequest::new(code);
    if let Some(path) = csv {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;
        request = request.with_csv(content);
    }

    let orchestrator = Orchestrator::from_config(config)?;

    let report = match deadline_secs {
        Some(secs) => tokio::time::timeout(
            Duration::from_secs(secs),
            orchestrator.reprocess_request(&request),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Run for {} abandoned after {}s deadline", code, secs))?,
        None => orchestrator.reprocess_request(&request).await,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.success {
        anyhow::bail!("{}", report.summary);
    }
    Ok(())
}

fn print_report(report: &ReprocessReport) {
    println!("Run ID: {}", report.run_id);
    println!("Code:   {}", report.code);
    println!();
    for step in &report.steps {
        let marker = match step.outcome.status {
            StepStatus::Ok => "ok",
            StepStatus::Warning => "warn",
            StepStatus::Error => "FAIL",
        };
        println!(
            "  {}. [{:<4}] {:<9} {}",
            step.step,
            marker,
            step.outcome.kind.label(),
            step.outcome.message
        );
    }
    println!();
    println!("{}", report.summary);
}

async fn serve(config: &Config, bind: &str) -> Result<()> {
    let addr = parse_addr(bind)?;
    let orchestrator = Arc::new(Orchestrator::from_config(config)?);
    let token = BearerToken::new(config.server.token.as_deref());

    server::serve(orchestrator, token, addr).await
}

async fn run_relay(config: &Config, bind: &str) -> Result<()> {
    let addr = parse_addr(bind)?;
    let agent = RelayAgent::from_config(&config.agent)?;

    agent.run(addr).await
}

async fn check(config: &Config) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;

    println!("Topology: {:?}", config.pipeline.topology);
    println!("Store:    {}", orchestrator.store().name());

    orchestrator.health_check().await?;

    println!("All checks passed");
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    if config.pipeline.topology == Topology::Local && config.pipeline.transform.is_none() {
        println!("Note: local topology without a transform command; runs will fail at the transform step");
    }
    println!();
    print!(
        "{}",
        serde_yaml::to_string(&config.redacted()).context("Failed to render configuration")?
    );

    Ok(())
}
