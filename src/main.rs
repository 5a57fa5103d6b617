//! Command-line interface for template-sync
//!
//! # Usage Examples
//!
//! ## Diff
//! ```bash
//! # Report differences of every template
//! template-sync --config sync.yaml run --action diff
//!
//! # Only the servers template, both directions
//! template-sync --config sync.yaml run --include-template servers --bidir
//! ```
//!
//! ## Sync
//! ```bash
//! # Write differences to the destination, two keys only
//! template-sync --config sync.yaml run --action sync \
//!   --include-key srv1 --include-key srv2,eth0
//!
//! # Copy destination values back to the source
//! template-sync --config sync.yaml run --action sync --reverse --output report.txt
//! ```
//!
//! ## Information
//! ```bash
//! template-sync --config sync.yaml config-dump
//! template-sync exit-codes
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use template_sync::config::{Action, ConfigError, SyncConfig};
use template_sync::filter::{FilterMode, KeyFilter, KeyTuple, NameFilter};
use template_sync::{
    connect, ExitCode, FileReporter, LogReporter, Registry, Reporter, Runner, SyncError,
};

#[derive(Parser)]
#[command(name = "template-sync")]
#[command(about = "Diff and sync relational databases through mapping templates")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, env = "TEMPLATE_SYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Diff or sync the configured templates
    Run(RunArgs),

    /// Print the effective configuration with passwords masked
    ConfigDump {
        /// Print JSON instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// List the exit codes
    ExitCodes,

    /// Print license information
    License,
}

#[derive(Args)]
struct RunArgs {
    /// Report differences only, or also write them
    #[arg(long, value_enum)]
    action: Option<Action>,

    /// Swap source and destination
    #[arg(long)]
    reverse: bool,

    /// Also report destination rows missing from the source
    #[arg(long)]
    bidir: bool,

    /// Only run these templates (comma-separated, repeatable)
    #[arg(long, value_delimiter = ',', conflicts_with = "exclude_template")]
    include_template: Vec<String>,

    /// Skip these templates (comma-separated, repeatable)
    #[arg(long, value_delimiter = ',')]
    exclude_template: Vec<String>,

    /// Only process this key; separate the columns of a key tuple with ','
    #[arg(long, conflicts_with = "exclude_key")]
    include_key: Vec<String>,

    /// Skip this key; separate the columns of a key tuple with ','
    #[arg(long)]
    exclude_key: Vec<String>,

    /// Write the report to this file
    #[arg(long)]
    output: Option<PathBuf>,
}

impl RunArgs {
    /// Override the configuration file with the command line.
    fn apply(self, config: &mut SyncConfig) {
        if let Some(action) = self.action {
            config.action = action;
        }
        config.reverse |= self.reverse;
        config.bidir |= self.bidir;

        if !self.include_template.is_empty() {
            config.template_filter = Some(NameFilter::new(FilterMode::Include, self.include_template));
        } else if !self.exclude_template.is_empty() {
            config.template_filter = Some(NameFilter::new(FilterMode::Exclude, self.exclude_template));
        }

        let keys = |args: Vec<String>| -> Vec<KeyTuple> {
            args.iter().map(|k| KeyTuple::parse(k)).collect()
        };
        if !self.include_key.is_empty() {
            config.key_filter = Some(KeyFilter::new(FilterMode::Include, keys(self.include_key)));
        } else if !self.exclude_key.is_empty() {
            config.key_filter = Some(KeyFilter::new(FilterMode::Exclude, keys(self.exclude_key)));
        }

        if self.output.is_some() {
            config.report.output = self.output;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        let code = e
            .downcast_ref::<SyncError>()
            .map_or(ExitCode::Internal, SyncError::exit_code);
        std::process::exit(code.code());
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let mut config = load_config(cli.config)?;
            args.apply(&mut config);
            run_templates(config).await?;
        }
        Commands::ConfigDump { json } => {
            let config = load_config(cli.config)?;
            if json {
                let mut redacted = config.clone();
                redacted.source.url = config.source.redacted_url();
                redacted.destination.url = config.destination.redacted_url();
                let rendered = serde_json::to_string_pretty(&redacted)
                    .context("Failed to render the configuration as JSON")?;
                println!("{rendered}");
            } else {
                print!("{}", config.to_redacted_yaml().map_err(SyncError::from)?);
            }
        }
        Commands::ExitCodes => {
            for code in ExitCode::ALL {
                println!("{code}");
            }
        }
        Commands::License => {
            println!(
                "template-sync {} is distributed under the terms of the MIT license.",
                env!("CARGO_PKG_VERSION")
            );
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<SyncConfig, SyncError> {
    let path = path.ok_or_else(|| {
        ConfigError::Invalid("no configuration file, pass --config or set TEMPLATE_SYNC_CONFIG".into())
    })?;
    Ok(SyncConfig::load(&path)?)
}

async fn run_templates(config: SyncConfig) -> anyhow::Result<()> {
    let config = config.validate(&Registry::default()).map_err(SyncError::from)?;
    let runner = Runner::new(&config);

    let mut source = connect(&runner.source().config.url)
        .await
        .map_err(|source| SyncError::Connect {
            role: runner.source().role,
            source,
        })?;
    let mut destination = connect(&runner.destination().config.url)
        .await
        .map_err(|source| SyncError::Connect {
            role: runner.destination().role,
            source,
        })?;

    let mut reporters: Vec<Box<dyn Reporter>> = vec![Box::new(LogReporter)];
    if let Some(output) = &config.report.output {
        reporters.push(Box::new(FileReporter::new(output)));
    }

    let result = runner
        .run(source.as_mut(), destination.as_mut(), &reporters)
        .await;

    for conn in [&mut source, &mut destination] {
        if let Err(e) = conn.close().await {
            tracing::warn!("Failed to close {} connection: {e}", conn.dialect());
        }
    }

    let summary = result?;
    println!(
        "{}: {} differences, {} changes",
        config.action, summary.records, summary.changes
    );
    Ok(())
}
