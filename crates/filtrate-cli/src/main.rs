//! Filtrate command-line worker

use anyhow::{Context, bail};
use clap::{ArgAction, Parser, Subcommand};
use filtrate::plugins::get_filter_catalog;
use filtrate::{FileEvent, FilterJob, FiltrateConfig, JobOutcome, SaveMetadataRequest, Worker};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "filtrate", version)]
#[command(about = "Run metadata filters against newly ingested data files", long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML, or JSON). Defaults to $FILTRATE_CONFIG, then ./filtrate.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured filters
    Filters {
        /// Also list every loadable reference in the filter catalog
        #[arg(long)]
        catalog: bool,
    },

    /// Dispatch one file event and wait for its jobs
    Dispatch {
        #[arg(long)]
        file_id: i64,

        /// Absolute path of the file
        #[arg(long)]
        path: PathBuf,

        /// Logical location of the file inside its dataset
        #[arg(long)]
        uri: String,

        /// Mark the event as unverified (nothing will be scheduled)
        #[arg(long)]
        unverified: bool,
    },

    /// Read file events as JSON lines from stdin and dispatch each
    Worker,

    /// Run a single filter on a single file, in the foreground
    Run {
        /// Output name of the configured filter
        #[arg(long)]
        output_name: String,

        #[arg(long)]
        file_id: i64,

        #[arg(long)]
        path: PathBuf,

        #[arg(long)]
        uri: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = FiltrateConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Filters { catalog } => {
            list_filters(&config, catalog)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Dispatch {
            file_id,
            path,
            uri,
            unverified,
        } => {
            let mut worker = Worker::from_config(config).await?;
            let results = worker.take_results();

            let scheduled = worker.dispatch(&FileEvent::new(file_id, !unverified, path, uri));
            tracing::info!("Scheduled {} job(s)", scheduled);

            worker.drain().await;
            drop(worker);

            print_results(results).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Worker => {
            let mut worker = Worker::from_config(config).await?;
            let printer = tokio::spawn(print_results(worker.take_results()));

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<FileEvent>(&line) {
                    Ok(event) => {
                        worker.dispatch(&event);
                    }
                    Err(e) => tracing::warn!("Ignoring malformed file event {:?}: {}", line, e),
                }
            }

            worker.drain().await;
            drop(worker);

            printer.await.context("Result printer failed")??;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Run {
            output_name,
            file_id,
            path,
            uri,
        } => {
            let mut worker = Worker::from_config(config).await?;
            let results = worker.take_results();

            let Some(spec) = worker.registry().get(&output_name).cloned() else {
                bail!("No filter with output name '{}' is configured", output_name);
            };

            let event = FileEvent::new(file_id, true, path, uri);
            let outcome = worker.runner().run(FilterJob::new(spec, &event)).await;
            println!("{}", outcome);

            drop(worker);
            print_results(results).await?;

            Ok(if outcome == JobOutcome::Success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn list_filters(config: &FiltrateConfig, catalog: bool) -> anyhow::Result<()> {
    if config.filters.is_empty() {
        println!("No filters configured");
    } else {
        println!("{} filter(s):", config.filters.len());
        for spec in &config.filters {
            let extensions: Vec<&str> = spec.accepted_extensions.iter().map(String::as_str).collect();
            println!(
                "  {} [{}] -> {} ({}, {})",
                spec.display_name,
                extensions.join(", "),
                spec.loadable_ref,
                spec.output_name,
                spec.output_schema
            );
        }
    }

    if catalog {
        let catalog = get_filter_catalog();
        let catalog = catalog
            .read()
            .map_err(|e| anyhow::anyhow!("Filter catalog lock poisoned: {}", e))?;
        println!("Catalog:");
        for reference in catalog.references() {
            println!("  {}", reference);
        }
    }

    Ok(())
}

/// Print published messages as JSON lines until the channel closes.
async fn print_results(results: Option<UnboundedReceiver<SaveMetadataRequest>>) -> anyhow::Result<()> {
    let Some(mut results) = results else {
        return Ok(());
    };

    while let Some(request) = results.recv().await {
        println!("{}", serde_json::to_string(&request).context("Failed to encode result")?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_dispatch_with_global_flags() {
        let cli = Cli::parse_from([
            "filtrate",
            "dispatch",
            "--file-id",
            "42",
            "--path",
            "/data/sample.csv",
            "--uri",
            "ds/sample.csv",
            "-vv",
            "--config",
            "filtrate.yaml",
        ]);

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("filtrate.yaml")));
        match cli.command {
            Commands::Dispatch {
                file_id, unverified, ..
            } => {
                assert_eq!(file_id, 42);
                assert!(!unverified);
            }
            _ => panic!("expected dispatch subcommand"),
        }
    }
}
