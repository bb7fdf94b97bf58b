// SPDX-License-Identifier: Apache-2.0 OR MIT
use anyhow::{Context, Result};
use clap::Parser;
use igmp_bridge::config::Config;
use igmp_bridge::logging::{AsyncConsumer, Facility, LogRegistry, Logger};
use igmp_bridge::{log_error, log_info, supervisor};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug, PartialEq)]
enum Command {
    /// Bridge multicast from the upstream to the downstream interface
    Run {
        /// Interface toward the multicast source (overrides the config file)
        #[arg(long)]
        upstream: Option<String>,
        /// Interface toward the receivers (overrides the config file)
        #[arg(long)]
        downstream: Option<String>,
        /// JSON5 configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Global minimum log level (overrides the config file)
        #[arg(long)]
        log_level: Option<String>,
        /// Write log lines as JSON objects
        #[arg(long)]
        json_logs: bool,
    },
    /// Validate a configuration file and print it normalized
    CheckConfig {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run {
            upstream,
            downstream,
            config,
            log_level,
            json_logs,
        } => {
            let config = resolve_config(config.as_deref(), upstream, downstream, log_level)?;
            run(config, json_logs).await
        }
        Command::CheckConfig { file } => check_config(&file),
    }
}

fn resolve_config(
    path: Option<&Path>,
    upstream: Option<String>,
    downstream: Option<String>,
    log_level: Option<String>,
) -> Result<Config> {
    let file = match path {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };

    let mut config = file.with_interfaces(upstream, downstream);
    if let Some(level) = log_level {
        config.logging.level = level;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run(config: Config, json_logs: bool) -> Result<()> {
    let registry = LogRegistry::default();
    config.logging.apply(&registry)?;

    let consumer = AsyncConsumer::stderr(registry.memory(), json_logs);
    let stop = consumer.stop_handle();
    let consumer_task = tokio::spawn(consumer.run());

    let result = supervisor::run(&config, registry.logger()).await;
    if let Err(e) = &result {
        log_error!(registry.logger(), Facility::Bridge, "Bridge failed: {:#}", e);
    }

    stop.store(false, Ordering::Relaxed);
    let _ = consumer_task.await;
    result
}

fn check_config(path: &Path) -> Result<()> {
    let logger = Logger::stderr_json();

    let config = Config::load_from_file(path)?;
    if let Err(e) = config.validate() {
        log_error!(logger, Facility::Config, "{}: {}", path.display(), e);
        return Err(e.into());
    }

    log_info!(logger, Facility::Config, "{} is valid", path.display());
    println!("{}", config.to_json5());
    Ok(())
}
