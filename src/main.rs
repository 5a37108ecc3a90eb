// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-io-controller project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the Modbus I/O controller daemon

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::signal;

use rust_io_controller::config::{self, Config};
use rust_io_controller::daemon::Daemon;

/// Modbus TCP/RTU/ASCII slave for a digital and analog I/O controller
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Modbus/TCP server address
    #[arg(long)]
    modbus_address: Option<String>,

    /// Modbus/TCP server port
    #[arg(long)]
    modbus_port: Option<u16>,

    /// Modbus unit id answered by the controller (1-247)
    #[arg(long)]
    unit_id: Option<u8>,

    /// Maximum number of concurrent Modbus/TCP connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Do not start the ADC sampler
    #[arg(long)]
    no_acquisition: bool,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }

        Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let mut config = Config::from_file(&config_path)?;

    config.apply_args(
        args.modbus_address.clone(),
        args.modbus_port,
        args.unit_id,
        args.max_connections,
        args.no_acquisition,
    );
    config.validate()?;

    info!(
        "Starting I/O controller {} (unit {})",
        env!("CARGO_PKG_VERSION"),
        config.modbus.unit_id
    );
    let mut daemon = Daemon::new();
    daemon.launch(&config).await?;

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal, terminating daemon");
        }
        Err(err) => {
            eprintln!("Error waiting for shutdown signal: {}", err);
        }
    }
    daemon.shutdown();
    daemon.join().await?;

    Ok(())
}
