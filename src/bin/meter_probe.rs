// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! One-shot register probe for the power meter
//!
//! Reads every configured register once and prints the decoded values.
//! Useful to check the wiring and register map before starting the daemon.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use rust_powermeter::acquisition::{get_transport, RegisterSampler};
use rust_powermeter::config::Config;

/// Read all configured meter registers once and print the decoded values
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to configuration file (YAML format)
    #[clap(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Serial device of the meter (overrides the configuration)
    #[clap(long)]
    port: Option<String>,

    /// Use the built-in mock transport instead of a serial port
    #[clap(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    // Parse command line arguments
    let args = Args::parse();

    let mut config = Config::from_file(&args.config)?;
    config.apply_args(args.port.clone(), args.mock.then_some(true));

    println!(
        "Probing {} registers on {}",
        config.registers.len(),
        if config.transport.mock {
            "mock transport"
        } else {
            config.transport.port.as_str()
        }
    );

    let transport = get_transport(&config.transport).await?;
    let mut sampler = RegisterSampler::new(transport, config.registers.clone());

    let record = sampler
        .sample_pass()
        .await
        .map_err(|err| anyhow::anyhow!("{}", err))?;

    println!("Readings at {}:", record.format_timestamp());
    for spec in config.registers.iter() {
        match record.fields.get(&spec.name).copied().flatten() {
            Some(value) => println!("  {:24} (reg {:5}) = {:.3}", spec.name, spec.address, value),
            None => println!("  {:24} (reg {:5}) = <read failed>", spec.name, spec.address),
        }
    }
    Ok(())
}
