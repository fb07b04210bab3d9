#![forbid(unsafe_code)]

//! # snared
//!
//! SSH decoy daemon. Listens for SSH clients, records every password they
//! try, and rejects all of them.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p snared -- --port 2222 --log stdout --log-format pretty
//! ```

use std::process::ExitCode;

use anyhow::Context;
use snare::ServerBuilder;
use snare_log::CredentialLog;
use snared::{Cli, Config, logging};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("snared: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    logging::init(cli.log_level(), cli.diag_format)?;

    let config = Config::from_cli(&cli)?;
    config.validate()?;

    if cli.check {
        println!("{}", config.to_diagnostic_string());
        return Ok(());
    }

    let output = config.log_output();
    let log = CredentialLog::open(output.clone(), config.log_format()?)
        .with_context(|| format!("cannot open credential log {output}"))?;

    let server = ServerBuilder::new()
        .options(config.server_options())
        .sink(log)
        .build()?;

    let listener = server.bind().await?;
    println!("snared listening on {}", listener.local_addr()?);
    println!("  version:     {}", server.identification());
    println!("  host key:    {}", config.key_source());
    println!("  fingerprint: {}", server.fingerprint());
    println!("  credentials: {output}");

    tokio::select! {
        result = server.serve(listener) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("cannot listen for shutdown signal")?;
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
