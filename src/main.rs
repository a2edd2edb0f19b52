//! maestro-e2e
//!
//! End-to-end test harness for the maestro orchestrator.

use clap::Parser;

use maestro_e2e::telemetry::{init_tracing, TelemetryConfig};
use maestro_e2e::{Cli, Error, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&TelemetryConfig {
        json: cli.log_json,
        filter: None,
    })
    .map_err(|e| Error::config(e.to_string()))?;

    cli.run().await
}
