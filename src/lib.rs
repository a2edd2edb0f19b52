//! maestro-e2e - end-to-end test harness for the maestro orchestrator
//!
//! The harness provisions a kind cluster (or reuses an existing one), installs
//! the orchestrator and its dependencies from kustomize directories, and runs
//! consumer, resource and manifest scenarios over both the REST and gRPC APIs.
//!
//! # Modules
//!
//! - [`manifest`] - Multi-document YAML splitting
//! - [`poll`] - Bounded, cancellable condition polling
//! - [`env`] - Test environment setup and teardown
//! - [`scenarios`] - The scenario pipeline
//! - [`report`] - Run-all-and-report suite
//! - [`rest`] / [`rpc`] - Orchestrator API clients
//! - [`error`] - Error types for the harness

#![deny(missing_docs)]

pub mod cloudevents;
pub mod command;
pub mod components;
pub mod config;
pub mod env;
pub mod error;
pub mod fixtures;
pub mod kind;
pub mod kube_utils;
pub mod kustomize;
pub mod manifest;
pub mod poll;
pub mod report;
pub mod rest;
pub mod retry;
pub mod rpc;
pub mod scenarios;
pub mod tables;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{HarnessConfig, OsEnv};
use crate::env::TestEnv;
use crate::report::Suite;

/// Name of the suite the `run` command reports under
pub const SUITE_NAME: &str = "maestro e2e";

/// maestro-e2e - end-to-end tests for the maestro orchestrator
#[derive(Parser, Debug)]
#[command(name = "maestro-e2e")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[allow(missing_docs)]
    #[command(subcommand)]
    pub command: Commands,
}

/// Harness subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Set up the environment, run every scenario, and tear down
    Run(RunArgs),
    /// Split a multi-document YAML file, printing one JSON document per line
    Split {
        /// YAML file to split
        file: PathBuf,
    },
}

/// Overrides for the environment-derived configuration
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Use the current cluster instead of creating a kind cluster
    #[arg(long)]
    pub real_cluster: bool,

    /// Uninstall components and delete the kind cluster when done
    #[arg(long)]
    pub clean_env: bool,

    /// Kubeconfig for the target cluster
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Directory holding one kustomization per component
    #[arg(long)]
    pub manifests_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Apply the flags on top of `config`; flags only ever switch behavior on
    pub fn apply(self, mut config: HarnessConfig) -> HarnessConfig {
        config.real_cluster |= self.real_cluster;
        config.clean_env |= self.clean_env;
        if let Some(kubeconfig) = self.kubeconfig {
            config.kubeconfig = Some(kubeconfig);
        }
        if let Some(dir) = self.manifests_dir {
            config.manifests_dir = dir;
        }
        config
    }
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Run(args) => run_suite(args.apply(HarnessConfig::from_env(&OsEnv))).await,
            Commands::Split { file } => split_file(&file),
        }
    }
}

/// Set up, run the scenario pipeline, and tear down.
///
/// Teardown runs even when scenarios fail. A scenario failure takes precedence
/// over a teardown failure in the returned error.
pub async fn run_suite(config: HarnessConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling outstanding waits");
            on_signal.cancel();
        }
    });

    let env = TestEnv::setup(config, cancel).await?;
    info!(cluster = env.kind_cluster().unwrap_or("current context"), "running scenarios");
    let suite = Suite::new(SUITE_NAME);
    let outcome = scenarios::run_all(&env, &suite).await;
    let teardown = env.finish().await;

    match (outcome, teardown) {
        (Err(e), Err(cleanup)) => {
            error!(error = %cleanup, "teardown failed");
            Err(e)
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => {
            info!("all scenarios passed");
            Ok(())
        }
    }
}

/// Print every document of a YAML file as one JSON line
pub fn split_file(path: &std::path::Path) -> Result<()> {
    let bytes = std::fs::read(path)?;
    for document in manifest::split_bytes(&bytes)? {
        println!("{}", serde_json::to_string(&document)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::parse_from([
            "maestro-e2e",
            "run",
            "--real-cluster",
            "--manifests-dir",
            "/tmp/manifests",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        let config = args.apply(HarnessConfig::default());
        assert!(config.real_cluster);
        assert!(!config.clean_env);
        assert_eq!(config.manifests_dir, PathBuf::from("/tmp/manifests"));
        assert_eq!(config.kubeconfig, None);
    }

    #[test]
    fn test_flags_do_not_clear_env_settings() {
        let config = HarnessConfig {
            clean_env: true,
            kubeconfig: Some(PathBuf::from("/root/.kube/config")),
            ..Default::default()
        };
        let config = RunArgs::default().apply(config);
        assert!(config.clean_env);
        assert_eq!(config.kubeconfig, Some(PathBuf::from("/root/.kube/config")));
    }

    #[test]
    fn test_cli_parses_split() {
        let cli = Cli::parse_from(["maestro-e2e", "--log-json", "split", "all.yaml"]);
        assert!(cli.log_json);
        assert!(matches!(cli.command, Commands::Split { file } if file == PathBuf::from("all.yaml")));
    }

    #[test]
    fn test_split_file_rejects_malformed_yaml() {
        let path = std::env::temp_dir().join(format!("maestro-e2e-split-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "kind: A\n---\n- just\n- a list\n").unwrap();
        let err = split_file(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, Error::Manifest(_)));
    }
}
