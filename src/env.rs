//! Test environment setup and teardown
//!
//! [`TestEnv`] owns every handle a scenario needs (kube client, REST client,
//! gRPC clients) and is passed to scenarios explicitly.

use std::path::PathBuf;
use std::time::Duration;

use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::components::{install_component, uninstall_component};
use crate::config::{HarnessConfig, OsEnv, CLUSTER_NAME_LEN, CLUSTER_NAME_PREFIX};
use crate::kube_utils::{create_client, wait_for_deployment, DeploymentCondition};
use crate::poll::{PollConfig, PollError};
use crate::rest::RestClient;
use crate::retry::RetryConfig;
use crate::rpc::RpcClients;
use crate::tables::{DocumentStore, TABLES};
use crate::{kind, Result};

/// Namespace of the document store deployment
pub const DOCUMENT_STORE_NAMESPACE: &str = "dynamodb";
/// Name of the document store deployment
pub const DOCUMENT_STORE_DEPLOYMENT: &str = "dynamodb";
/// How long to wait for the document store to become ready
pub const DOCUMENT_STORE_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Handles shared by every scenario
pub struct TestEnv {
    /// Client for the target cluster
    pub kube: Client,
    /// Orchestrator REST client
    pub rest: RestClient,
    /// Orchestrator gRPC clients
    pub rpc: RpcClients,
    config: HarnessConfig,
    kind_cluster: Option<String>,
    cancel: CancellationToken,
}

impl TestEnv {
    /// Bring up the environment described by `config`.
    ///
    /// Creates a kind cluster unless `real_cluster` is set, installs every
    /// component, and provisions the document store tables. If setup fails
    /// after creating a cluster and `clean_env` is set, the cluster is deleted.
    pub async fn setup(config: HarnessConfig, cancel: CancellationToken) -> Result<Self> {
        let (kind_cluster, kubeconfig) = if config.real_cluster {
            info!("using existing cluster");
            (None, config.kubeconfig.clone())
        } else {
            let name = kind::random_name(CLUSTER_NAME_PREFIX, CLUSTER_NAME_LEN);
            let kubeconfig =
                kind::create_kind_cluster(&name, &config.kind_config, &config.kind_image).await?;
            (Some(name), Some(kubeconfig))
        };

        match Self::provision(&config, kubeconfig, &cancel).await {
            Ok((kube, rest, rpc)) => {
                info!(cluster = ?kind_cluster, "test environment ready");
                Ok(Self {
                    kube,
                    rest,
                    rpc,
                    config,
                    kind_cluster,
                    cancel,
                })
            }
            Err(e) => {
                if let (Some(name), true) = (&kind_cluster, config.clean_env) {
                    warn!(cluster = %name, error = %e, "setup failed, deleting kind cluster");
                    if let Err(cleanup) = kind::delete_kind_cluster_if_exists(name).await {
                        error!(cluster = %name, error = %cleanup, "failed to delete kind cluster");
                    }
                }
                Err(e)
            }
        }
    }

    async fn provision(
        config: &HarnessConfig,
        kubeconfig: Option<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<(Client, RestClient, RpcClients)> {
        let kube = create_client(kubeconfig.as_deref()).await?;

        for dir in config.component_dirs() {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled {
                    description: format!("install {}", dir.display()),
                    attempts: 0,
                }
                .into());
            }
            install_component(&kube, &dir).await?;
        }

        wait_for_deployment(
            &kube,
            DOCUMENT_STORE_NAMESPACE,
            DOCUMENT_STORE_DEPLOYMENT,
            DeploymentCondition::ReadyRatioAtLeast(1.0),
            &PollConfig::with_timeout(DOCUMENT_STORE_READY_TIMEOUT).cancel_on(cancel.clone()),
        )
        .await?;
        DocumentStore::connect(&config.db_endpoint, &config.db_region, &OsEnv)
            .await
            .ensure_tables(&TABLES, cancel)
            .await?;

        let rpc = RpcClients::connect_lazy(&config.grpc_uri())?;
        let rest = RestClient::new(config.rest_base_url.clone())?;
        Ok((kube, rest, rpc))
    }

    /// Name of the kind cluster this run created, if any
    pub fn kind_cluster(&self) -> Option<&str> {
        self.kind_cluster.as_deref()
    }

    /// Poll settings with `timeout`, cancelled along with the run
    pub fn poll(&self, timeout: Duration) -> PollConfig {
        PollConfig::with_timeout(timeout).cancel_on(self.cancel.clone())
    }

    /// Backoff limited to `max_attempts`, stopped when the run is cancelled
    pub fn retry(&self, max_attempts: u32) -> RetryConfig {
        RetryConfig::with_max_attempts(max_attempts).cancel_on(self.cancel.clone())
    }

    /// Tear the environment down.
    ///
    /// Clients are dropped first. With `clean_env`, components are uninstalled
    /// in reverse install order and the kind cluster is deleted. Every step runs
    /// even if an earlier one fails; the first error is returned.
    pub async fn finish(self) -> Result<()> {
        let Self {
            kube,
            rest,
            rpc,
            config,
            kind_cluster,
            ..
        } = self;
        drop(rest);
        drop(rpc);

        if !config.clean_env {
            info!(cluster = ?kind_cluster, "leaving environment in place");
            return Ok(());
        }

        let mut first_error = None;
        for dir in config.component_dirs().iter().rev() {
            if let Err(e) = uninstall_component(&kube, dir).await {
                error!(component = %dir.display(), error = %e, "uninstall failed");
                first_error.get_or_insert(e);
            }
        }
        drop(kube);

        if let Some(name) = &kind_cluster {
            if let Err(e) = kind::delete_kind_cluster_if_exists(name).await {
                error!(cluster = %name, error = %e, "failed to delete kind cluster");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("environment cleaned up");
                Ok(())
            }
        }
    }
}
