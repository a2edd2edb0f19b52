//! End-to-end scenarios against a running orchestrator
//!
//! Scenarios run in a fixed pipeline. The consumer scenarios produce a
//! [`Consumer`](crate::rest::Consumer) that the resource and manifest scenarios
//! of the same transport take as input; when a consumer scenario fails its
//! dependents are skipped.

pub mod consumer;
pub mod manifest;
pub mod resource;

use std::time::Duration;

use crate::env::TestEnv;
use crate::report::Suite;
use crate::Result;

/// Namespace of the orchestrator deployment
pub const MAESTRO_NAMESPACE: &str = "maestro";
/// Orchestrator API deployment
pub const MAESTRO_API_DEPLOYMENT: &str = "maestro-api";
/// Namespace of the work agent
pub const WORK_AGENT_NAMESPACE: &str = "open-cluster-management-agent";
/// Work agent deployment
pub const WORK_AGENT_DEPLOYMENT: &str = "work-agent";

/// Readiness ratio required of the orchestrator and work agent
pub const MIN_READY_RATIO: f64 = 0.5;
/// Upper bound on every wait inside a scenario
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Transport a scenario exercises
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    /// JSON over HTTP
    Rest,
    /// gRPC
    Grpc,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rest => f.write_str("REST"),
            Self::Grpc => f.write_str("gRPC"),
        }
    }
}

/// Run every scenario in pipeline order and report.
///
/// REST scenarios run first, then gRPC. Fails when any scenario failed.
pub async fn run_all(env: &TestEnv, suite: &Suite) -> Result<()> {
    for transport in [Transport::Rest, Transport::Grpc] {
        let consumer_name = format!("consumer {}", transport);
        let resource_name = format!("resource {}", transport);
        let manifest_name = format!("manifest {}", transport);

        let consumer = suite
            .run(&consumer_name, || consumer::run(env, transport))
            .await;

        match consumer {
            Some(consumer) => {
                suite
                    .run(&resource_name, || resource::run(env, transport, &consumer))
                    .await;
                suite
                    .run(&manifest_name, || manifest::run(env, transport, &consumer))
                    .await;
            }
            None => {
                let reason = format!("{} failed", consumer_name);
                suite.skip(&resource_name, &reason);
                suite.skip(&manifest_name, &reason);
            }
        }
    }

    suite.finish()
}
