//! Resource delivery through the resource API

use tracing::info;

use super::{
    Transport, MIN_READY_RATIO, WAIT_TIMEOUT, WORK_AGENT_DEPLOYMENT, WORK_AGENT_NAMESPACE,
};
use crate::env::TestEnv;
use crate::fixtures::{nginx_deployment, NGINX_UNPRIVILEGED_IMAGE, WORKLOAD_NAMESPACE};
use crate::kube_utils::{wait_for_deployment, DeploymentCondition};
use crate::rest::{Consumer, Resource};
use crate::{Error, Result};

/// Deployment name used per transport
pub fn workload_name(transport: Transport) -> &'static str {
    match transport {
        Transport::Rest => "nginx1",
        Transport::Grpc => "nginx2",
    }
}

/// Create, read back and scale an nginx deployment for `consumer`
pub async fn run(env: &TestEnv, transport: Transport, consumer: &Consumer) -> Result<Resource> {
    let scenario = format!("resource {}", transport);
    let name = workload_name(transport);

    wait_for_deployment(
        &env.kube,
        WORK_AGENT_NAMESPACE,
        WORK_AGENT_DEPLOYMENT,
        DeploymentCondition::ReadyRatioAtLeast(MIN_READY_RATIO),
        &env.poll(WAIT_TIMEOUT),
    )
    .await?;

    let object = nginx_deployment(name, 1, NGINX_UNPRIVILEGED_IMAGE);
    let resource = match transport {
        Transport::Rest => env.rest.create_resource(&consumer.id, &object).await?,
        Transport::Grpc => env.rpc.create_resource(&consumer.id, &object).await?,
    };
    wait_for_replicas(env, name, 1).await?;
    info!(%transport, resource = %resource.id, "resource created");

    let fetched = match transport {
        Transport::Rest => env.rest.get_resource(&resource.id).await?,
        Transport::Grpc => env.rpc.get_resource(&resource.id).await?,
    };
    expect_replicas(&scenario, &fetched, 1)?;
    info!(%transport, resource = %fetched.id, "resource retrieved");

    let object = nginx_deployment(name, 2, NGINX_UNPRIVILEGED_IMAGE);
    let updated = match transport {
        Transport::Rest => env.rest.update_resource(&resource.id, &object).await?,
        Transport::Grpc => env.rpc.update_resource(&resource.id, &object).await?,
    };
    wait_for_replicas(env, name, 2).await?;
    info!(%transport, resource = %updated.id, "resource updated");

    Ok(updated)
}

async fn wait_for_replicas(env: &TestEnv, name: &str, replicas: i32) -> Result<()> {
    wait_for_deployment(
        &env.kube,
        WORKLOAD_NAMESPACE,
        name,
        DeploymentCondition::DesiredReplicas(replicas),
        &env.poll(WAIT_TIMEOUT),
    )
    .await?;
    Ok(())
}

/// Check `object.spec.replicas` of a resource returned by the orchestrator
pub fn expect_replicas(scenario: &str, resource: &Resource, expected: i64) -> Result<()> {
    match resource.replicas() {
        Some(n) if n == expected => Ok(()),
        Some(n) => Err(Error::assertion(
            scenario,
            format!("expected replicas {}, got {}", expected, n),
        )),
        None => Err(Error::assertion(
            scenario,
            format!("resource {} has no spec.replicas", resource.id),
        )),
    }
}
