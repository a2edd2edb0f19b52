//! Manifest delivery through CloudEvents

use tracing::info;

use super::{
    Transport, MIN_READY_RATIO, WAIT_TIMEOUT, WORK_AGENT_DEPLOYMENT, WORK_AGENT_NAMESPACE,
};
use crate::cloudevents::{CloudEvent, ManifestAction};
use crate::env::TestEnv;
use crate::fixtures::{
    nginx_deployment, JITESOFT_NGINX_IMAGE, NGINX_UNPRIVILEGED_IMAGE, WORKLOAD_NAMESPACE,
};
use crate::kube_utils::{wait_for_deployment, DeploymentCondition};
use crate::rest::{CloudEventSendResponse, Consumer};
use crate::Result;

/// Deployment name and image used per transport
pub fn workload(transport: Transport) -> (&'static str, &'static str) {
    match transport {
        Transport::Rest => ("web1", JITESOFT_NGINX_IMAGE),
        Transport::Grpc => ("web2", NGINX_UNPRIVILEGED_IMAGE),
    }
}

/// Condition a manifest with `replicas` replicas is expected to reach.
///
/// Over REST the pods must become ready; over gRPC only `spec.replicas` is checked.
pub fn converged(transport: Transport, replicas: i32) -> DeploymentCondition {
    match transport {
        Transport::Rest => DeploymentCondition::ReadyReplicas(replicas),
        Transport::Grpc => DeploymentCondition::DesiredReplicas(replicas),
    }
}

/// Send a manifest create then update for `consumer` and wait for each to land
pub async fn run(env: &TestEnv, transport: Transport, consumer: &Consumer) -> Result<()> {
    let (name, image) = workload(transport);

    wait_for_deployment(
        &env.kube,
        WORK_AGENT_NAMESPACE,
        WORK_AGENT_DEPLOYMENT,
        DeploymentCondition::ReadyRatioAtLeast(MIN_READY_RATIO),
        &env.poll(WAIT_TIMEOUT),
    )
    .await?;

    let resource_id = uuid::Uuid::new_v4().to_string();

    let steps = [(ManifestAction::Create, 1, 1), (ManifestAction::Update, 2, 2)];
    for (action, version, replicas) in steps {
        let event = CloudEvent::manifest(
            action,
            &consumer.id,
            &resource_id,
            version,
            nginx_deployment(name, replicas, image),
        );
        let response = send(env, transport, &event).await?;

        wait_for_deployment(
            &env.kube,
            WORKLOAD_NAMESPACE,
            name,
            converged(transport, replicas),
            &env.poll(WAIT_TIMEOUT),
        )
        .await?;
        info!(
            %transport,
            manifest = %name,
            ?action,
            status = %response.status,
            "manifest delivered"
        );
    }

    Ok(())
}

async fn send(
    env: &TestEnv,
    transport: Transport,
    event: &CloudEvent,
) -> Result<CloudEventSendResponse> {
    match transport {
        Transport::Rest => env.rest.send_cloudevent(event).await,
        Transport::Grpc => env.rpc.send_cloudevent(event).await,
    }
}
