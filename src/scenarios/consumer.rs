//! Consumer registration and work agent retargeting

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, PostParams};
use tracing::info;

use super::{
    Transport, MAESTRO_API_DEPLOYMENT, MAESTRO_NAMESPACE, MIN_READY_RATIO, WAIT_TIMEOUT,
    WORK_AGENT_DEPLOYMENT, WORK_AGENT_NAMESPACE,
};
use crate::env::TestEnv;
use crate::kube_utils::{wait_for_deployment, DeploymentCondition};
use crate::rest::{Consumer, ConsumerCreate, ConsumerLabel};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

/// Work agent flag naming the cluster it serves
pub const SPOKE_CLUSTER_NAME_FLAG: &str = "--spoke-cluster-name=";

/// Name given to consumers created by the harness
pub const CONSUMER_NAME: &str = "Test";

/// Label key/value pairs used per transport: `(key, initial, updated)`
fn labels_for(transport: Transport) -> (&'static str, &'static str, &'static str) {
    match transport {
        Transport::Rest => ("baz", "qux", "quux"),
        Transport::Grpc => ("foo", "bar", "goo"),
    }
}

/// Register a consumer, update its labels, and point the work agent at it
pub async fn run(env: &TestEnv, transport: Transport) -> Result<Consumer> {
    let scenario = format!("consumer {}", transport);

    wait_for_deployment(
        &env.kube,
        MAESTRO_NAMESPACE,
        MAESTRO_API_DEPLOYMENT,
        DeploymentCondition::ReadyRatioAtLeast(MIN_READY_RATIO),
        &env.poll(WAIT_TIMEOUT),
    )
    .await?;

    let (key, initial, updated) = labels_for(transport);

    let consumer = match transport {
        Transport::Rest => {
            env.rest
                .create_consumer(&ConsumerCreate {
                    name: CONSUMER_NAME.to_string(),
                    labels: vec![ConsumerLabel::new(key, initial)],
                })
                .await?
        }
        Transport::Grpc => {
            env.rpc
                .create_consumer(CONSUMER_NAME, vec![ConsumerLabel::new(key, initial)])
                .await?
        }
    };
    if consumer.id.is_empty() {
        return Err(Error::assertion(&scenario, "created consumer has no id"));
    }
    info!(%transport, consumer = %consumer.id, "consumer created");

    let fetched = match transport {
        Transport::Rest => env.rest.get_consumer(&consumer.id).await?,
        Transport::Grpc => env.rpc.get_consumer(&consumer.id).await?,
    };
    if fetched.id != consumer.id {
        return Err(Error::assertion(
            &scenario,
            format!("retrieved consumer {}, expected {}", fetched.id, consumer.id),
        ));
    }
    info!(%transport, consumer = %fetched.id, "consumer retrieved");

    let labels = vec![ConsumerLabel::new(key, updated)];
    let consumer = match transport {
        Transport::Rest => env.rest.update_consumer(&consumer.id, &labels).await?,
        Transport::Grpc => env.rpc.update_consumer(&consumer.id, labels.clone()).await?,
    };
    expect_labels(&scenario, &consumer, &labels)?;
    info!(%transport, consumer = %consumer.id, "consumer updated");

    retarget_work_agent(env, &consumer.id).await?;
    Ok(consumer)
}

/// Check that `consumer` carries exactly `expected`
pub fn expect_labels(scenario: &str, consumer: &Consumer, expected: &[ConsumerLabel]) -> Result<()> {
    if consumer.labels.len() != expected.len() {
        return Err(Error::assertion(
            scenario,
            format!(
                "expected label count {}, got {}",
                expected.len(),
                consumer.labels.len()
            ),
        ));
    }
    for (got, want) in consumer.labels.iter().zip(expected) {
        if got.key != want.key {
            return Err(Error::assertion(
                scenario,
                format!("expected label key {}, got {}", want.key, got.key),
            ));
        }
        if got.value != want.value {
            return Err(Error::assertion(
                scenario,
                format!("expected label value {}, got {}", want.value, got.value),
            ));
        }
    }
    Ok(())
}

/// Replace the first `--spoke-cluster-name=` argument; returns whether one was found
pub fn retarget_args(args: &mut [String], cluster_name: &str) -> bool {
    match args.iter_mut().find(|arg| arg.contains(SPOKE_CLUSTER_NAME_FLAG)) {
        Some(arg) => {
            *arg = format!("{}{}", SPOKE_CLUSTER_NAME_FLAG, cluster_name);
            true
        }
        None => false,
    }
}

/// Retarget the first container of `deployment` to `cluster_name`
pub fn retarget_deployment(deployment: &mut Deployment, cluster_name: &str) -> bool {
    deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .and_then(|pod| pod.containers.first_mut())
        .and_then(|container| container.args.as_mut())
        .is_some_and(|args| retarget_args(args, cluster_name))
}

/// Point the work agent at consumer `consumer_id` and wait for it to roll out
pub async fn retarget_work_agent(env: &TestEnv, consumer_id: &str) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(env.kube.clone(), WORK_AGENT_NAMESPACE);
    retarget(&deployments, consumer_id, &env.retry(5)).await?;
    info!(consumer = %consumer_id, "work agent retargeted");

    let deployment = wait_for_deployment(
        &env.kube,
        WORK_AGENT_NAMESPACE,
        WORK_AGENT_DEPLOYMENT,
        DeploymentCondition::ReadyRatioAtLeast(MIN_READY_RATIO),
        &env.poll(WAIT_TIMEOUT),
    )
    .await?;
    info!(
        availability = %format!("{:.2}%", crate::kube_utils::ready_ratio(&deployment) * 100.0),
        "work agent available"
    );
    Ok(())
}

/// Rewrite the work agent's cluster flag; a missing flag fails without retrying
async fn retarget(
    deployments: &Api<Deployment>,
    consumer_id: &str,
    retry: &RetryConfig,
) -> Result<()> {
    // re-read on every attempt so a concurrent update only costs a retry
    let retargeted = retry_with_backoff(retry, "retarget work agent", || async {
        let mut deployment = deployments.get(WORK_AGENT_DEPLOYMENT).await?;
        if !retarget_deployment(&mut deployment, consumer_id) {
            return Ok(false);
        }
        deployments
            .replace(WORK_AGENT_DEPLOYMENT, &PostParams::default(), &deployment)
            .await?;
        Ok::<_, Error>(true)
    })
    .await?;

    if retargeted {
        Ok(())
    } else {
        Err(Error::assertion(
            "retarget work agent",
            format!("work agent has no {} argument", SPOKE_CLUSTER_NAME_FLAG),
        ))
    }
}
