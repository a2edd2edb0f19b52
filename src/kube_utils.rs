//! Kubernetes helpers built on kube-rs
//!
//! Client construction, API discovery for manifest objects, and deployment
//! readiness conditions used by setup and by every scenario.

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, DynamicObject};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use kube::{Client, Config};
use serde_json::Value;
use tracing::{debug, trace};

use crate::manifest::Document;
use crate::poll::{poll_until, Outcome, PollConfig};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Namespace used for namespaced objects that do not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Create a kube client and wait until the API server answers.
///
/// A freshly created kind cluster can take a few seconds before its API server
/// accepts connections, so construction and a version probe are retried.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    retry_with_backoff(
        &RetryConfig::with_max_attempts(10),
        "create kube client",
        || async {
            let client =
                create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
                    .await?;
            let version = client.apiserver_version().await?;
            debug!(version = %version.git_version, "connected to API server");
            Ok::<_, Error>(client)
        },
    )
    .await
}

/// Create a kube client from an optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Ok(Client::try_from(config)?)
}

/// Split an apiVersion into `(group, version)`; the core group is empty
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Identity of a manifest object
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectRef {
    /// `apiVersion` field
    pub api_version: String,
    /// `kind` field
    pub kind: String,
    /// `metadata.name`
    pub name: String,
    /// `metadata.namespace`, if present
    pub namespace: Option<String>,
}

impl ObjectRef {
    /// Read the identifying fields of a decoded manifest document
    pub fn from_document(doc: &Document) -> Result<Self, Error> {
        let field = |pointer: &str| pointer_str(doc, pointer);
        let required = |pointer: &str| {
            field(pointer).map(str::to_string).ok_or_else(|| {
                Error::internal_with_context("manifest", format!("object is missing {}", pointer))
            })
        };

        Ok(Self {
            api_version: required("/apiVersion")?,
            kind: required("/kind")?,
            name: required("/metadata/name")?,
            namespace: field("/metadata/namespace").map(str::to_string),
        })
    }

    /// Resolve the object's type through API discovery
    pub fn resolve(&self, discovery: &Discovery) -> Result<(ApiResource, ApiCapabilities), Error> {
        let (group, version) = parse_api_version(&self.api_version);
        let gvk = kube::api::GroupVersionKind {
            group,
            version,
            kind: self.kind.clone(),
        };
        discovery.resolve_gvk(&gvk).ok_or_else(|| {
            Error::internal_with_context(
                "discovery",
                format!("unknown resource type: {}/{}", self.api_version, self.kind),
            )
        })
    }

    /// Dynamic API handle for this object, scoped as discovery says
    pub fn api(
        &self,
        client: &Client,
        resource: &ApiResource,
        capabilities: &ApiCapabilities,
    ) -> Api<DynamicObject> {
        match capabilities.scope {
            Scope::Namespaced => {
                let ns = self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
                Api::namespaced_with(client.clone(), ns, resource)
            }
            Scope::Cluster => Api::all_with(client.clone(), resource),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} ({})", ns, self.name, self.kind),
            None => write!(f, "{} ({})", self.name, self.kind),
        }
    }
}

fn pointer_str<'a>(doc: &'a Document, pointer: &str) -> Option<&'a str> {
    let mut parts = pointer.trim_start_matches('/').split('/');
    let first = parts.next()?;
    parts
        .try_fold(doc.get(first)?, |value, key| value.get(key))
        .and_then(Value::as_str)
}

// =============================================================================
// Deployment readiness
// =============================================================================

/// Desired replica count; an unset `spec.replicas` means 1
pub fn desired_replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
}

/// Ready replica count; missing status means 0
pub fn ready_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

/// Fraction of desired replicas that are ready; 1.0 when none are desired
pub fn ready_ratio(deployment: &Deployment) -> f64 {
    let desired = desired_replicas(deployment);
    if desired <= 0 {
        return 1.0;
    }
    f64::from(ready_replicas(deployment)) / f64::from(desired)
}

/// A predicate over a deployment's spec and status
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeploymentCondition {
    /// `ready / desired >= threshold`
    ReadyRatioAtLeast(f64),
    /// `spec.replicas == n`
    DesiredReplicas(i32),
    /// `status.readyReplicas == n`
    ReadyReplicas(i32),
}

impl DeploymentCondition {
    /// Whether `deployment` satisfies the condition
    pub fn is_met(&self, deployment: &Deployment) -> bool {
        match *self {
            Self::ReadyRatioAtLeast(threshold) => ready_ratio(deployment) >= threshold,
            Self::DesiredReplicas(n) => desired_replicas(deployment) == n,
            Self::ReadyReplicas(n) => ready_replicas(deployment) == n,
        }
    }
}

impl std::fmt::Display for DeploymentCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadyRatioAtLeast(t) => write!(f, "ready ratio >= {}", t),
            Self::DesiredReplicas(n) => write!(f, "{} desired replicas", n),
            Self::ReadyReplicas(n) => write!(f, "{} ready replicas", n),
        }
    }
}

/// Poll a deployment until `condition` holds and return it.
///
/// A missing deployment and API errors are retried until the poll times out.
pub async fn wait_for_deployment(
    client: &Client,
    namespace: &str,
    name: &str,
    condition: DeploymentCondition,
    poll: &PollConfig,
) -> Result<Deployment, Error> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let description = format!("deployment {}/{} to have {}", namespace, name, condition);

    let deployment = poll_until(poll, &description, || {
        let deployments = deployments.clone();
        async move {
            match deployments.get(name).await {
                Ok(d) if condition.is_met(&d) => Ok(Outcome::Satisfied(d)),
                Ok(d) => {
                    trace!(
                        deployment = %name,
                        desired = desired_replicas(&d),
                        ready = ready_replicas(&d),
                        "deployment not ready"
                    );
                    Ok(Outcome::Pending)
                }
                Err(e) => Err(e),
            }
        }
    })
    .await?;

    debug!(namespace = %namespace, deployment = %name, %condition, "deployment condition met");
    Ok(deployment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use serde_json::json;

    fn deployment(replicas: Option<i32>, ready: Option<i32>) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas,
                ..Default::default()
            }),
            status: ready.map(|r| DeploymentStatus {
                ready_replicas: Some(r),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_parse_api_version() {
        assert_eq!(
            parse_api_version("apps/v1"),
            ("apps".to_string(), "v1".to_string())
        );
        assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
        assert_eq!(
            parse_api_version("work.open-cluster-management.io/v1"),
            ("work.open-cluster-management.io".to_string(), "v1".to_string())
        );
    }

    #[test]
    fn test_ready_ratio() {
        assert_eq!(ready_ratio(&deployment(Some(2), Some(1))), 0.5);
        assert_eq!(ready_ratio(&deployment(Some(2), None)), 0.0);
        assert_eq!(ready_ratio(&deployment(None, Some(1))), 1.0);
        assert_eq!(ready_ratio(&deployment(Some(0), None)), 1.0);
        assert_eq!(ready_ratio(&Deployment::default()), 0.0);
    }

    #[test]
    fn test_ready_ratio_thresholds() {
        let half = deployment(Some(2), Some(1));
        assert!(DeploymentCondition::ReadyRatioAtLeast(0.5).is_met(&half));
        assert!(!DeploymentCondition::ReadyRatioAtLeast(1.0).is_met(&half));
        assert!(DeploymentCondition::ReadyRatioAtLeast(1.0).is_met(&deployment(Some(2), Some(2))));
    }

    #[test]
    fn test_replica_conditions() {
        let d = deployment(Some(2), Some(1));
        assert!(DeploymentCondition::DesiredReplicas(2).is_met(&d));
        assert!(!DeploymentCondition::DesiredReplicas(1).is_met(&d));
        assert!(DeploymentCondition::ReadyReplicas(1).is_met(&d));
        assert!(!DeploymentCondition::ReadyReplicas(2).is_met(&d));
        assert!(DeploymentCondition::ReadyReplicas(0).is_met(&deployment(Some(1), None)));
    }

    #[test]
    fn test_condition_display() {
        assert_eq!(
            DeploymentCondition::ReadyRatioAtLeast(0.5).to_string(),
            "ready ratio >= 0.5"
        );
        assert_eq!(
            DeploymentCondition::DesiredReplicas(2).to_string(),
            "2 desired replicas"
        );
    }

    #[test]
    fn test_object_ref_from_document() {
        let obj = ObjectRef::from_document(&doc(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "maestro", "namespace": "maestro"}
        })))
        .unwrap();
        assert_eq!(obj.kind, "Deployment");
        assert_eq!(obj.namespace.as_deref(), Some("maestro"));
        assert_eq!(obj.to_string(), "maestro/maestro (Deployment)");
    }

    #[test]
    fn test_object_ref_cluster_scoped() {
        let obj = ObjectRef::from_document(&doc(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "maestro"}
        })))
        .unwrap();
        assert_eq!(obj.namespace, None);
        assert_eq!(obj.to_string(), "maestro (Namespace)");
    }

    #[test]
    fn test_object_ref_missing_name() {
        let err = ObjectRef::from_document(&doc(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {}
        })))
        .unwrap_err();
        assert!(err.to_string().contains("/metadata/name"), "got: {err}");
    }
}
