//! Workloads submitted by the scenarios

use serde_json::{json, Value};

/// Namespace workloads are deployed to on the consumer
pub const WORKLOAD_NAMESPACE: &str = "default";

/// Unprivileged nginx image
pub const NGINX_UNPRIVILEGED_IMAGE: &str = "nginxinc/nginx-unprivileged";
/// Alternate nginx image
pub const JITESOFT_NGINX_IMAGE: &str = "quay.io/jitesoft/nginx";

/// A single-container nginx Deployment named `name`, labelled `app: <name>`
pub fn nginx_deployment(name: &str, replicas: i32, image: &str) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": WORKLOAD_NAMESPACE,
        },
        "spec": {
            "replicas": replicas,
            "selector": {
                "matchLabels": {"app": name}
            },
            "template": {
                "metadata": {
                    "labels": {"app": name}
                },
                "spec": {
                    "containers": [{
                        "image": image,
                        "imagePullPolicy": "IfNotPresent",
                        "name": "nginx",
                    }]
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;

    #[test]
    fn test_nginx_deployment_is_a_valid_deployment() {
        let value = nginx_deployment("nginx1", 2, NGINX_UNPRIVILEGED_IMAGE);
        let deployment: Deployment = serde_json::from_value(value).unwrap();

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(
            spec.selector.match_labels.unwrap().get("app").map(String::as_str),
            Some("nginx1")
        );
        let pod = spec.template.spec.unwrap();
        assert_eq!(
            pod.containers[0].image.as_deref(),
            Some("nginxinc/nginx-unprivileged")
        );
        assert_eq!(deployment.metadata.namespace.as_deref(), Some("default"));
    }
}
