//! Harness configuration
//!
//! Settings come from the process environment through [`EnvSource`], so tests
//! can inject values with a mock instead of mutating global state. The CLI
//! applies its flags on top of the result.

use std::path::PathBuf;

/// Environment variable selecting an existing cluster instead of kind
pub const REAL_CLUSTER_ENV: &str = "REAL_CLUSTER";
/// Environment variable requesting teardown after the run
pub const CLEAN_ENV_ENV: &str = "CLEAN_ENV";

/// Kind cluster name prefix
pub const CLUSTER_NAME_PREFIX: &str = "maestro-e2e";
/// Length of generated kind cluster names
pub const CLUSTER_NAME_LEN: usize = 16;

/// Components installed during setup, in install order
pub const COMPONENTS: [&str; 4] = ["mqtt-broker", "work-agent", "dynamodb", "maestro"];

/// Read access to environment variables
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Value of `key`, if set
    fn var(&self, key: &str) -> Option<String>;
}

/// [`EnvSource`] backed by the process environment
#[derive(Clone, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Everything the harness needs to know before touching a cluster
#[derive(Clone, Debug, PartialEq)]
pub struct HarnessConfig {
    /// Use the cluster from the current kubeconfig instead of creating a kind cluster
    pub real_cluster: bool,
    /// Uninstall components and delete the kind cluster when finished
    pub clean_env: bool,
    /// Explicit kubeconfig path; `None` uses kube's default inference
    pub kubeconfig: Option<PathBuf>,
    /// Directory holding one kustomization per component
    pub manifests_dir: PathBuf,
    /// Kind cluster config file
    pub kind_config: PathBuf,
    /// Kind node image
    pub kind_image: String,
    /// Orchestrator REST base URL
    pub rest_base_url: String,
    /// Orchestrator gRPC `host:port`
    pub grpc_endpoint: String,
    /// Document store endpoint URL
    pub db_endpoint: String,
    /// Document store region
    pub db_region: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            real_cluster: false,
            clean_env: false,
            kubeconfig: None,
            manifests_dir: PathBuf::from("manifests"),
            kind_config: PathBuf::from("kind-config.yaml"),
            kind_image: "kindest/node:v1.27.1".to_string(),
            rest_base_url: "http://127.0.0.1:31330".to_string(),
            grpc_endpoint: "127.0.0.1:31320".to_string(),
            db_endpoint: "http://127.0.0.1:31310".to_string(),
            db_region: "us-east-1".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Build the configuration from `env`, falling back to defaults
    pub fn from_env(env: &dyn EnvSource) -> Self {
        let defaults = Self::default();
        let string = |key: &str, default: String| {
            env.var(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default)
        };
        let path = |key: &str, default: PathBuf| {
            env.var(key)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default)
        };

        Self {
            real_cluster: flag(env, REAL_CLUSTER_ENV),
            clean_env: flag(env, CLEAN_ENV_ENV),
            kubeconfig: env
                .var("KUBECONFIG")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            manifests_dir: path("MAESTRO_MANIFESTS_DIR", defaults.manifests_dir),
            kind_config: path("MAESTRO_KIND_CONFIG", defaults.kind_config),
            kind_image: string("MAESTRO_KIND_IMAGE", defaults.kind_image),
            rest_base_url: string("MAESTRO_REST_URL", defaults.rest_base_url),
            grpc_endpoint: string("MAESTRO_GRPC_ENDPOINT", defaults.grpc_endpoint),
            db_endpoint: string("MAESTRO_DB_ENDPOINT", defaults.db_endpoint),
            db_region: string("MAESTRO_DB_REGION", defaults.db_region),
        }
    }

    /// Kustomization directories in install order
    pub fn component_dirs(&self) -> Vec<PathBuf> {
        COMPONENTS
            .iter()
            .map(|c| self.manifests_dir.join(c))
            .collect()
    }

    /// gRPC endpoint as a URI
    pub fn grpc_uri(&self) -> String {
        if self.grpc_endpoint.contains("://") {
            self.grpc_endpoint.clone()
        } else {
            format!("http://{}", self.grpc_endpoint)
        }
    }
}

// Only the literal "true" enables a flag.
fn flag(env: &dyn EnvSource, key: &str) -> bool {
    env.var(key).is_some_and(|v| v.trim() == "true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn empty_env() -> MockEnvSource {
        let mut mock = MockEnvSource::new();
        mock.expect_var().returning(|_| None);
        mock
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let config = HarnessConfig::from_env(&empty_env());
        assert_eq!(config, HarnessConfig::default());
        assert!(!config.real_cluster);
        assert_eq!(config.rest_base_url, "http://127.0.0.1:31330");
    }

    #[test]
    fn test_flags_require_literal_true() {
        let mut mock = MockEnvSource::new();
        mock.expect_var()
            .with(eq(REAL_CLUSTER_ENV))
            .returning(|_| Some("true".to_string()));
        mock.expect_var()
            .with(eq(CLEAN_ENV_ENV))
            .returning(|_| Some("1".to_string()));
        mock.expect_var().returning(|_| None);

        let config = HarnessConfig::from_env(&mock);
        assert!(config.real_cluster);
        assert!(!config.clean_env);
    }

    #[test]
    fn test_overrides_from_env() {
        let mut mock = MockEnvSource::new();
        mock.expect_var()
            .with(eq("MAESTRO_MANIFESTS_DIR"))
            .returning(|_| Some("/opt/maestro/manifests".to_string()));
        mock.expect_var()
            .with(eq("MAESTRO_GRPC_ENDPOINT"))
            .returning(|_| Some("maestro.local:8090".to_string()));
        mock.expect_var()
            .with(eq("KUBECONFIG"))
            .returning(|_| Some("/tmp/kubeconfig".to_string()));
        mock.expect_var().returning(|_| None);

        let config = HarnessConfig::from_env(&mock);
        assert_eq!(config.manifests_dir, PathBuf::from("/opt/maestro/manifests"));
        assert_eq!(config.kubeconfig, Some(PathBuf::from("/tmp/kubeconfig")));
        assert_eq!(config.grpc_uri(), "http://maestro.local:8090");
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let mut mock = MockEnvSource::new();
        mock.expect_var().returning(|_| Some("  ".to_string()));

        let config = HarnessConfig::from_env(&mock);
        assert_eq!(config.kind_image, "kindest/node:v1.27.1");
        assert_eq!(config.kubeconfig, None);
    }

    #[test]
    fn test_component_dirs_in_install_order() {
        let config = HarnessConfig {
            manifests_dir: PathBuf::from("deploy"),
            ..Default::default()
        };
        let dirs = config.component_dirs();
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("deploy/mqtt-broker"),
                PathBuf::from("deploy/work-agent"),
                PathBuf::from("deploy/dynamodb"),
                PathBuf::from("deploy/maestro"),
            ]
        );
    }

    #[test]
    fn test_grpc_uri_keeps_explicit_scheme() {
        let config = HarnessConfig {
            grpc_endpoint: "https://maestro:8090".to_string(),
            ..Default::default()
        };
        assert_eq!(config.grpc_uri(), "https://maestro:8090");
    }
}
