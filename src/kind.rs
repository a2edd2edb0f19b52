//! Kind cluster lifecycle

use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::info;

use crate::command::run_command;
use crate::{Error, Result};

const NAME_ALPHABET: &[u8] = b"0123456789abcdef";

/// Generate `prefix-<random hex>` exactly `len` characters long.
///
/// Returns `prefix` unchanged when there is no room for a random suffix.
pub fn random_name(prefix: &str, len: usize) -> String {
    if prefix.len() + 1 >= len {
        return prefix.to_string();
    }
    let mut rng = rand::thread_rng();
    let suffix: String = (0..len - prefix.len() - 1)
        .map(|_| char::from(NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())]))
        .collect();
    format!("{}-{}", prefix, suffix)
}

/// Where the kubeconfig for cluster `name` is written
pub fn kubeconfig_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}.kubeconfig", name))
}

/// Create a kind cluster and return the path of its kubeconfig
pub async fn create_kind_cluster(name: &str, config: &Path, image: &str) -> Result<PathBuf> {
    info!(cluster = %name, %image, "creating kind cluster");

    let kubeconfig = kubeconfig_path(name);
    let config = path_str(config)?;
    let kubeconfig_str = path_str(&kubeconfig)?;

    run_command(
        "kind",
        &[
            "create",
            "cluster",
            "--name",
            name,
            "--config",
            config,
            "--image",
            image,
            "--kubeconfig",
            kubeconfig_str,
        ],
    )
    .await?;

    info!(cluster = %name, kubeconfig = %kubeconfig.display(), "kind cluster created");
    Ok(kubeconfig)
}

/// Delete a kind cluster and its kubeconfig file
pub async fn delete_kind_cluster(name: &str) -> Result<()> {
    info!(cluster = %name, "deleting kind cluster");
    run_command("kind", &["delete", "cluster", "--name", name]).await?;
    let _ = tokio::fs::remove_file(kubeconfig_path(name)).await;
    Ok(())
}

/// Whether a kind cluster called `name` exists
pub async fn kind_cluster_exists(name: &str) -> Result<bool> {
    let clusters = run_command("kind", &["get", "clusters"]).await?;
    Ok(cluster_listed(&clusters, name))
}

/// Delete cluster `name` if kind still knows it; returns whether it was deleted
pub async fn delete_kind_cluster_if_exists(name: &str) -> Result<bool> {
    if !kind_cluster_exists(name).await? {
        info!(cluster = %name, "kind cluster already gone");
        return Ok(false);
    }
    delete_kind_cluster(name).await?;
    Ok(true)
}

/// Whether `kind get clusters` output lists `name`
fn cluster_listed(output: &str, name: &str) -> bool {
    output.lines().any(|line| line.trim() == name)
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::config(format!("path is not valid UTF-8: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_name_has_prefix_and_length() {
        let name = random_name("maestro-e2e", 16);
        assert_eq!(name.len(), 16);
        assert!(name.starts_with("maestro-e2e-"));
        assert!(name[12..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_random_names_differ() {
        let a = random_name("e2e", 24);
        let b = random_name("e2e", 24);
        assert_ne!(a, b);
    }

    #[test]
    fn test_random_name_without_room_keeps_prefix() {
        assert_eq!(random_name("maestro-e2e", 11), "maestro-e2e");
        assert_eq!(random_name("maestro-e2e", 4), "maestro-e2e");
        assert_eq!(random_name("maestro-e2e", 12), "maestro-e2e");
    }

    #[test]
    fn test_cluster_listed_matches_whole_names() {
        let output = "kind\nmaestro-e2e-1a2b\n";
        assert!(cluster_listed(output, "maestro-e2e-1a2b"));
        assert!(!cluster_listed(output, "maestro-e2e"));
        assert!(!cluster_listed("No kind clusters found.\n", "maestro-e2e-1a2b"));
    }

    #[test]
    fn test_kubeconfig_path_is_per_cluster() {
        let path = kubeconfig_path("maestro-e2e-1a2b");
        assert!(path.ends_with("maestro-e2e-1a2b.kubeconfig"));
    }
}
