//! Rendering kustomizations

use std::path::Path;

use tracing::debug;

use crate::command::run_command;
use crate::{Error, Result};

/// Render the kustomization at `path` into a multi-document YAML stream
pub async fn render(path: &Path) -> Result<String> {
    let dir = path
        .to_str()
        .ok_or_else(|| Error::config(format!("path is not valid UTF-8: {}", path.display())))?;
    if !path.is_dir() {
        return Err(Error::config(format!(
            "kustomization directory not found: {}",
            path.display()
        )));
    }

    let rendered = run_command("kubectl", &["kustomize", dir]).await?;
    debug!(path = %path.display(), bytes = rendered.len(), "rendered kustomization");
    Ok(rendered)
}
