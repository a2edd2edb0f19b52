//! Installing and removing harness components
//!
//! A component is a kustomization directory (`mqtt-broker`, `work-agent`,
//! `dynamodb`, `maestro`). Installing renders it, splits the stream into
//! objects and creates each one through the dynamic API in rendered order.

use std::path::Path;

use kube::api::{DeleteParams, DynamicObject, PostParams};
use kube::discovery::{ApiCapabilities, ApiResource, Discovery};
use kube::Client;
use tracing::{debug, info};

use crate::kube_utils::ObjectRef;
use crate::manifest::{split_documents, Document};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{kustomize, Error, Result};

/// Objects in a component, in the order they were rendered
pub struct Component {
    name: String,
    objects: Vec<(ObjectRef, Document)>,
}

impl Component {
    /// Parse a rendered manifest stream
    pub fn from_manifest(name: impl Into<String>, manifest: &str) -> Result<Self> {
        let objects = split_documents(manifest)?
            .into_iter()
            .map(|doc| Ok((ObjectRef::from_document(&doc)?, doc)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: name.into(),
            objects,
        })
    }

    /// Render and parse the kustomization at `dir`
    pub async fn load(dir: &Path) -> Result<Self> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        let manifest = kustomize::render(dir).await?;
        Self::from_manifest(name, &manifest)
    }

    /// Component name (the kustomization directory name)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object identities in install order
    pub fn objects(&self) -> impl Iterator<Item = &ObjectRef> {
        self.objects.iter().map(|(obj, _)| obj)
    }
}

/// Install the component at `dir`; returns the number of objects created
pub async fn install_component(client: &Client, dir: &Path) -> Result<usize> {
    let component = Component::load(dir).await?;
    install(client, &component).await
}

/// Remove the component at `dir`; returns the number of objects deleted
pub async fn uninstall_component(client: &Client, dir: &Path) -> Result<usize> {
    let component = Component::load(dir).await?;
    uninstall(client, &component).await
}

/// Create every object of `component`.
///
/// Objects that already exist are left untouched.
pub async fn install(client: &Client, component: &Component) -> Result<usize> {
    info!(component = %component.name, objects = component.objects.len(), "installing component");
    let mut discovery = TypeResolver::new(client).await?;
    let mut created = 0;

    for (obj, doc) in &component.objects {
        let (resource, caps) = discovery.resolve(obj).await?;
        let api = obj.api(client, &resource, &caps);
        let dynamic: DynamicObject = serde_json::from_value(serde_json::Value::Object(doc.clone()))?;

        match api.create(&PostParams::default(), &dynamic).await.map_err(Error::from) {
            Ok(_) => {
                debug!(object = %obj, "created");
                created += 1;
            }
            Err(e) if e.is_kube_status(409) => {
                debug!(object = %obj, "already exists, skipping");
            }
            Err(e) => {
                return Err(Error::internal_with_context(
                    "install",
                    format!("failed to create {}: {}", obj, e),
                ))
            }
        }
    }

    info!(component = %component.name, created, "component installed");
    Ok(created)
}

/// Delete every object of `component`, last created first.
///
/// Objects that are already gone, or whose type no longer exists, are skipped.
pub async fn uninstall(client: &Client, component: &Component) -> Result<usize> {
    info!(component = %component.name, "uninstalling component");
    let discovery = Discovery::new(client.clone()).run().await?;
    let mut deleted = 0;

    for (obj, _) in component.objects.iter().rev() {
        let Ok((resource, caps)) = obj.resolve(&discovery) else {
            debug!(object = %obj, "type not served, skipping");
            continue;
        };
        let api = obj.api(client, &resource, &caps);

        match api.delete(&obj.name, &DeleteParams::default()).await.map_err(Error::from) {
            Ok(_) => {
                debug!(object = %obj, "deleted");
                deleted += 1;
            }
            Err(e) if e.is_kube_status(404) => {
                debug!(object = %obj, "already gone");
            }
            Err(e) => {
                return Err(Error::internal_with_context(
                    "uninstall",
                    format!("failed to delete {}: {}", obj, e),
                ))
            }
        }
    }

    info!(component = %component.name, deleted, "component uninstalled");
    Ok(deleted)
}

/// API discovery that refreshes when a type is missing.
///
/// A component may ship CRDs together with instances of them; the instances
/// only resolve once the API server serves the new types.
struct TypeResolver<'a> {
    client: &'a Client,
    discovery: Discovery,
}

impl<'a> TypeResolver<'a> {
    async fn new(client: &'a Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self { client, discovery })
    }

    async fn resolve(&mut self, obj: &ObjectRef) -> Result<(ApiResource, ApiCapabilities)> {
        if let Ok(found) = obj.resolve(&self.discovery) {
            return Ok(found);
        }

        let client = self.client;
        let (discovery, found) = retry_with_backoff(
            &RetryConfig::with_max_attempts(8),
            &format!("discover {}", obj.kind),
            || async {
                let discovery = Discovery::new(client.clone()).run().await?;
                let found = obj.resolve(&discovery)?;
                Ok::<_, Error>((discovery, found))
            },
        )
        .await?;
        self.discovery = discovery;
        Ok(found)
    }
}
