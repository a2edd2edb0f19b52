//! CloudEvents for manifest delivery
//!
//! Manifests bypass the resource API: they are wrapped in a CloudEvent and
//! posted to the orchestrator, either as structured JSON over REST or in the
//! CloudEvents protobuf format over gRPC. [`CloudEvent`] is the structured JSON
//! form; [`CloudEvent::to_proto`] converts it for the gRPC path.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use maestro_proto::cloudevents::{
    self as pb, cloud_event::Data, cloud_event_attribute_value::Attr, CloudEventAttributeValue,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::Result;

/// CloudEvents spec version sent by the harness
pub const SPEC_VERSION: &str = "1.0";
/// Event source the orchestrator accepts manifests from
pub const SOURCE: &str = "maestro";
/// Content type of manifest event data
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Extension naming the consumer the manifest targets
pub const EXT_CLUSTER_NAME: &str = "clustername";
/// Extension identifying the manifest across create and update
pub const EXT_RESOURCE_ID: &str = "resourceid";
/// Extension carrying the manifest version
pub const EXT_RESOURCE_VERSION: &str = "resourceversion";

/// What a manifest event asks the orchestrator to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestAction {
    /// Deliver a new manifest
    Create,
    /// Replace a delivered manifest
    Update,
}

impl ManifestAction {
    /// CloudEvent `type` for this action
    pub fn event_type(self) -> &'static str {
        match self {
            Self::Create => "io.open-cluster-management.works.v1alpha1.manifests.spec.create_request",
            Self::Update => "io.open-cluster-management.works.v1alpha1.manifests.spec.update_request",
        }
    }
}

/// A CloudEvent in structured JSON mode
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    /// Event id
    pub id: String,
    /// Event source
    pub source: String,
    /// CloudEvents spec version
    pub specversion: String,
    /// Event type
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    /// Content type of `data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    /// Extension attributes
    #[serde(flatten)]
    pub extensions: BTreeMap<String, String>,
    /// Event payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CloudEvent {
    /// Build a manifest event for `cluster_name`.
    ///
    /// `resource_id` must stay the same between the create and later updates of
    /// one manifest; `resource_version` increases with each update.
    pub fn manifest(
        action: ManifestAction,
        cluster_name: &str,
        resource_id: &str,
        resource_version: u64,
        manifest: Value,
    ) -> Self {
        let extensions = BTreeMap::from([
            (EXT_CLUSTER_NAME.to_string(), cluster_name.to_string()),
            (EXT_RESOURCE_ID.to_string(), resource_id.to_string()),
            (EXT_RESOURCE_VERSION.to_string(), resource_version.to_string()),
        ]);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: SOURCE.to_string(),
            specversion: SPEC_VERSION.to_string(),
            event_type: action.event_type().to_string(),
            time: Some(Utc::now()),
            datacontenttype: Some(JSON_CONTENT_TYPE.to_string()),
            extensions,
            data: Some(json!({ "manifest": manifest })),
        }
    }

    /// Extension attribute by name
    pub fn extension(&self, name: &str) -> Option<&str> {
        self.extensions.get(name).map(String::as_str)
    }

    /// Convert to the CloudEvents protobuf format.
    ///
    /// `id`, `source`, `specversion` and `type` map to fields; `time`,
    /// `datacontenttype` and extensions become attributes. JSON data is sent as
    /// text.
    pub fn to_proto(&self) -> Result<pb::CloudEvent> {
        let mut attributes = BTreeMap::new();
        if let Some(time) = self.time {
            attributes.insert(
                "time".to_string(),
                attribute(Attr::CeTimestamp(prost_types::Timestamp {
                    seconds: time.timestamp(),
                    nanos: time.timestamp_subsec_nanos() as i32,
                })),
            );
        }
        if let Some(content_type) = &self.datacontenttype {
            attributes.insert(
                "datacontenttype".to_string(),
                attribute(Attr::CeString(content_type.clone())),
            );
        }
        for (name, value) in &self.extensions {
            attributes.insert(name.clone(), attribute(Attr::CeString(value.clone())));
        }

        let data = match &self.data {
            Some(Value::String(text)) => Some(Data::TextData(text.clone())),
            Some(value) => Some(Data::TextData(serde_json::to_string(value)?)),
            None => None,
        };

        Ok(pb::CloudEvent {
            id: self.id.clone(),
            source: self.source.clone(),
            spec_version: self.specversion.clone(),
            r#type: self.event_type.clone(),
            attributes: attributes.into_iter().collect(),
            data,
        })
    }
}

fn attribute(attr: Attr) -> CloudEventAttributeValue {
    CloudEventAttributeValue { attr: Some(attr) }
}
