//! Orchestrator REST client
//!
//! Thin reqwest wrapper over the JSON API. Bodies follow protobuf JSON naming
//! (lowerCamelCase). Every call expects `200 OK`; anything else becomes
//! [`Error::UnexpectedStatus`] with the response body attached.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cloudevents::CloudEvent;
use crate::{Error, Result};

/// Content type for structured-mode CloudEvents
pub const CLOUDEVENTS_CONTENT_TYPE: &str = "application/x-cloudevents";

/// A key/value label on a consumer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerLabel {
    /// Label key
    pub key: String,
    /// Label value
    pub value: String,
}

impl ConsumerLabel {
    /// Create a label
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl From<ConsumerLabel> for maestro_proto::ConsumerLabel {
    fn from(label: ConsumerLabel) -> Self {
        Self {
            key: label.key,
            value: label.value,
        }
    }
}

impl From<maestro_proto::ConsumerLabel> for ConsumerLabel {
    fn from(label: maestro_proto::ConsumerLabel) -> Self {
        Self {
            key: label.key,
            value: label.value,
        }
    }
}

/// A registered consumer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumer {
    /// Orchestrator-assigned id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Labels
    #[serde(default)]
    pub labels: Vec<ConsumerLabel>,
}

impl From<maestro_proto::Consumer> for Consumer {
    fn from(consumer: maestro_proto::Consumer) -> Self {
        Self {
            id: consumer.id,
            name: consumer.name,
            labels: consumer.labels.into_iter().map(Into::into).collect(),
        }
    }
}

/// Body of a consumer create request
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConsumerCreate {
    /// Display name
    pub name: String,
    /// Initial labels
    pub labels: Vec<ConsumerLabel>,
}

#[derive(Serialize)]
struct ConsumerUpdate<'a> {
    labels: &'a [ConsumerLabel],
}

/// A workload submitted for a consumer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Orchestrator-assigned id
    pub id: String,
    /// Consumer the resource is delivered to
    #[serde(default)]
    pub consumer_id: String,
    /// Update counter
    #[serde(default, deserialize_with = "int64_from_json")]
    pub generation: i64,
    /// The Kubernetes object
    #[serde(default)]
    pub object: Value,
    /// Status reported back from the consumer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

impl Resource {
    /// `object.spec.replicas`, if present
    pub fn replicas(&self) -> Option<i64> {
        self.object.pointer("/spec/replicas").and_then(Value::as_i64)
    }
}

impl From<maestro_proto::Resource> for Resource {
    fn from(resource: maestro_proto::Resource) -> Self {
        Self {
            id: resource.id,
            consumer_id: resource.consumer_id,
            generation: resource.generation,
            object: resource
                .object
                .as_ref()
                .map(maestro_proto::struct_to_json)
                .unwrap_or(Value::Null),
            status: resource.status.as_ref().map(maestro_proto::struct_to_json),
        }
    }
}

/// Reply to a CloudEvent submission
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct CloudEventSendResponse {
    /// Delivery status reported by the orchestrator
    #[serde(default)]
    pub status: String,
}

// protobuf JSON encodes int64 as a string
fn int64_from_json<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    use serde::de::Error as _;
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| D::Error::custom(format!("not an int64: {}", n))),
        Value::String(s) => s.parse().map_err(D::Error::custom),
        other => Err(D::Error::custom(format!("not an int64: {}", other))),
    }
}

/// HTTP client settings for talking to the orchestrator
#[derive(Clone, Debug)]
pub struct HttpSettings {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// TCP keepalive interval
    pub tcp_keepalive: Duration,
    /// How long idle pooled connections are kept
    pub pool_idle_timeout: Duration,
    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            tcp_keepalive: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 100,
        }
    }
}

impl HttpSettings {
    /// Build a reqwest client with these settings; proxies come from the environment
    pub fn build(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(self.tcp_keepalive)
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .build()?)
    }
}

/// Client for the orchestrator REST API
#[derive(Clone, Debug)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    /// Create a client for `base_url` with default HTTP settings
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self::with_client(HttpSettings::default().build()?, base_url))
    }

    /// Create a client reusing an existing reqwest client
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `POST /v1/consumers`
    pub async fn create_consumer(&self, request: &ConsumerCreate) -> Result<Consumer> {
        self.send(Method::POST, "/v1/consumers", |r| r.json(request))
            .await
    }

    /// `GET /v1/consumers/{id}`
    pub async fn get_consumer(&self, id: &str) -> Result<Consumer> {
        self.send(Method::GET, &format!("/v1/consumers/{}", id), |r| r)
            .await
    }

    /// `PUT /v1/consumers/{id}` replacing the consumer's labels
    pub async fn update_consumer(&self, id: &str, labels: &[ConsumerLabel]) -> Result<Consumer> {
        let body = ConsumerUpdate { labels };
        self.send(Method::PUT, &format!("/v1/consumers/{}", id), |r| {
            r.json(&body)
        })
        .await
    }

    /// `POST /v1/consumers/{id}/resources` with the raw Kubernetes object
    pub async fn create_resource(&self, consumer_id: &str, object: &Value) -> Result<Resource> {
        self.send(
            Method::POST,
            &format!("/v1/consumers/{}/resources", consumer_id),
            |r| r.json(object),
        )
        .await
    }

    /// `GET /v1/resources/{id}`
    pub async fn get_resource(&self, id: &str) -> Result<Resource> {
        self.send(Method::GET, &format!("/v1/resources/{}", id), |r| r)
            .await
    }

    /// `PUT /v1/resources/{id}` with the replacement Kubernetes object
    pub async fn update_resource(&self, id: &str, object: &Value) -> Result<Resource> {
        self.send(Method::PUT, &format!("/v1/resources/{}", id), |r| {
            r.json(object)
        })
        .await
    }

    /// `POST /v1/cloudevents` with a structured-mode CloudEvent
    pub async fn send_cloudevent(&self, event: &CloudEvent) -> Result<CloudEventSendResponse> {
        let body = serde_json::to_vec(event)?;
        self.send(Method::POST, "/v1/cloudevents", |r| {
            r.header(CONTENT_TYPE, CLOUDEVENTS_CONTENT_TYPE).body(body)
        })
        .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "orchestrator request");

        let response = build(self.http.request(method.clone(), &url)).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status != reqwest::StatusCode::OK {
            return Err(Error::UnexpectedStatus {
                method: method.to_string(),
                url,
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}
