//! Orchestrator gRPC clients
//!
//! One lazily connected channel is shared by the consumer, resource and
//! CloudEvents service clients. Transport is plaintext.

use std::time::Duration;

use maestro_proto::cloud_events_service_client::CloudEventsServiceClient;
use maestro_proto::consumer_service_client::ConsumerServiceClient;
use maestro_proto::resource_service_client::ResourceServiceClient;
use maestro_proto::{
    struct_from_json, ConsumerCreateRequest, ConsumerReadRequest, ConsumerUpdateRequest,
    ResourceCreateRequest, ResourceReadRequest, ResourceUpdateRequest,
};
use serde_json::Value;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::cloudevents::CloudEvent;
use crate::rest::{CloudEventSendResponse, Consumer, ConsumerLabel, Resource};
use crate::{Error, Result};

/// Timeout for establishing the gRPC connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Clients for the three orchestrator gRPC services
#[derive(Clone, Debug)]
pub struct RpcClients {
    consumers: ConsumerServiceClient<Channel>,
    resources: ResourceServiceClient<Channel>,
    cloudevents: CloudEventsServiceClient<Channel>,
}

impl RpcClients {
    /// Build clients for `uri` (e.g. `http://127.0.0.1:31320`).
    ///
    /// The connection is opened on first use.
    pub fn connect_lazy(uri: &str) -> Result<Self> {
        let channel = Endpoint::from_shared(uri.to_string())?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect_lazy();
        debug!(%uri, "gRPC channel configured");
        Ok(Self::from_channel(channel))
    }

    /// Build clients sharing `channel`
    pub fn from_channel(channel: Channel) -> Self {
        Self {
            consumers: ConsumerServiceClient::new(channel.clone()),
            resources: ResourceServiceClient::new(channel.clone()),
            cloudevents: CloudEventsServiceClient::new(channel),
        }
    }

    /// `ConsumerService.Create`
    pub async fn create_consumer(&self, name: &str, labels: Vec<ConsumerLabel>) -> Result<Consumer> {
        let request = ConsumerCreateRequest {
            name: name.to_string(),
            labels: labels.into_iter().map(Into::into).collect(),
        };
        let response = self.consumers.clone().create(request).await?;
        Ok(response.into_inner().into())
    }

    /// `ConsumerService.Read`
    pub async fn get_consumer(&self, id: &str) -> Result<Consumer> {
        let request = ConsumerReadRequest { id: id.to_string() };
        let response = self.consumers.clone().read(request).await?;
        Ok(response.into_inner().into())
    }

    /// `ConsumerService.Update` replacing the consumer's labels
    pub async fn update_consumer(&self, id: &str, labels: Vec<ConsumerLabel>) -> Result<Consumer> {
        let request = ConsumerUpdateRequest {
            id: id.to_string(),
            labels: labels.into_iter().map(Into::into).collect(),
        };
        let response = self.consumers.clone().update(request).await?;
        Ok(response.into_inner().into())
    }

    /// `ResourceService.Create` with a Kubernetes object
    pub async fn create_resource(&self, consumer_id: &str, object: &Value) -> Result<Resource> {
        let request = ResourceCreateRequest {
            consumer_id: consumer_id.to_string(),
            object: Some(object_struct(object)?),
        };
        let response = self.resources.clone().create(request).await?;
        Ok(response.into_inner().into())
    }

    /// `ResourceService.Read`
    pub async fn get_resource(&self, id: &str) -> Result<Resource> {
        let request = ResourceReadRequest { id: id.to_string() };
        let response = self.resources.clone().read(request).await?;
        Ok(response.into_inner().into())
    }

    /// `ResourceService.Update` with the replacement object
    pub async fn update_resource(&self, id: &str, object: &Value) -> Result<Resource> {
        let request = ResourceUpdateRequest {
            id: id.to_string(),
            object: Some(object_struct(object)?),
        };
        let response = self.resources.clone().update(request).await?;
        Ok(response.into_inner().into())
    }

    /// `CloudEventsService.Send`
    pub async fn send_cloudevent(&self, event: &CloudEvent) -> Result<CloudEventSendResponse> {
        let response = self.cloudevents.clone().send(event.to_proto()?).await?;
        Ok(CloudEventSendResponse {
            status: response.into_inner().status,
        })
    }
}

fn object_struct(object: &Value) -> Result<prost_types::Struct> {
    struct_from_json(object)
        .ok_or_else(|| Error::internal_with_context("rpc", "resource object must be a JSON object"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use maestro_proto::cloud_events_service_server::{CloudEventsService, CloudEventsServiceServer};
    use maestro_proto::cloudevents::CloudEvent as ProtoCloudEvent;
    use maestro_proto::consumer_service_server::{ConsumerService, ConsumerServiceServer};
    use maestro_proto::resource_service_server::{ResourceService, ResourceServiceServer};
    use serde_json::json;
    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::{Request, Response, Status};

    use crate::cloudevents::ManifestAction;

    #[derive(Clone, Default)]
    struct FakeOrchestrator {
        events: Arc<Mutex<Vec<ProtoCloudEvent>>>,
    }

    #[tonic::async_trait]
    impl ConsumerService for FakeOrchestrator {
        async fn create(
            &self,
            request: Request<ConsumerCreateRequest>,
        ) -> std::result::Result<Response<maestro_proto::Consumer>, Status> {
            let req = request.into_inner();
            Ok(Response::new(maestro_proto::Consumer {
                id: "c-1".to_string(),
                name: req.name,
                labels: req.labels,
            }))
        }

        async fn read(
            &self,
            request: Request<ConsumerReadRequest>,
        ) -> std::result::Result<Response<maestro_proto::Consumer>, Status> {
            let id = request.into_inner().id;
            if id != "c-1" {
                return Err(Status::not_found(format!("consumer {} not found", id)));
            }
            Ok(Response::new(maestro_proto::Consumer {
                id,
                name: "Test".to_string(),
                labels: vec![],
            }))
        }

        async fn update(
            &self,
            request: Request<ConsumerUpdateRequest>,
        ) -> std::result::Result<Response<maestro_proto::Consumer>, Status> {
            let req = request.into_inner();
            Ok(Response::new(maestro_proto::Consumer {
                id: req.id,
                name: "Test".to_string(),
                labels: req.labels,
            }))
        }
    }

    #[tonic::async_trait]
    impl ResourceService for FakeOrchestrator {
        async fn create(
            &self,
            request: Request<ResourceCreateRequest>,
        ) -> std::result::Result<Response<maestro_proto::Resource>, Status> {
            let req = request.into_inner();
            Ok(Response::new(maestro_proto::Resource {
                id: "r-1".to_string(),
                consumer_id: req.consumer_id,
                generation: 1,
                object: req.object,
                status: None,
            }))
        }

        async fn read(
            &self,
            request: Request<ResourceReadRequest>,
        ) -> std::result::Result<Response<maestro_proto::Resource>, Status> {
            Ok(Response::new(maestro_proto::Resource {
                id: request.into_inner().id,
                consumer_id: "c-1".to_string(),
                generation: 1,
                object: struct_from_json(&json!({"spec": {"replicas": 1}})),
                status: None,
            }))
        }

        async fn update(
            &self,
            request: Request<ResourceUpdateRequest>,
        ) -> std::result::Result<Response<maestro_proto::Resource>, Status> {
            let req = request.into_inner();
            Ok(Response::new(maestro_proto::Resource {
                id: req.id,
                consumer_id: "c-1".to_string(),
                generation: 2,
                object: req.object,
                status: None,
            }))
        }
    }

    #[tonic::async_trait]
    impl CloudEventsService for FakeOrchestrator {
        async fn send(
            &self,
            request: Request<ProtoCloudEvent>,
        ) -> std::result::Result<Response<maestro_proto::CloudEventSendResponse>, Status> {
            self.events.lock().unwrap().push(request.into_inner());
            Ok(Response::new(maestro_proto::CloudEventSendResponse {
                status: "accepted".to_string(),
            }))
        }
    }

    async fn serve(fake: FakeOrchestrator) -> RpcClients {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(ConsumerServiceServer::new(fake.clone()))
                .add_service(ResourceServiceServer::new(fake.clone()))
                .add_service(CloudEventsServiceServer::new(fake))
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });
        RpcClients::connect_lazy(&format!("http://{}", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_consumer_lifecycle() {
        let clients = serve(FakeOrchestrator::default()).await;

        let consumer = clients
            .create_consumer("Test", vec![ConsumerLabel::new("foo", "bar")])
            .await
            .unwrap();
        assert_eq!(consumer.id, "c-1");
        assert_eq!(consumer.labels, vec![ConsumerLabel::new("foo", "bar")]);

        let read = clients.get_consumer("c-1").await.unwrap();
        assert_eq!(read.name, "Test");

        let updated = clients
            .update_consumer("c-1", vec![ConsumerLabel::new("foo", "goo")])
            .await
            .unwrap();
        assert_eq!(updated.labels, vec![ConsumerLabel::new("foo", "goo")]);
    }

    #[tokio::test]
    async fn test_status_errors_surface_as_rpc_errors() {
        let clients = serve(FakeOrchestrator::default()).await;
        let err = clients.get_consumer("missing").await.unwrap_err();
        match err {
            Error::Rpc(status) => assert_eq!(status.code(), tonic::Code::NotFound),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_resource_object_travels_as_struct() {
        let clients = serve(FakeOrchestrator::default()).await;
        let object = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "nginx2", "namespace": "default"},
            "spec": {"replicas": 1}
        });

        let created = clients.create_resource("c-1", &object).await.unwrap();
        assert_eq!(created.object, object);
        assert_eq!(created.replicas(), Some(1));

        let read = clients.get_resource(&created.id).await.unwrap();
        assert_eq!(read.replicas(), Some(1));

        let updated = clients
            .update_resource(&created.id, &json!({"spec": {"replicas": 2}}))
            .await
            .unwrap();
        assert_eq!(updated.generation, 2);
        assert_eq!(updated.replicas(), Some(2));
    }

    #[tokio::test]
    async fn test_non_object_resource_is_rejected_locally() {
        let clients = RpcClients::connect_lazy("http://127.0.0.1:1").unwrap();
        let err = clients.create_resource("c-1", &json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }

    #[tokio::test]
    async fn test_send_cloudevent() {
        let fake = FakeOrchestrator::default();
        let clients = serve(fake.clone()).await;
        let event = CloudEvent::manifest(
            ManifestAction::Create,
            "c-1",
            "r-1",
            1,
            json!({"kind": "Deployment", "metadata": {"name": "web2"}}),
        );

        let response = clients.send_cloudevent(&event).await.unwrap();
        assert_eq!(response.status, "accepted");

        let events = fake.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].r#type, ManifestAction::Create.event_type());
        assert!(events[0].attributes.contains_key("clustername"));
    }
}
