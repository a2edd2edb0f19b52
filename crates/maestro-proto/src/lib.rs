//! Protocol buffer definitions for the maestro orchestrator API.
//!
//! This crate provides the gRPC clients, servers, and message types for the three
//! orchestrator services exercised by the e2e harness:
//!
//! - [`consumer_service_client::ConsumerServiceClient`]: create/read/update consumers
//! - [`resource_service_client::ResourceServiceClient`]: create/read/update resources
//! - [`cloud_events_service_client::CloudEventsServiceClient`]: send manifest CloudEvents
//!
//! Resource objects travel as `google.protobuf.Struct`. The [`struct_from_json`] and
//! [`struct_to_json`] helpers convert between that representation and
//! `serde_json::Value`, which is what the rest of the harness works with.
//!
//! # Example
//!
//! ```ignore
//! use maestro_proto::{struct_from_json, ResourceCreateRequest};
//!
//! let object = serde_json::json!({"apiVersion": "apps/v1", "kind": "Deployment"});
//! let request = ResourceCreateRequest {
//!     consumer_id: "3f1b...".to_string(),
//!     object: struct_from_json(&object),
//! };
//! ```

// Generated protobuf code doesn't have docs
#![allow(missing_docs)]

use std::collections::BTreeMap;

use prost_types::value::Kind;
use prost_types::{ListValue, Struct};
use serde_json::{Map, Number, Value};

/// Generated types from cloudevents.proto
pub mod io {
    pub mod cloudevents {
        pub mod v1 {
            tonic::include_proto!("io.cloudevents.v1");
        }
    }
}

/// Generated types from maestro.proto
pub mod maestro {
    pub mod api {
        pub mod v1 {
            tonic::include_proto!("maestro.api.v1");
        }
    }
}

pub use io::cloudevents::v1 as cloudevents;
pub use maestro::api::v1::*;

/// Convert a JSON object into a protobuf `Struct`.
///
/// Returns `None` when `value` is not a JSON object.
pub fn struct_from_json(value: &Value) -> Option<Struct> {
    match value {
        Value::Object(map) => Some(map_to_struct(map)),
        _ => None,
    }
}

/// Convert a protobuf `Struct` back into a JSON object.
///
/// Integral numbers come back as JSON integers so that `replicas: 1` survives a
/// round trip through the orchestrator as `1`, not `1.0`.
pub fn struct_to_json(value: &Struct) -> Value {
    Value::Object(
        value
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), proto_value_to_json(v)))
            .collect(),
    )
}

fn map_to_struct(map: &Map<String, Value>) -> Struct {
    Struct {
        fields: map
            .iter()
            .map(|(k, v)| (k.clone(), json_to_proto_value(v)))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn json_to_proto_value(value: &Value) -> prost_types::Value {
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(json_to_proto_value).collect(),
        }),
        Value::Object(map) => Kind::StructValue(map_to_struct(map)),
    };
    prost_types::Value { kind: Some(kind) }
}

fn proto_value_to_json(value: &prost_types::Value) -> Value {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::NumberValue(n)) => number_to_json(*n),
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.iter().map(proto_value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => struct_to_json(s),
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Value::Number((n as i64).into())
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}
