//! YAML decoding into `serde_json::Value`
//!
//! Kustomize output is YAML, but everything downstream (kube `DynamicObject`,
//! the orchestrator's JSON APIs) speaks JSON, so documents are converted on load.
//! Uses yaml-rust2 for parsing.
//!
//! Anchors and aliases are resolved by the loader. `.inf` and `.nan` reals have
//! no JSON form and load as `null`.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

/// Error decoding a YAML document
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct YamlError {
    message: String,
}

impl YamlError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Load every YAML document in `input`, converted to JSON values.
///
/// Comment-only or empty input yields no documents.
pub fn load_documents(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| {
        YamlError::new(format!(
            "{} at line {} column {}",
            e.info(),
            e.marker().line(),
            e.marker().col() + 1
        ))
    })?;
    docs.into_iter().map(yaml_to_json).collect()
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f = parse_real(&s)?;
            Ok(Number::from_f64(f).map_or(Value::Null, Value::Number))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| Ok((key_to_string(k)?, yaml_to_json(v)?)))
            .collect::<Result<Map<String, Value>, _>>()
            .map(Value::Object),
        Yaml::Alias(_) | Yaml::BadValue => Err(YamlError::new("unresolvable YAML value")),
    }
}

// YAML 1.2 spells the special floats `.inf`, `-.inf` and `.nan`
fn parse_real(s: &str) -> Result<f64, YamlError> {
    match s {
        ".inf" | ".Inf" | ".INF" | "+.inf" | "+.Inf" | "+.INF" => Ok(f64::INFINITY),
        "-.inf" | "-.Inf" | "-.INF" => Ok(f64::NEG_INFINITY),
        ".nan" | ".NaN" | ".NAN" => Ok(f64::NAN),
        _ => s
            .parse()
            .map_err(|e: std::num::ParseFloatError| YamlError::new(format!("{}: {}", s, e))),
    }
}

// JSON objects only have string keys; scalar YAML keys are stringified.
fn key_to_string(key: Yaml) -> Result<String, YamlError> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        _ => Err(YamlError::new("unsupported YAML key type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nested_manifest() {
        let yaml = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: maestro-api
  namespace: maestro
spec:
  replicas: 2
  template:
    spec:
      containers:
        - name: api
          args: ["--port=8000", "--debug"]
"#;
        let docs = load_documents(yaml).unwrap();
        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(doc["metadata"]["namespace"], "maestro");
        assert_eq!(doc["spec"]["replicas"], 2);
        assert_eq!(
            doc["spec"]["template"]["spec"]["containers"][0]["args"][1],
            "--debug"
        );
    }

    #[test]
    fn test_scalars() {
        let docs = load_documents("enabled: true\nratio: 0.5\nnothing: null\nport: 31330").unwrap();
        let doc = &docs[0];
        assert_eq!(doc["enabled"], true);
        assert!((doc["ratio"].as_f64().unwrap() - 0.5).abs() < f64::EPSILON);
        assert!(doc["nothing"].is_null());
        assert_eq!(doc["port"], 31330);
    }

    #[test]
    fn test_special_floats_load_as_null() {
        let docs = load_documents("max: .inf
min: -.Inf
unknown: .nan
big: 1.5e3
").unwrap();
        let doc = &docs[0];
        assert!(doc["max"].is_null());
        assert!(doc["min"].is_null());
        assert!(doc["unknown"].is_null());
        assert_eq!(doc["big"].as_f64(), Some(1500.0));
    }

    #[test]
    fn test_aliases_are_resolved() {
        let docs = load_documents("base: &labels
  app: web
extra: *labels
").unwrap();
        assert_eq!(docs[0]["extra"]["app"], "web");
    }

    #[test]
    fn test_non_string_keys_are_stringified() {
        let docs = load_documents("1: one\ntrue: yes\n").unwrap();
        assert_eq!(docs[0]["1"], "one");
        assert_eq!(docs[0]["true"], "yes");
    }

    #[test]
    fn test_comment_only_input_has_no_documents() {
        assert!(load_documents("# just a comment\n").unwrap().is_empty());
        assert!(load_documents("").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_yaml_reports_position() {
        let err = load_documents("metadata:\n  name: [unterminated\n").unwrap_err();
        assert!(err.to_string().contains("line"), "got: {err}");
    }
}
