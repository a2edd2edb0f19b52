//! Multi-document manifest splitting
//!
//! Kustomize renders a component as one YAML stream with documents separated by
//! `---` lines. [`split_documents`] turns that stream into an ordered list of
//! decoded objects ready to be created through the Kubernetes API.
//!
//! A line is a separator when it starts at column 0 and consists of `---` and
//! nothing else (trailing whitespace and the line ending ignored). An indented
//! `---` inside a block scalar is data. A block scalar whose content contains a
//! `---` line at column 0 is not valid YAML anyway and is cut in two.
//!
//! Segments that are empty, whitespace-only, or comment-only produce no
//! document. The first segment that fails to decode aborts the split and no
//! partial output is returned.

use serde_json::{Map, Value};

use crate::yaml;

/// Line that separates documents in a manifest stream
pub const DOCUMENT_SEPARATOR: &str = "---";

/// A decoded manifest document: a JSON object with arbitrary nesting.
pub type Document = Map<String, Value>;

/// Error splitting a manifest stream
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ManifestError {
    /// A segment is not a well-formed YAML mapping
    #[error("manifest document {index} (starting at line {line}): {message}")]
    Decode {
        /// Zero-based index of the segment in split order, empty segments included
        index: usize,
        /// One-based line in the input where the segment starts
        line: usize,
        /// Why decoding failed
        message: String,
    },

    /// The input buffer is not UTF-8
    #[error("manifest is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidUtf8 {
        /// Length of the valid UTF-8 prefix
        valid_up_to: usize,
    },
}

impl ManifestError {
    /// Index of the segment that failed to decode, if any
    pub fn segment_index(&self) -> Option<usize> {
        match self {
            Self::Decode { index, .. } => Some(*index),
            Self::InvalidUtf8 { .. } => None,
        }
    }
}

/// A slice of the input between separators
#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment<'a> {
    text: &'a str,
    line: usize,
}

/// Split `input` into segments at every separator line.
///
/// There is always one more segment than there are separators.
fn segments(input: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut start_line = 1;
    let mut offset = 0;

    for (i, line) in input.split_inclusive('\n').enumerate() {
        if line.trim_end() == DOCUMENT_SEPARATOR {
            segments.push(Segment {
                text: &input[start..offset],
                line: start_line,
            });
            start = offset + line.len();
            start_line = i + 2;
        }
        offset += line.len();
    }

    segments.push(Segment {
        text: &input[start..],
        line: start_line,
    });
    segments
}

/// Split a multi-document manifest stream into decoded documents.
///
/// Documents keep their relative input order.
pub fn split_documents(input: &str) -> Result<Vec<Document>, ManifestError> {
    let mut documents = Vec::new();

    for (index, segment) in segments(input).into_iter().enumerate() {
        if segment.text.trim().is_empty() {
            continue;
        }
        let decode_error = |message: String| ManifestError::Decode {
            index,
            line: segment.line,
            message,
        };

        let mut decoded = yaml::load_documents(segment.text)
            .map_err(|e| decode_error(e.to_string()))?
            .into_iter()
            .filter(|doc| !doc.is_null());

        let Some(doc) = decoded.next() else {
            // comments only
            continue;
        };
        if decoded.next().is_some() {
            return Err(decode_error(
                "segment contains more than one YAML document".to_string(),
            ));
        }

        match doc {
            Value::Object(map) => documents.push(map),
            other => {
                return Err(decode_error(format!(
                    "expected a mapping, found {}",
                    json_type_name(&other)
                )))
            }
        }
    }

    Ok(documents)
}

/// Split a raw byte buffer, rejecting non-UTF-8 input.
pub fn split_bytes(input: &[u8]) -> Result<Vec<Document>, ManifestError> {
    let text = std::str::from_utf8(input).map_err(|e| ManifestError::InvalidUtf8 {
        valid_up_to: e.valid_up_to(),
    })?;
    split_documents(text)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
