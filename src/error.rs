//! Error types for the maestro e2e harness
//!
//! One enum covers every collaborator the harness talks to (Kubernetes, the
//! orchestrator REST and gRPC APIs, the document store, local commands) plus the
//! two core utilities, whose own error types convert in via `#[from]`.

use thiserror::Error;

use crate::manifest::ManifestError;
use crate::poll::PollError;

/// Main error type for harness operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A manifest stream could not be split into documents
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A wait on cluster or API state did not converge
    #[error(transparent)]
    Poll(#[from] PollError),

    /// HTTP transport error talking to the orchestrator REST API
    #[error("http error: {source}")]
    Http {
        /// The underlying reqwest error
        #[from]
        source: reqwest::Error,
    },

    /// The orchestrator REST API answered with a non-200 status
    #[error("{method} {url} returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP method of the request
        method: String,
        /// Full request URL
        url: String,
        /// Status code returned
        status: u16,
        /// Response body, for diagnosis
        body: String,
    },

    /// gRPC call returned a non-OK status
    #[error("rpc error: {0}")]
    Rpc(#[from] tonic::Status),

    /// gRPC channel could not be built
    #[error("rpc transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Document store (DynamoDB API) error
    #[error("document store error [{table}]: {message}")]
    DocumentStore {
        /// Table the operation targeted
        table: String,
        /// Description of what failed
        message: String,
    },

    /// A local command (kind, kubectl) failed
    #[error("command `{command}` failed: {message}")]
    Command {
        /// The command line that was run
        command: String,
        /// Captured stderr or spawn error
        message: String,
    },

    /// Invalid harness configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A scenario observed state that contradicts its expectation
    #[error("assertion failed in {scenario}: {message}")]
    Assertion {
        /// Scenario that made the assertion
        scenario: String,
        /// What was expected and what was observed
        message: String,
    },

    /// One or more scenarios in a suite failed
    #[error("{} scenario(s) failed in {suite}: {}", .failed.len(), .failed.join(", "))]
    SuiteFailed {
        /// Suite name
        suite: String,
        /// Names of the failed scenarios
        failed: Vec<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g., "install", "discovery")
        context: String,
    },
}

impl Error {
    /// Create a document store error for a table
    pub fn document_store(table: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::DocumentStore {
            table: table.into(),
            message: msg.into(),
        }
    }

    /// Create a command error
    pub fn command(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an assertion failure for a scenario
    pub fn assertion(scenario: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Assertion {
            scenario: scenario.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether the error came from a Kubernetes API call answered with `code`
    pub fn is_kube_status(&self, code: u16) -> bool {
        matches!(self, Self::Kube { source: kube::Error::Api(resp) } if resp.code == code)
    }
}
