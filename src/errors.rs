use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

/// Configuration-store failures: connection, read, or write.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    #[diagnostic(
        code(lodestar::store::unavailable),
        help("Check that etcd is reachable at the configured endpoints")
    )]
    Unavailable(String),
}

impl From<etcd_client::Error> for StoreError {
    fn from(value: etcd_client::Error) -> Self {
        StoreError::Unavailable(value.to_string())
    }
}

/// Relationship-oracle failures. Never surfaced to permission-check
/// callers; the evaluator converts these to a denied relation.
#[derive(Debug, Error, Diagnostic)]
pub enum OracleError {
    #[error("relation check failed: {0}")]
    #[diagnostic(code(lodestar::oracle::transport))]
    Transport(String),
}

impl From<reqwest::Error> for OracleError {
    fn from(value: reqwest::Error) -> Self {
        OracleError::Transport(value.to_string())
    }
}

/// Rule-language failures, split by phase: `Parse` and `UnknownFunction`
/// happen at compile time, `Type` at evaluation time.
#[derive(Debug, Error, Diagnostic)]
pub enum RuleError {
    #[error("parse error: {0}")]
    #[diagnostic(
        code(lodestar::rules::parse),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !, in. Paths use dot notation (e.g. request.labels.env)")
    )]
    Parse(String),

    #[error("unknown function `{0}`")]
    #[diagnostic(
        code(lodestar::rules::unknown_function),
        help("Only rel(\"relation\") and full(\"relation\", object) may be called from a rule")
    )]
    UnknownFunction(String),

    #[error("type error: {0}")]
    #[diagnostic(code(lodestar::rules::type_mismatch))]
    Type(String),
}

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("configuration store unavailable: {0}")]
    #[diagnostic(code(lodestar::engine::store_unavailable))]
    StoreUnavailable(#[from] StoreError),

    #[error("namespace `{namespace}` not found")]
    #[diagnostic(
        code(lodestar::engine::namespace_not_found),
        help("Create the namespace with PUT /namespace/{{id}} before using it")
    )]
    NamespaceNotFound { namespace: String },

    #[error("malformed document `{key}`")]
    #[diagnostic(
        code(lodestar::engine::document_decode),
        help("The stored document is not valid JSON for the document schema; fix or re-save it")
    )]
    DocumentDecode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("evaluation context has no authorization store id")]
    #[diagnostic(
        code(lodestar::engine::missing_store_id),
        help("Set authorizationStoreId on the namespace record")
    )]
    MissingStoreId,

    #[error("rule `{rule}` failed to compile")]
    #[diagnostic(code(lodestar::engine::rule_compile))]
    RuleCompile {
        rule: String,
        #[source]
        source: RuleError,
    },

    #[error("rule `{rule}` failed to evaluate")]
    #[diagnostic(code(lodestar::engine::rule_runtime))]
    RuleRuntime {
        rule: String,
        #[source]
        source: RuleError,
    },

    #[error("serialization error: {0}")]
    #[diagnostic(code(lodestar::engine::encode))]
    Encode(#[from] serde_json::Error),
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            EngineError::NamespaceNotFound { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            EngineError::RuleCompile { .. } | EngineError::RuleRuntime { .. } => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
