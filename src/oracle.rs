//! Relationship oracle: delegated `rel`/`full` checks against an
//! OpenFGA-compatible store.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::OracleError;

#[async_trait]
pub trait RelationshipOracle: Send + Sync + 'static {
    /// Ask whether `subject` has `relation` on `object` in the given
    /// authorization store.
    async fn check_relation(
        &self,
        store_id: &str,
        subject: &str,
        relation: &str,
        object: &str,
    ) -> Result<bool, OracleError>;
}

/// HTTP client for the OpenFGA check API.
#[derive(Debug, Clone)]
pub struct OpenFgaOracle {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    tuple_key: TupleKey<'a>,
}

#[derive(Debug, Serialize)]
struct TupleKey<'a> {
    user: &'a str,
    relation: &'a str,
    object: &'a str,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    allowed: bool,
}

impl OpenFgaOracle {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RelationshipOracle for OpenFgaOracle {
    async fn check_relation(
        &self,
        store_id: &str,
        subject: &str,
        relation: &str,
        object: &str,
    ) -> Result<bool, OracleError> {
        let url = format!("{}/stores/{}/check", self.base_url, store_id);
        let body = CheckRequest {
            tuple_key: TupleKey {
                user: subject,
                relation,
                object,
            },
        };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let check: CheckResponse = resp.json().await?;
        tracing::debug!(
            store = store_id,
            subject,
            relation,
            object,
            allowed = check.allowed,
            "relation check"
        );
        Ok(check.allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_check_relation_allowed() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/stores/store1/check").json_body(json!({
                    "tuple_key": {
                        "user": "user:bob",
                        "relation": "viewer",
                        "object": "document:123"
                    }
                }));
                then.status(200).json_body(json!({ "allowed": true }));
            })
            .await;

        let oracle = OpenFgaOracle::new(&server.base_url(), Duration::from_secs(1)).unwrap();
        let allowed = oracle
            .check_relation("store1", "user:bob", "viewer", "document:123")
            .await
            .unwrap();
        assert!(allowed);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_check_relation_denied() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/stores/store1/check");
                then.status(200).json_body(json!({ "allowed": false }));
            })
            .await;

        let oracle = OpenFgaOracle::new(&server.base_url(), Duration::from_secs(1)).unwrap();
        let allowed = oracle
            .check_relation("store1", "user:eve", "viewer", "document:123")
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn test_check_relation_missing_allowed_field_defaults_to_denied() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/stores/store1/check");
                then.status(200).json_body(json!({}));
            })
            .await;

        let oracle = OpenFgaOracle::new(&server.base_url(), Duration::from_secs(1)).unwrap();
        let allowed = oracle
            .check_relation("store1", "user:bob", "viewer", "document:123")
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn test_check_relation_server_error_is_transport_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/stores/store1/check");
                then.status(500);
            })
            .await;

        let oracle = OpenFgaOracle::new(&server.base_url(), Duration::from_secs(1)).unwrap();
        let result = oracle
            .check_relation("store1", "user:bob", "viewer", "document:123")
            .await;
        assert!(matches!(result, Err(OracleError::Transport(_))));
    }

    #[tokio::test]
    async fn test_base_url_trailing_slash_is_normalized() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/stores/store1/check");
                then.status(200).json_body(json!({ "allowed": true }));
            })
            .await;

        let url = format!("{}/", server.base_url());
        let oracle = OpenFgaOracle::new(&url, Duration::from_secs(1)).unwrap();
        oracle
            .check_relation("store1", "user:bob", "viewer", "document:123")
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
