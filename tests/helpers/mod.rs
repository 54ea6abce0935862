#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;

use lodestar::errors::OracleError;
use lodestar::models::{Document, Namespace, PermissionsRequest, Policy};
use lodestar::oracle::RelationshipOracle;

/// One relation check as the oracle saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCheck {
    pub store_id: String,
    pub subject: String,
    pub relation: String,
    pub object: String,
}

/// Relationship oracle double: grants a fixed set of (relation, object)
/// pairs and records every check it receives.
pub struct FakeOracle {
    granted: Vec<(String, String)>,
    checks: Mutex<Vec<RecordedCheck>>,
    fail: bool,
}

impl FakeOracle {
    pub fn granting(pairs: &[(&str, &str)]) -> Self {
        Self {
            granted: pairs
                .iter()
                .map(|(relation, object)| (relation.to_string(), object.to_string()))
                .collect(),
            checks: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn denying() -> Self {
        Self::granting(&[])
    }

    /// Every check fails with a transport error.
    pub fn failing() -> Self {
        Self {
            granted: Vec::new(),
            checks: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.checks.lock().unwrap().len()
    }

    pub fn recorded(&self) -> Vec<RecordedCheck> {
        self.checks.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelationshipOracle for FakeOracle {
    async fn check_relation(
        &self,
        store_id: &str,
        subject: &str,
        relation: &str,
        object: &str,
    ) -> Result<bool, OracleError> {
        self.checks.lock().unwrap().push(RecordedCheck {
            store_id: store_id.to_string(),
            subject: subject.to_string(),
            relation: relation.to_string(),
            object: object.to_string(),
        });
        if self.fail {
            return Err(OracleError::Transport("simulated outage".to_string()));
        }
        Ok(self
            .granted
            .iter()
            .any(|(r, o)| r == relation && o == object))
    }
}

pub fn namespace(id: &str, store_id: &str) -> Namespace {
    Namespace {
        id: id.to_string(),
        authorization_store_id: store_id.to_string(),
    }
}

pub fn policy(action: &str, resource_type: &str, rule: &str) -> Policy {
    Policy {
        action: action.to_string(),
        resource_type: resource_type.to_string(),
        rule: rule.to_string(),
    }
}

pub fn document(key: &str, namespace_id: &str, policies: Vec<Policy>) -> Document {
    Document {
        key: key.to_string(),
        ordinal: 0,
        namespace_id: namespace_id.to_string(),
        policies,
    }
}

pub fn request(namespace_id: &str, principal_id: &str, resource_id: &str) -> PermissionsRequest {
    PermissionsRequest {
        namespace_id: namespace_id.to_string(),
        principal_id: principal_id.to_string(),
        resource_id: resource_id.to_string(),
        ..PermissionsRequest::default()
    }
}
