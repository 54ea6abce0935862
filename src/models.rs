//! Wire and store records: namespaces, policy documents, and the
//! permission-check request body.
//!
//! Everything here is plain serde data in camelCase, matching what the
//! configuration store holds and what callers send over HTTP.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tenant record. Binds a namespace id to the relationship-store id used
/// for `rel`/`full` checks within that namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub authorization_store_id: String,
}

/// A named bundle of policies stored under one namespace. Several
/// documents may contribute policies to the same resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub ordinal: i64,
    // `namespace` is the field name in documents written by the legacy
    // store format; accepted on decode, never written.
    #[serde(default, alias = "namespace")]
    pub namespace_id: String,
    #[serde(default)]
    pub policies: Vec<Policy>,
}

/// One rule: grants `action` on resources of `resource_type` when `rule`
/// evaluates to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub action: String,
    pub resource_type: String,
    pub rule: String,
}

/// Permission-check request. Caller-supplied `policies` are evaluated in
/// addition to the cached ones, never instead of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsRequest {
    #[serde(default)]
    pub namespace_id: String,
    #[serde(default)]
    pub principal_id: String,
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub policies: Vec<Policy>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_namespace_wire_names() {
        let ns = Namespace {
            id: "acme".into(),
            authorization_store_id: "store1".into(),
        };
        let value = serde_json::to_value(&ns).unwrap();
        assert_eq!(
            value,
            json!({ "id": "acme", "authorizationStoreId": "store1" })
        );

        let back: Namespace = serde_json::from_value(value).unwrap();
        assert_eq!(back, ns);
    }

    #[test]
    fn test_namespace_missing_store_id_defaults_empty() {
        let ns: Namespace = serde_json::from_value(json!({ "id": "acme" })).unwrap();
        assert_eq!(ns.authorization_store_id, "");
    }

    #[test]
    fn test_document_defaults() {
        let doc: Document = serde_json::from_value(json!({
            "key": "doc1",
            "namespaceId": "acme"
        }))
        .unwrap();
        assert_eq!(doc.key, "doc1");
        assert_eq!(doc.namespace_id, "acme");
        assert_eq!(doc.ordinal, 0);
        assert!(doc.policies.is_empty());
    }

    #[test]
    fn test_document_accepts_legacy_namespace_field() {
        let doc: Document = serde_json::from_value(json!({
            "key": "doc1",
            "namespace": "acme",
            "policies": []
        }))
        .unwrap();
        assert_eq!(doc.namespace_id, "acme");

        // New writes always use the camelCase name.
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["namespaceId"], "acme");
        assert!(value.get("namespace").is_none());
    }

    #[test]
    fn test_policy_wire_names() {
        let policy: Policy = serde_json::from_value(json!({
            "action": "read",
            "resourceType": "document",
            "rule": "principalId == \"user:bob\""
        }))
        .unwrap();
        assert_eq!(policy.action, "read");
        assert_eq!(policy.resource_type, "document");

        let value = serde_json::to_value(&policy).unwrap();
        assert!(value.get("resourceType").is_some());
    }

    #[test]
    fn test_permissions_request_defaults() {
        let req: PermissionsRequest = serde_json::from_value(json!({
            "principalId": "user:bob",
            "resourceId": "document:123"
        }))
        .unwrap();
        assert_eq!(req.principal_id, "user:bob");
        assert_eq!(req.resource_id, "document:123");
        assert_eq!(req.namespace_id, "");
        assert!(req.context.is_empty());
        assert!(req.policies.is_empty());
    }

    #[test]
    fn test_permissions_request_carries_context() {
        let req: PermissionsRequest = serde_json::from_value(json!({
            "namespaceId": "acme",
            "principalId": "user:bob",
            "resourceId": "document:123",
            "context": { "labels": { "env": "prod" } }
        }))
        .unwrap();
        assert_eq!(req.context["labels"]["env"], "prod");
    }
}
