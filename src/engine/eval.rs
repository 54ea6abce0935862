//! Context assembly and policy execution for a single request.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::EngineError;
use crate::models::{PermissionsRequest, Policy};
use crate::oracle::RelationshipOracle;
use crate::rules::{self, RelationPredicates};

use super::{Engine, EngineStats};

/// Variables visible to rules for one evaluation. Always a JSON object;
/// `principalId`, `resourceId` and `storeId` are injected by the engine
/// and win over caller-supplied keys of the same name.
pub struct EvaluationContext {
    vars: Value,
}

impl EvaluationContext {
    pub fn new(vars: Map<String, Value>) -> Self {
        Self {
            vars: Value::Object(vars),
        }
    }

    pub fn store_id(&self) -> Option<&str> {
        self.vars.get("storeId").and_then(Value::as_str)
    }

    pub fn principal_id(&self) -> &str {
        self.vars
            .get("principalId")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn resource_id(&self) -> &str {
        self.vars
            .get("resourceId")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn vars(&self) -> &Value {
        &self.vars
    }
}

impl Engine {
    /// Resolve the request's namespace and assemble the rule context.
    pub async fn build_context(
        &self,
        request: &PermissionsRequest,
    ) -> Result<EvaluationContext, EngineError> {
        let namespace = self.get_namespace(&request.namespace_id).await?;
        let mut vars = request.context.clone();
        vars.insert(
            "principalId".to_string(),
            Value::String(request.principal_id.clone()),
        );
        vars.insert(
            "resourceId".to_string(),
            Value::String(request.resource_id.clone()),
        );
        vars.insert(
            "storeId".to_string(),
            Value::String(namespace.authorization_store_id.clone()),
        );
        Ok(EvaluationContext::new(vars))
    }

    /// Run every policy against the context and collect the actions whose
    /// rules granted. The first policy that fails to compile or evaluate
    /// fails the whole request.
    pub async fn execute(
        &self,
        context: &EvaluationContext,
        policies: &[Policy],
    ) -> Result<Vec<String>, EngineError> {
        let store_id = match context.store_id() {
            Some(id) if !id.is_empty() => id,
            _ => return Err(EngineError::MissingStoreId),
        };
        let binding = RelationBinding {
            store_id,
            principal_id: context.principal_id(),
            resource_id: context.resource_id(),
            oracle: self.oracle.as_ref(),
            stats: &self.stats,
        };

        let mut allowed = Vec::new();
        for policy in policies {
            let program =
                self.compiler
                    .compile(&policy.rule)
                    .map_err(|source| EngineError::RuleCompile {
                        rule: policy.rule.clone(),
                        source,
                    })?;
            let granted = rules::evaluate(&program, context.vars(), &binding)
                .await
                .map_err(|source| EngineError::RuleRuntime {
                    rule: policy.rule.clone(),
                    source,
                })?;
            if granted {
                allowed.push(policy.action.clone());
            }
        }
        Ok(allowed)
    }
}

/// Binds `rel`/`full` to the request's store, principal and resource.
/// Oracle failures deny the relation rather than failing the request.
pub(crate) struct RelationBinding<'a> {
    pub(crate) store_id: &'a str,
    pub(crate) principal_id: &'a str,
    pub(crate) resource_id: &'a str,
    pub(crate) oracle: &'a dyn RelationshipOracle,
    pub(crate) stats: &'a EngineStats,
}

impl RelationBinding<'_> {
    async fn check(&self, relation: &str, object: &str) -> bool {
        match self
            .oracle
            .check_relation(self.store_id, self.principal_id, relation, object)
            .await
        {
            Ok(allowed) => allowed,
            Err(error) => {
                self.stats.record_relation_check_failure();
                tracing::warn!(
                    store = self.store_id,
                    relation,
                    object,
                    %error,
                    "relation check failed, denying"
                );
                false
            }
        }
    }
}

#[async_trait]
impl RelationPredicates for RelationBinding<'_> {
    async fn rel(&self, relation: &str) -> bool {
        self.check(relation, self.resource_id).await
    }

    async fn full(&self, relation: &str, object: &str) -> bool {
        self.check(relation, object).await
    }
}
