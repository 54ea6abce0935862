//! The permissions engine: a policy cache synced from the config store
//! plus the request evaluation pipeline.

pub mod eval;
pub mod index;
pub mod watch;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::errors::EngineError;
use crate::models::{Document, Namespace, PermissionsRequest, Policy};
use crate::oracle::RelationshipOracle;
use crate::rules::RuleCompiler;
use crate::store::ConfigStore;

use index::PolicyIndex;

/// Key prefix for namespace records.
pub const NAMESPACE_PREFIX: &str = "/namespace/";
/// Key prefix for policy documents.
pub const DOCUMENT_PREFIX: &str = "/docs/";

pub fn namespace_key(id: &str) -> String {
    format!("{NAMESPACE_PREFIX}{id}")
}

pub fn document_key(namespace: &str, document: &str) -> String {
    format!("{DOCUMENT_PREFIX}{namespace}/{document}")
}

pub fn document_prefix(namespace: &str) -> String {
    format!("{DOCUMENT_PREFIX}{namespace}/")
}

/// Everything before the first `:` of a resource id, or the whole id
/// when there is no separator.
fn resource_type_of(resource_id: &str) -> &str {
    match resource_id.split_once(':') {
        Some((resource_type, _)) => resource_type,
        None => resource_id,
    }
}

/// Counters exposed for observability.
#[derive(Debug, Default)]
pub struct EngineStats {
    refreshes: AtomicU64,
    relation_check_failures: AtomicU64,
}

impl EngineStats {
    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn relation_check_failures(&self) -> u64 {
        self.relation_check_failures.load(Ordering::Relaxed)
    }

    fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_relation_check_failure(&self) {
        self.relation_check_failures.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Engine {
    store: Arc<dyn ConfigStore>,
    oracle: Arc<dyn RelationshipOracle>,
    index: PolicyIndex,
    compiler: RuleCompiler,
    stats: EngineStats,
}

impl Engine {
    pub fn new(store: Arc<dyn ConfigStore>, oracle: Arc<dyn RelationshipOracle>) -> Self {
        Self {
            store,
            oracle,
            index: PolicyIndex::new(),
            compiler: RuleCompiler::new(),
            stats: EngineStats::default(),
        }
    }

    pub fn index(&self) -> &PolicyIndex {
        &self.index
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Load a namespace record. A missing or undecodable record is an
    /// unknown namespace to callers.
    pub async fn get_namespace(&self, id: &str) -> Result<Namespace, EngineError> {
        let bytes = self
            .store
            .get(&namespace_key(id))
            .await?
            .ok_or_else(|| EngineError::NamespaceNotFound {
                namespace: id.to_string(),
            })?;
        match serde_json::from_slice(&bytes) {
            Ok(namespace) => Ok(namespace),
            Err(error) => {
                tracing::warn!(namespace = id, %error, "undecodable namespace record");
                Err(EngineError::NamespaceNotFound {
                    namespace: id.to_string(),
                })
            }
        }
    }

    pub async fn save_namespace(&self, namespace: &Namespace) -> Result<(), EngineError> {
        let encoded = serde_json::to_vec(namespace)?;
        self.store
            .put(&namespace_key(&namespace.id), encoded)
            .await?;
        Ok(())
    }

    pub async fn save_document(&self, document: &Document) -> Result<(), EngineError> {
        let encoded = serde_json::to_vec(document)?;
        self.store
            .put(&document_key(&document.namespace_id, &document.key), encoded)
            .await?;
        Ok(())
    }

    /// Rebuild the cache entries for one namespace from its documents.
    ///
    /// All documents are decoded before anything is written, so a corrupt
    /// document aborts the refresh and leaves the previous entries in
    /// place.
    pub async fn refresh_policy_cache(&self, namespace: &str) -> Result<(), EngineError> {
        let pairs = self.store.get_prefix(&document_prefix(namespace)).await?;

        let mut grouped: HashMap<String, Vec<Policy>> = HashMap::new();
        for pair in &pairs {
            let document: Document = serde_json::from_slice(&pair.value).map_err(|source| {
                EngineError::DocumentDecode {
                    key: pair.key.clone(),
                    source,
                }
            })?;
            for policy in document.policies {
                grouped
                    .entry(policy.resource_type.clone())
                    .or_default()
                    .push(policy);
            }
        }

        for (resource_type, policies) in &grouped {
            self.index.set(namespace, resource_type, policies)?;
        }
        self.stats.record_refresh();
        tracing::debug!(
            namespace,
            documents = pairs.len(),
            entries = grouped.len(),
            "policy cache refreshed"
        );
        Ok(())
    }

    /// Warm the cache at startup from every stored namespace. Failures
    /// are logged and skipped; the watcher catches the stragglers.
    pub async fn initial_load(&self) {
        let pairs = match self.store.get_prefix(NAMESPACE_PREFIX).await {
            Ok(pairs) => pairs,
            Err(error) => {
                tracing::error!(%error, "initial namespace scan failed");
                return;
            }
        };
        for pair in pairs {
            let namespace: Namespace = match serde_json::from_slice(&pair.value) {
                Ok(namespace) => namespace,
                Err(error) => {
                    tracing::warn!(key = %pair.key, %error, "skipping undecodable namespace record");
                    continue;
                }
            };
            if let Err(error) = self.refresh_policy_cache(&namespace.id).await {
                tracing::warn!(namespace = %namespace.id, %error, "initial refresh failed");
            }
        }
    }

    /// Evaluate a permissions request: caller-supplied policies first,
    /// then the cached policies for the resource's type.
    pub async fn process_engine_request(
        &self,
        request: &PermissionsRequest,
    ) -> Result<Vec<String>, EngineError> {
        let resource_type = resource_type_of(&request.resource_id);
        let mut policies = request.policies.clone();
        if let Some(cached) = self.index.get(&request.namespace_id, resource_type) {
            policies.extend(cached);
        }
        let context = self.build_context(request).await?;
        self.execute(&context, &policies).await
    }
}
