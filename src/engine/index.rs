//! Policy cache keyed by `{namespace}/{resourceType}`.

use dashmap::DashMap;

use crate::models::Policy;

/// Concurrent cache of serialized policy lists. Entries are overwritten
/// by refreshes and never removed.
#[derive(Debug, Default)]
pub struct PolicyIndex {
    entries: DashMap<String, Vec<u8>>,
}

fn entry_key(namespace: &str, resource_type: &str) -> String {
    format!("{namespace}/{resource_type}")
}

impl PolicyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &self,
        namespace: &str,
        resource_type: &str,
        policies: &[Policy],
    ) -> Result<(), serde_json::Error> {
        let encoded = serde_json::to_vec(policies)?;
        self.entries
            .insert(entry_key(namespace, resource_type), encoded);
        Ok(())
    }

    /// Decode the cached policies for a namespace and resource type. An
    /// entry that fails to decode reads as a miss.
    pub fn get(&self, namespace: &str, resource_type: &str) -> Option<Vec<Policy>> {
        let entry = self.entries.get(&entry_key(namespace, resource_type))?;
        match serde_json::from_slice(entry.value()) {
            Ok(policies) => Some(policies),
            Err(error) => {
                tracing::error!(namespace, resource_type, %error, "undecodable policy cache entry");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
