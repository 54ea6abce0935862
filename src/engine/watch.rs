//! Watch loop keeping the policy cache in sync with document changes.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::store::StoreEvent;

use super::{Engine, DOCUMENT_PREFIX};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

impl Engine {
    /// Long-running loop: watch the document prefix and refresh the
    /// affected namespaces on every change. A lost watch is resubscribed
    /// after a short delay.
    pub async fn watcher(&self) {
        loop {
            let mut events = match self.store.watch_prefix(DOCUMENT_PREFIX).await {
                Ok(events) => events,
                Err(error) => {
                    tracing::warn!(%error, "document watch failed, retrying");
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    continue;
                }
            };
            while let Some(event) = events.recv().await {
                let pending = drain_pending(&event, &mut events);
                for namespace in &pending {
                    if let Err(error) = self.refresh_policy_cache(namespace).await {
                        tracing::warn!(%namespace, %error, "watch-triggered refresh failed");
                    }
                }
            }
            tracing::warn!("document watch stream ended, resubscribing");
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }
}

/// Collapse the queued events into the set of namespaces they touch, so
/// a burst of writes costs one refresh per namespace instead of one per
/// event.
fn drain_pending(first: &StoreEvent, events: &mut mpsc::Receiver<StoreEvent>) -> BTreeSet<String> {
    let mut pending = BTreeSet::new();
    if let Some(namespace) = namespace_of(&first.key) {
        pending.insert(namespace.to_string());
    }
    while let Ok(event) = events.try_recv() {
        if let Some(namespace) = namespace_of(&event.key) {
            pending.insert(namespace.to_string());
        }
    }
    pending
}

/// The namespace segment of a document key, e.g. `/docs/acme/doc1` →
/// `acme`.
fn namespace_of(key: &str) -> Option<&str> {
    key.strip_prefix(DOCUMENT_PREFIX)?
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(key: &str) -> StoreEvent {
        StoreEvent {
            key: key.to_string(),
            value: Vec::new(),
        }
    }

    #[test]
    fn test_namespace_of_document_key() {
        assert_eq!(namespace_of("/docs/acme/doc1"), Some("acme"));
        assert_eq!(namespace_of("/docs/acme/nested/doc"), Some("acme"));
    }

    #[test]
    fn test_namespace_of_rejects_foreign_and_empty_keys() {
        assert_eq!(namespace_of("/namespace/acme"), None);
        assert_eq!(namespace_of("/docs/"), None);
        assert_eq!(namespace_of("acme/doc1"), None);
    }

    #[tokio::test]
    async fn test_drain_pending_coalesces_by_namespace() {
        let (tx, mut rx) = mpsc::channel(16);
        tx.send(event("/docs/acme/doc1")).await.unwrap();
        tx.send(event("/docs/acme/doc2")).await.unwrap();
        tx.send(event("/docs/globex/doc1")).await.unwrap();
        tx.send(event("/docs/acme/doc3")).await.unwrap();

        let first = rx.recv().await.unwrap();
        let pending = drain_pending(&first, &mut rx);

        let namespaces: Vec<&str> = pending.iter().map(String::as_str).collect();
        assert_eq!(namespaces, vec!["acme", "globex"]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drain_pending_single_event() {
        let (tx, mut rx) = mpsc::channel(16);
        tx.send(event("/docs/acme/doc1")).await.unwrap();

        let first = rx.recv().await.unwrap();
        let pending = drain_pending(&first, &mut rx);
        assert_eq!(pending.len(), 1);
        assert!(pending.contains("acme"));
    }
}
