//! The interface Naming consumes from a strongly-consistent coordination
//! store. This core specifies only the shape of that interface; the store
//! itself (etcd, in production) is an external collaborator.

use crate::error::CResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// A single coordination-store change notification. Carries no payload:
/// watchers exist only to drive cache invalidation (I4), not to stream
/// values.
pub struct WatchEvent;

pub type WatchReceiver = mpsc::Receiver<WatchEvent>;

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> CResult<()>;

    async fn get(&self, key: &str) -> CResult<Option<String>>;

    /// All `(key, value)` pairs whose key starts with `prefix`, sorted by
    /// key ascending.
    async fn get_prefix(&self, prefix: &str) -> CResult<BTreeMap<String, String>>;

    async fn delete(&self, key: &str) -> CResult<()>;

    /// Registers a watch on `key_or_prefix`. The returned channel yields one
    /// `WatchEvent` per change; callers are expected to act on the first
    /// event and then drop the receiver (single-shot, per I4).
    async fn watch(&self, key_or_prefix: &str) -> CResult<WatchReceiver>;
}

/// In-memory `CoordinationStore`, used to test `NamingClient` without a
/// live etcd cluster.
pub mod memory {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryCoordinationStore {
        data: Mutex<BTreeMap<String, String>>,
        watchers: Mutex<Vec<(String, mpsc::Sender<WatchEvent>)>>,
    }

    impl InMemoryCoordinationStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn notify(&self, key: &str) {
            let mut watchers = self.watchers.lock().unwrap();
            watchers.retain(|(pattern, tx)| {
                if key.starts_with(pattern.as_str()) {
                    tx.try_send(WatchEvent).is_ok()
                } else {
                    true
                }
            });
        }
    }

    #[async_trait]
    impl CoordinationStore for InMemoryCoordinationStore {
        async fn put(&self, key: &str, value: &str) -> CResult<()> {
            self.data.lock().unwrap().insert(key.to_string(), value.to_string());
            self.notify(key);
            Ok(())
        }

        async fn get(&self, key: &str) -> CResult<Option<String>> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn get_prefix(&self, prefix: &str) -> CResult<BTreeMap<String, String>> {
            Ok(self
                .data
                .lock()
                .unwrap()
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }

        async fn delete(&self, key: &str) -> CResult<()> {
            self.data.lock().unwrap().remove(key);
            self.notify(key);
            Ok(())
        }

        async fn watch(&self, key_or_prefix: &str) -> CResult<WatchReceiver> {
            let (tx, rx) = mpsc::channel(1);
            self.watchers.lock().unwrap().push((key_or_prefix.to_string(), tx));
            Ok(rx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryCoordinationStore;
    use super::*;

    #[tokio::test]
    async fn put_then_get_exact_returns_the_written_value() {
        let store = InMemoryCoordinationStore::new();
        store.put("kg|a|status", "ready").await.unwrap();
        assert_eq!(store.get("kg|a|status").await.unwrap(), Some("ready".to_string()));
    }

    #[tokio::test]
    async fn get_prefix_returns_everything_under_the_prefix_in_order() {
        let store = InMemoryCoordinationStore::new();
        store.put("kg|a|node|1", "x").await.unwrap();
        store.put("kg|a|node|2", "y").await.unwrap();
        store.put("kg|b|node|1", "z").await.unwrap();

        let got = store.get_prefix("kg|a|node|").await.unwrap();
        let expect: BTreeMap<String, String> = [
            ("kg|a|node|1".to_string(), "x".to_string()),
            ("kg|a|node|2".to_string(), "y".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(got, expect);
    }

    #[tokio::test]
    async fn a_watch_fires_on_a_matching_write() {
        let store = InMemoryCoordinationStore::new();
        let mut rx = store.watch("kg|a|").await.unwrap();
        store.put("kg|a|status", "ready").await.unwrap();
        assert!(rx.recv().await.is_some());
    }
}
