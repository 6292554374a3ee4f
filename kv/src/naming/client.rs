//! Cached facade over a `CoordinationStore`: keygroup status/mutability/
//! expiry, node membership, and user permissions.

use crate::config::NamingConfig;
use crate::error::CResult;
use crate::model::{KeygroupName, Method, NodeId};
use crate::naming::cache::NamingCache;
use crate::naming::coordination_store::CoordinationStore;
use crate::naming::key;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct NamingClient<C: CoordinationStore> {
    store: Arc<C>,
    cache: Option<Arc<NamingCache>>,
    config: NamingConfig,
}

impl<C: CoordinationStore + 'static> NamingClient<C> {
    pub fn new(store: C, config: NamingConfig) -> Self {
        let cache = config.cached.then(NamingCache::new).map(Arc::new);
        NamingClient { store: Arc::new(store), cache, config }
    }

    pub fn self_node_id(&self) -> &NodeId {
        &self.config.self_node_id
    }

    /// On a cache miss: fetches from the store, installs the result, and
    /// registers a single watch that evicts the entry on its first event
    /// (I4). On a hit: returns the cached map without touching the store.
    pub async fn get_prefix(&self, prefix: &str) -> CResult<BTreeMap<String, String>> {
        let Some(cache) = &self.cache else {
            return self.store.get_prefix(prefix).await;
        };
        if let Some(hit) = cache.get_prefix(prefix) {
            return Ok(hit);
        }

        let value = self.store.get_prefix(prefix).await?;
        cache.install_prefix(prefix, value.clone());
        self.spawn_prefix_watch(prefix.to_string());
        Ok(value)
    }

    pub async fn get_exact(&self, key: &str) -> CResult<Option<String>> {
        let Some(cache) = &self.cache else {
            return self.store.get(key).await;
        };
        if let Some(hit) = cache.get_exact(key) {
            return Ok(hit);
        }

        let value = self.store.get(key).await?;
        cache.install_exact(key, value.clone());
        self.spawn_exact_watch(key.to_string());
        Ok(value)
    }

    /// Evicts `key` and every prefix in `invalidate_prefixes` from the local
    /// cache *before* writing through to the store (I5).
    pub async fn put(&self, key: &str, value: &str, invalidate_prefixes: &[&str]) -> CResult<()> {
        self.invalidate(key, invalidate_prefixes);
        self.store.put(key, value).await
    }

    pub async fn delete(&self, key: &str, invalidate_prefixes: &[&str]) -> CResult<()> {
        self.invalidate(key, invalidate_prefixes);
        self.store.delete(key).await
    }

    fn invalidate(&self, key: &str, prefixes: &[&str]) {
        if let Some(cache) = &self.cache {
            cache.evict_exact(key);
            for prefix in prefixes {
                cache.evict_prefix(prefix);
            }
        }
    }

    fn spawn_prefix_watch(&self, prefix: String) {
        let (Some(cache), store) = (self.cache.clone(), self.store.clone()) else { return };
        tokio::spawn(async move {
            if let Ok(mut rx) = store.watch(&prefix).await {
                if rx.recv().await.is_some() {
                    cache.evict_prefix(&prefix);
                }
            }
        });
    }

    fn spawn_exact_watch(&self, key: String) {
        let (Some(cache), store) = (self.cache.clone(), self.store.clone()) else { return };
        tokio::spawn(async move {
            if let Ok(mut rx) = store.watch(&key).await {
                if rx.recv().await.is_some() {
                    cache.evict_exact(&key);
                }
            }
        });
    }

    // -- Permission domain helpers ------------------------------------

    pub async fn add_user_permissions(
        &self,
        user: &str,
        kg: &KeygroupName,
        methods: &[Method],
    ) -> CResult<()> {
        let prefix = key::permission_prefix(user, kg);
        for method in methods {
            let k = key::permission_key(user, kg, *method);
            self.put(&k, "granted", &[&prefix]).await?;
        }
        Ok(())
    }

    pub async fn revoke_user_permissions(
        &self,
        user: &str,
        kg: &KeygroupName,
        methods: &[Method],
    ) -> CResult<()> {
        let prefix = key::permission_prefix(user, kg);
        for method in methods {
            let k = key::permission_key(user, kg, *method);
            self.delete(&k, &[&prefix]).await?;
        }
        Ok(())
    }

    pub async fn get_user_permissions(
        &self,
        user: &str,
        kg: &KeygroupName,
    ) -> CResult<Vec<Method>> {
        let prefix = key::permission_prefix(user, kg);
        let entries = self.get_prefix(&prefix).await?;
        Ok(entries
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|m| m.parse().ok())
            .collect())
    }

    // -- Node membership helpers ---------------------------------------

    pub async fn add_own_kg_node_entry(&self, kg: &KeygroupName, expiry_seconds: i64) -> CResult<()> {
        let node = self.config.self_node_id.clone();
        self.add_kg_node_entry(kg, &node, expiry_seconds).await
    }

    pub async fn add_other_kg_node_entry(
        &self,
        kg: &KeygroupName,
        node: &NodeId,
        expiry_seconds: i64,
    ) -> CResult<()> {
        self.add_kg_node_entry(kg, node, expiry_seconds).await
    }

    async fn add_kg_node_entry(
        &self,
        kg: &KeygroupName,
        node: &NodeId,
        expiry_seconds: i64,
    ) -> CResult<()> {
        let prefix = key::node_prefix(kg);
        let k = key::node_key(kg, node);
        self.put(&k, &expiry_seconds.to_string(), &[&prefix]).await
    }

    pub async fn get_keygroup_nodes(&self, kg: &KeygroupName) -> CResult<Vec<NodeId>> {
        let prefix = key::node_prefix(kg);
        let entries = self.get_prefix(&prefix).await?;
        Ok(entries.keys().filter_map(|k| k.strip_prefix(&prefix)).map(|n| NodeId(n.to_string())).collect())
    }

    // -- Keygroup metadata helpers ---------------------------------------

    pub async fn add_kg_status_entry(&self, kg: &KeygroupName, status: &str) -> CResult<()> {
        let k = key::status_key(kg);
        self.put(&k, status, &[]).await
    }

    pub async fn get_keygroup_status(&self, kg: &KeygroupName) -> CResult<Option<String>> {
        self.get_exact(&key::status_key(kg)).await
    }

    pub async fn add_kg_mutable_entry(&self, kg: &KeygroupName, mutable: bool) -> CResult<()> {
        let k = key::mutable_key(kg);
        self.put(&k, &mutable.to_string(), &[]).await
    }

    pub async fn get_keygroup_mutable(&self, kg: &KeygroupName) -> CResult<Option<bool>> {
        Ok(self.get_exact(&key::mutable_key(kg)).await?.and_then(|v| v.parse().ok()))
    }

    pub async fn add_kg_expiry_entry(
        &self,
        kg: &KeygroupName,
        node: &NodeId,
        expiry_seconds: i64,
    ) -> CResult<()> {
        let prefix = key::expiry_prefix(kg);
        let k = key::expiry_key(kg, node);
        self.put(&k, &expiry_seconds.to_string(), &[&prefix]).await
    }

    pub async fn get_keygroup_expiry(&self, kg: &KeygroupName, node: &NodeId) -> CResult<Option<i64>> {
        Ok(self.get_exact(&key::expiry_key(kg, node)).await?.and_then(|v| v.parse().ok()))
    }
}
