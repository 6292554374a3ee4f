//! Write-through cache enforcing I4: a watch fires at most once and, on
//! firing, evicts the entry it guards before exiting. Re-installation only
//! happens on the next miss, so concurrent misses on the same key MAY
//! install more than one watch (permitted by §5; not deduped here).

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
pub struct NamingCache {
    prefixes: Mutex<HashMap<String, BTreeMap<String, String>>>,
    exact: Mutex<HashMap<String, Option<String>>>,
}

impl NamingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_prefix(&self, prefix: &str) -> Option<BTreeMap<String, String>> {
        self.prefixes.lock().unwrap().get(prefix).cloned()
    }

    pub fn install_prefix(&self, prefix: &str, value: BTreeMap<String, String>) {
        self.prefixes.lock().unwrap().insert(prefix.to_string(), value);
    }

    pub fn evict_prefix(&self, prefix: &str) {
        self.prefixes.lock().unwrap().remove(prefix);
    }

    pub fn get_exact(&self, key: &str) -> Option<Option<String>> {
        self.exact.lock().unwrap().get(key).cloned()
    }

    pub fn install_exact(&self, key: &str, value: Option<String>) {
        self.exact.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn evict_exact(&self, key: &str) {
        self.exact.lock().unwrap().remove(key);
    }
}
