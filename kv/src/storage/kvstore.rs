//! `KvStore` is the FReD-facing storage facade: it owns one `Engine`, the
//! per-keygroup sequence table, and the key-shape encoding described for the
//! storage engine. Everything in this file is single-process state; cross-
//! node replication is the peering client's job, not this one's.

use crate::error::{CResult, Error};
use crate::model::{ItemId, KeygroupName};
use crate::storage::engine::Engine;
use crate::storage::sequence::Sequence;
use byteorder::ByteOrder;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The bytes actually stored under an item key: the caller's value plus an
/// optional absolute expiration. The engine itself has no notion of TTL, so
/// this envelope is encoded/decoded transparently by `KvStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredValue {
    expires_at: Option<u64>,
    data: Vec<u8>,
}

impl StoredValue {
    fn encode(&self) -> CResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn decode(bytes: &[u8]) -> CResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs()
}

// Key shapes, see storage engine design: the three metadata families are
// prefixed with a leading `|`, which a bare `<kg>` can never start with
// since keygroup names are validated to never contain `|`.

fn item_key(kg: &KeygroupName, id: &str) -> Vec<u8> {
    format!("{}|{}", kg.as_str(), id).into_bytes()
}

fn item_prefix(kg: &KeygroupName) -> Vec<u8> {
    format!("{}|", kg.as_str()).into_bytes()
}

fn keygroup_marker_key(kg: &KeygroupName) -> Vec<u8> {
    format!("|fred|keygroup|{}", kg.as_str()).into_bytes()
}

fn trigger_key(kg: &KeygroupName, tid: &str) -> Vec<u8> {
    format!("|fred|triggers|{}|{}", kg.as_str(), tid).into_bytes()
}

fn trigger_prefix(kg: &KeygroupName) -> Vec<u8> {
    format!("|fred|triggers|{}|", kg.as_str()).into_bytes()
}

fn rolling_key(kg: &KeygroupName) -> Vec<u8> {
    format!("|fred|rolling|{}", kg.as_str()).into_bytes()
}

/// Facade over a pluggable `Engine` implementing the FReD storage
/// operations: keygroup lifecycle, item CRUD with TTL, append sequences,
/// and trigger bookkeeping. Cheap to clone; clones share the same engine
/// and sequence table.
pub struct KvStore<E: Engine> {
    engine: Arc<Mutex<E>>,
    sequences: Mutex<HashMap<KeygroupName, Arc<Sequence>>>,
}

impl<E: Engine> Clone for KvStore<E> {
    fn clone(&self) -> Self {
        KvStore { engine: self.engine.clone(), sequences: Mutex::new(HashMap::new()) }
    }
}

impl<E: Engine> KvStore<E> {
    pub fn new(engine: E) -> Self {
        KvStore { engine: Arc::new(Mutex::new(engine)), sequences: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, E> {
        self.engine.lock().expect("storage engine mutex poisoned")
    }

    /// Returns the in-memory `Sequence` handle for `kg`, initializing it
    /// from the durable rolling mark if one exists, or a fresh zero-start
    /// sequence otherwise. The `kg -> Sequence` table itself is serialized
    /// by `sequences`'s own mutex; `Sequence::next`/`advance_past` hand out
    /// ids lock-free once the handle is in hand.
    fn sequence_for(&self, kg: &KeygroupName) -> CResult<Arc<Sequence>> {
        let mut sequences = self.sequences.lock().expect("sequence table mutex poisoned");
        if let Some(seq) = sequences.get(kg) {
            return Ok(seq.clone());
        }

        let mark = match self.lock().get(&rolling_key(kg))? {
            Some(bytes) => byteorder::BigEndian::read_u64(&bytes),
            None => 0,
        };
        let seq = Arc::new(Sequence::with_reservation(mark, mark));
        sequences.insert(kg.clone(), seq.clone());
        Ok(seq)
    }

    fn persist_mark(&self, kg: &KeygroupName, mark: u64) -> CResult<()> {
        let mut buf = [0u8; 8];
        byteorder::BigEndian::write_u64(&mut buf, mark);
        self.lock().set(&rolling_key(kg), buf.to_vec())
    }

    /// Writes the existence marker and reserves the first window of
    /// sequence ids. Idempotent: re-creating an existing keygroup overwrites
    /// the marker and reuses its sequence, if any.
    pub fn create_keygroup(&self, kg: &KeygroupName) -> CResult<()> {
        self.lock().set(&keygroup_marker_key(kg), vec![])?;

        let mut sequences = self.sequences.lock().expect("sequence table mutex poisoned");
        if !sequences.contains_key(kg) {
            let mark = match self.lock().get(&rolling_key(kg))? {
                Some(bytes) => byteorder::BigEndian::read_u64(&bytes),
                None => {
                    self.persist_mark(kg, crate::storage::sequence::RESERVATION)?;
                    crate::storage::sequence::RESERVATION
                }
            };
            sequences.insert(kg.clone(), Arc::new(Sequence::with_reservation(0, mark)));
        }
        Ok(())
    }

    pub fn exists_keygroup(&self, kg: &KeygroupName) -> CResult<bool> {
        Ok(self.lock().get(&keygroup_marker_key(kg))?.is_some())
    }

    /// Marker delete, then item batch-delete, then trigger batch-delete,
    /// then sequence release -- as a sequence of independent operations,
    /// not a single transaction (see concurrency notes on `DeleteKeygroup`).
    pub fn delete_keygroup(&self, kg: &KeygroupName) -> CResult<()> {
        if !self.exists_keygroup(kg)? {
            return Err(Error::not_found("keygroup", kg));
        }
        self.lock().delete(&keygroup_marker_key(kg))?;

        let item_keys: Vec<Vec<u8>> = {
            let mut engine = self.lock();
            engine.scan_prefix(&item_prefix(kg)).map(|r| r.map(|(k, _)| k)).collect::<CResult<_>>()?
        };
        for key in item_keys {
            self.lock().delete(&key)?;
        }

        let trigger_keys: Vec<Vec<u8>> = {
            let mut engine = self.lock();
            engine
                .scan_prefix(&trigger_prefix(kg))
                .map(|r| r.map(|(k, _)| k))
                .collect::<CResult<_>>()?
        };
        for key in trigger_keys {
            self.lock().delete(&key)?;
        }

        self.lock().delete(&rolling_key(kg))?;
        self.sequences.lock().expect("sequence table mutex poisoned").remove(kg);
        Ok(())
    }

    pub fn read(&self, kg: &KeygroupName, id: &ItemId) -> CResult<String> {
        let bytes = self
            .lock()
            .get(&item_key(kg, id.as_str()))?
            .ok_or_else(|| Error::not_found("item", format!("{}|{}", kg, id)))?;
        let stored = StoredValue::decode(&bytes)?;
        if stored.is_expired(now_unix()) {
            return Err(Error::not_found("item", format!("{}|{}", kg, id)));
        }
        Ok(String::from_utf8_lossy(&stored.data).into_owned())
    }

    /// Ordered prefix scan beginning at `<kg>|<startId>` (inclusive),
    /// yielding at most `count` non-expired items that still share the
    /// `<kg>|` prefix.
    pub fn read_some(
        &self,
        kg: &KeygroupName,
        start_id: &ItemId,
        count: usize,
    ) -> CResult<BTreeMap<String, String>> {
        let start = item_key(kg, start_id.as_str());
        let now = now_unix();
        let mut engine = self.lock();
        let mut out = BTreeMap::new();
        for entry in engine.scan_prefix(&item_prefix(kg)) {
            let (key, value) = entry?;
            if key < start {
                continue;
            }
            if out.len() >= count {
                break;
            }
            let stored = StoredValue::decode(&value)?;
            if stored.is_expired(now) {
                continue;
            }
            out.insert(id_suffix(kg, &key), String::from_utf8_lossy(&stored.data).into_owned());
        }
        Ok(out)
    }

    pub fn read_all(&self, kg: &KeygroupName) -> CResult<BTreeMap<String, String>> {
        let now = now_unix();
        let mut engine = self.lock();
        let mut out = BTreeMap::new();
        for entry in engine.scan_prefix(&item_prefix(kg)) {
            let (key, value) = entry?;
            let stored = StoredValue::decode(&value)?;
            if stored.is_expired(now) {
                continue;
            }
            out.insert(id_suffix(kg, &key), String::from_utf8_lossy(&stored.data).into_owned());
        }
        Ok(out)
    }

    pub fn ids(&self, kg: &KeygroupName) -> CResult<Vec<String>> {
        let now = now_unix();
        let mut engine = self.lock();
        let mut out = vec![];
        for entry in engine.scan_prefix(&item_prefix(kg)) {
            let (key, value) = entry?;
            let stored = StoredValue::decode(&value)?;
            if stored.is_expired(now) {
                continue;
            }
            out.push(id_suffix(kg, &key));
        }
        Ok(out)
    }

    /// Writes `value` under `<kg>|<id>`. When `append` is set, advances the
    /// keygroup's sequence past `id` so later `Append` calls never collide
    /// with an externally pre-computed id (e.g. an incoming replicated
    /// write) -- see I2.
    pub fn update(
        &self,
        kg: &KeygroupName,
        id: &ItemId,
        value: &str,
        append: bool,
        expiry_seconds: i64,
    ) -> CResult<()> {
        let expires_at =
            if expiry_seconds > 0 { Some(now_unix() + expiry_seconds as u64) } else { None };
        let stored = StoredValue { expires_at, data: value.as_bytes().to_vec() };
        self.lock().set(&item_key(kg, id.as_str()), stored.encode()?)?;

        if append {
            let seq = self.sequence_for(kg)?;
            let kg = kg.clone();
            seq.advance_past(id.as_u64()?, |mark| self.persist_mark(&kg, mark))?;
        }
        Ok(())
    }

    /// Reserves the next sequence value, writes the item, and returns the
    /// minted id. Unique under concurrent callers on the same keygroup (I2).
    pub fn append(&self, kg: &KeygroupName, value: &str, expiry_seconds: i64) -> CResult<ItemId> {
        let seq = self.sequence_for(kg)?;
        let kg_owned = kg.clone();
        let n = seq.next(|mark| self.persist_mark(&kg_owned, mark))?;

        let expires_at =
            if expiry_seconds > 0 { Some(now_unix() + expiry_seconds as u64) } else { None };
        let stored = StoredValue { expires_at, data: value.as_bytes().to_vec() };
        self.lock().set(&item_key(kg, &n.to_string()), stored.encode()?)?;

        Ok(ItemId::from_sequence(n))
    }

    /// Deleting a missing item is not an error.
    pub fn delete(&self, kg: &KeygroupName, id: &ItemId) -> CResult<()> {
        self.lock().delete(&item_key(kg, id.as_str()))
    }

    pub fn exists(&self, kg: &KeygroupName, id: &ItemId) -> CResult<bool> {
        match self.lock().get(&item_key(kg, id.as_str()))? {
            None => Ok(false),
            Some(bytes) => Ok(!StoredValue::decode(&bytes)?.is_expired(now_unix())),
        }
    }

    pub fn add_keygroup_trigger(&self, kg: &KeygroupName, tid: &str, host: &str) -> CResult<()> {
        self.lock().set(&trigger_key(kg, tid), host.as_bytes().to_vec())
    }

    pub fn delete_keygroup_trigger(&self, kg: &KeygroupName, tid: &str) -> CResult<()> {
        self.lock().delete(&trigger_key(kg, tid))
    }

    /// Skips entries whose parsed trigger id is empty, defending against the
    /// bare prefix key itself ever being matched by a scan.
    pub fn get_keygroup_trigger(&self, kg: &KeygroupName) -> CResult<BTreeMap<String, String>> {
        let prefix = trigger_prefix(kg);
        let mut engine = self.lock();
        let mut out = BTreeMap::new();
        for entry in engine.scan_prefix(&prefix) {
            let (key, value) = entry?;
            let tid = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            if tid.is_empty() {
                continue;
            }
            out.insert(tid, String::from_utf8_lossy(&value).into_owned());
        }
        Ok(out)
    }

    pub fn status(&self) -> CResult<crate::storage::Status> {
        self.lock().status()
    }

    /// Runs a single compaction pass, unconditionally.
    pub fn compact(&self) -> CResult<()> {
        self.lock().compact()
    }

    pub fn garbage_ratio(&self) -> CResult<f64> {
        self.lock().garbage_ratio()
    }
}

fn id_suffix(kg: &KeygroupName, key: &[u8]) -> String {
    let prefix_len = item_prefix(kg).len();
    String::from_utf8_lossy(&key[prefix_len..]).into_owned()
}

/// Discard-ratio target above which a background sweep actually compacts,
/// rather than merely checking.
const GC_DISCARD_RATIO: f64 = 0.7;

/// Periodic value-log garbage collection, mirroring the original storage
/// engine's GC goroutine: wake every `interval`, and if the live engine
/// reports enough garbage, compact it. Purely operational; has no visible
/// effect on any contract.
pub async fn run_background_compaction<E: Engine + 'static>(
    store: KvStore<E>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let ratio = match store.garbage_ratio() {
            Ok(ratio) => ratio,
            Err(err) => {
                log::error!("garbage collection: failed to read garbage ratio: {}", err);
                continue;
            }
        };
        if ratio < GC_DISCARD_RATIO {
            continue;
        }
        log::info!("garbage collection: compacting, garbage ratio {:.2}", ratio);
        if let Err(err) = store.compact() {
            log::error!("garbage collection: compaction failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::Memory;

    fn kg(name: &str) -> KeygroupName {
        KeygroupName::new(name).unwrap()
    }

    fn id(n: &str) -> ItemId {
        ItemId::new(n).unwrap()
    }

    fn store() -> KvStore<Memory> {
        KvStore::new(Memory::new())
    }

    #[test]
    fn keygroup_lifecycle() {
        let s = store();
        let k = kg("kg");
        assert!(!s.exists_keygroup(&k).unwrap());
        s.create_keygroup(&k).unwrap();
        assert!(s.exists_keygroup(&k).unwrap());
        s.delete_keygroup(&k).unwrap();
        assert!(!s.exists_keygroup(&k).unwrap());
    }

    #[test]
    fn create_keygroup_is_idempotent() {
        let s = store();
        let k = kg("kg");
        s.create_keygroup(&k).unwrap();
        s.update(&k, &id("x"), "v", false, 0).unwrap();
        s.create_keygroup(&k).unwrap();
        assert_eq!(s.read(&k, &id("x")).unwrap(), "v");
    }

    #[test]
    fn delete_keygroup_purges_items_triggers_and_sequence() {
        let s = store();
        let k = kg("kg1");
        s.create_keygroup(&k).unwrap();
        s.append(&k, "v1", 0).unwrap();
        s.add_keygroup_trigger(&k, "t3", "3.3.3.3:3000").unwrap();

        s.delete_keygroup(&k).unwrap();

        assert!(!s.exists_keygroup(&k).unwrap());
        assert!(s.read_all(&k).unwrap().is_empty());
        assert!(s.get_keygroup_trigger(&k).unwrap().is_empty());
        assert!(s.delete_keygroup(&k).is_err());
    }

    #[test]
    fn delete_keygroup_on_missing_keygroup_is_not_found() {
        let s = store();
        assert!(matches!(s.delete_keygroup(&kg("ghost")), Err(Error::NotFound(_))));
    }

    #[test]
    fn scan_window_returns_the_requested_slice() {
        let s = store();
        let k = kg("scan");
        s.create_keygroup(&k).unwrap();
        for i in 0..10 {
            s.update(&k, &id(&format!("id{}", i)), &format!("val{}", i), false, 0).unwrap();
        }

        let window = s.read_some(&k, &id("id3"), 5).unwrap();
        let expect: BTreeMap<String, String> = (3..8)
            .map(|i| (format!("id{}", i), format!("val{}", i)))
            .collect();
        assert_eq!(window, expect);
    }

    #[test]
    fn append_is_monotonic_and_unique_within_one_caller() {
        let s = store();
        let k = kg("log");
        s.create_keygroup(&k).unwrap();
        assert_eq!(s.append(&k, "v1", 0).unwrap().as_str(), "0");
        assert_eq!(s.append(&k, "v2", 0).unwrap().as_str(), "1");
        for i in 2..100 {
            assert_eq!(s.append(&k, "v", 0).unwrap().as_str(), i.to_string());
        }
    }

    #[test]
    fn concurrent_appenders_never_collide() {
        let s = store();
        let k = kg("logc");
        s.create_keygroup(&k).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = s.clone();
                let k = k.clone();
                std::thread::spawn(move || {
                    (0..98).map(|_| s.append(&k, "v", 0).unwrap().as_u64().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        assert_eq!(all.len(), 392);
        all.sort_unstable();
        let before = all.len();
        all.dedup();
        assert_eq!(all.len(), before);
    }

    #[test]
    fn trigger_set_management() {
        let s = store();
        let k = kg("kg1");
        s.create_keygroup(&k).unwrap();

        s.add_keygroup_trigger(&k, "t1", "1.1.1.1:3000").unwrap();
        s.add_keygroup_trigger(&k, "t1", "1.1.1.1:3000").unwrap();
        s.add_keygroup_trigger(&k, "t2", "2.2.2.2:3000").unwrap();

        let expect: BTreeMap<String, String> = [
            ("t1".to_string(), "1.1.1.1:3000".to_string()),
            ("t2".to_string(), "2.2.2.2:3000".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(s.get_keygroup_trigger(&k).unwrap(), expect);

        s.delete_keygroup_trigger(&k, "t1").unwrap();
        let expect: BTreeMap<String, String> =
            [("t2".to_string(), "2.2.2.2:3000".to_string())].into_iter().collect();
        assert_eq!(s.get_keygroup_trigger(&k).unwrap(), expect);
    }

    #[test]
    fn expired_items_are_invisible_without_a_write() {
        let s = store();
        let k = kg("kg");
        s.create_keygroup(&k).unwrap();
        s.update(&k, &id("k"), "v", false, 10).unwrap();
        assert_eq!(s.read(&k, &id("k")).unwrap(), "v");

        // Simulate the deadline passing by writing an already-expired entry
        // directly, rather than sleeping in a test.
        let stored = StoredValue { expires_at: Some(0), data: b"v".to_vec() };
        s.lock().set(&item_key(&k, "k"), stored.encode().unwrap()).unwrap();

        assert!(matches!(s.read(&k, &id("k")), Err(Error::NotFound(_))));
        assert!(s.read_all(&k).unwrap().is_empty());
        assert!(!s.exists(&k, &id("k")).unwrap());
    }

    #[test]
    fn delete_on_missing_item_is_a_no_op() {
        let s = store();
        let k = kg("kg");
        s.create_keygroup(&k).unwrap();
        assert!(s.delete(&k, &id("missing")).is_ok());
    }
}
