//! Configuration structs for the three core subsystems. The (out-of-scope)
//! launcher is responsible for loading these from a config file or env vars;
//! here we only define their shape and sane defaults, in the style of
//! `kv-cli`'s `ConfigLoad` (serde-derived, `Default` impl, no parsing logic
//! baked into the struct itself).

use crate::model::NodeId;
use serde_derive::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Storage engine configuration input: `dbPath` (string or empty for
/// in-memory).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for on-disk storage; `None` selects the in-memory engine.
    pub db_path: Option<PathBuf>,

    /// How often the background garbage collector checks the live engine's
    /// garbage ratio.
    #[serde(with = "duration_secs")]
    pub compaction_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig { db_path: None, compaction_interval: Duration::from_secs(5 * 60) }
    }
}

/// Naming client configuration: coordination-store endpoints, the `cached`
/// flag, `SelfNodeId`, and the request timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingConfig {
    pub endpoints: Vec<String>,
    pub cached: bool,
    pub self_node_id: NodeId,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for NamingConfig {
    fn default() -> Self {
        NamingConfig {
            endpoints: vec!["127.0.0.1:2379".to_string()],
            cached: true,
            self_node_id: NodeId("self".to_string()),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Peering client configuration: cert, key, and CA file paths for mutual
/// TLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeeringConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub ca_file: PathBuf,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
