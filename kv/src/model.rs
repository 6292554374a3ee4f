//! Core data model: keygroups, items, nodes, triggers, and the permission
//! tuple. Mirrors the FReD `fred` package's domain types (see
//! `peering::client::SendCreateKeygroup` etc. for their original shape).

use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// A non-empty, `|`-free keygroup name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeygroupName(String);

impl KeygroupName {
    pub fn new(name: impl Into<String>) -> crate::error::CResult<Self> {
        let name = name.into();
        validate_key_part(&name)?;
        Ok(KeygroupName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeygroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque item identifier. For append-only keygroups this is the decimal
/// form of a monotonic 64-bit counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> crate::error::CResult<Self> {
        let id = id.into();
        validate_key_part(&id)?;
        Ok(ItemId(id))
    }

    pub fn from_sequence(n: u64) -> Self {
        ItemId(n.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses this id as the decimal form of a 64-bit sequence value, per
    /// the append-only keygroup convention.
    pub fn as_u64(&self) -> crate::error::CResult<u64> {
        self.0
            .parse()
            .map_err(|_| crate::error::Error::BadKey(format!("id is not numeric: {}", self.0)))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_key_part(s: &str) -> crate::error::CResult<()> {
    if s.is_empty() {
        return Err(crate::error::Error::BadKey("identifier must not be empty".into()));
    }
    if s.contains('|') {
        return Err(crate::error::Error::BadKey(format!(
            "identifier must not contain '|': {}",
            s
        )));
    }
    Ok(())
}

/// `(KeygroupName, ItemId, Value)`. Value is an opaque UTF-8 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub keygroup: KeygroupName,
    pub id: ItemId,
    pub val: String,
}

/// A node in the FReD deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `(KeygroupName, TriggerId, Host)`; fire-on-change endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub keygroup: KeygroupName,
    pub id: String,
    pub host: String,
}

/// Permission verbs. Presence of the `(User, KeygroupName, Method)` tuple
/// grants; absence denies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    CreateKeygroup,
    DeleteKeygroup,
    Read,
    Update,
    Delete,
    Append,
    AddReplica,
    RemoveReplica,
    GetReplica,
    AddTrigger,
    RemoveTrigger,
    GetTrigger,
}

impl Method {
    pub const ALL: [Method; 12] = [
        Method::CreateKeygroup,
        Method::DeleteKeygroup,
        Method::Read,
        Method::Update,
        Method::Delete,
        Method::Append,
        Method::AddReplica,
        Method::RemoveReplica,
        Method::GetReplica,
        Method::AddTrigger,
        Method::RemoveTrigger,
        Method::GetTrigger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::CreateKeygroup => "CreateKeygroup",
            Method::DeleteKeygroup => "DeleteKeygroup",
            Method::Read => "Read",
            Method::Update => "Update",
            Method::Delete => "Delete",
            Method::Append => "Append",
            Method::AddReplica => "AddReplica",
            Method::RemoveReplica => "RemoveReplica",
            Method::GetReplica => "GetReplica",
            Method::AddTrigger => "AddTrigger",
            Method::RemoveTrigger => "RemoveTrigger",
            Method::GetTrigger => "GetTrigger",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| crate::error::Error::BadKey(format!("unknown method: {}", s)))
    }
}

/// `(User, KeygroupName, Method)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    pub user: String,
    pub keygroup: KeygroupName,
    pub method: Method,
}
