//! Key shapes for the naming service's `|`-separated keyspace. Decided by
//! Naming, independent of the storage engine's own key shapes (§4.1 vs
//! §4.2): the two components never share a keyspace, so there is no
//! collision concern between them.

use crate::model::{KeygroupName, Method, NodeId};

pub fn status_key(kg: &KeygroupName) -> String {
    format!("kg|{}|status", kg)
}

pub fn mutable_key(kg: &KeygroupName) -> String {
    format!("kg|{}|mutable", kg)
}

pub fn expiry_key(kg: &KeygroupName, node: &NodeId) -> String {
    format!("kg|{}|expiry|{}", kg, node)
}

pub fn expiry_prefix(kg: &KeygroupName) -> String {
    format!("kg|{}|expiry|", kg)
}

pub fn node_key(kg: &KeygroupName, node: &NodeId) -> String {
    format!("kg|{}|node|{}", kg, node)
}

pub fn node_prefix(kg: &KeygroupName) -> String {
    format!("kg|{}|node|", kg)
}

pub fn permission_key(user: &str, kg: &KeygroupName, method: Method) -> String {
    format!("user|{}|kg|{}|method|{}", user, kg, method)
}

pub fn permission_prefix(user: &str, kg: &KeygroupName) -> String {
    format!("user|{}|kg|{}|method|", user, kg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes_match_the_documented_layout() {
        let kg = KeygroupName::new("kg1").unwrap();
        let node = NodeId("n1".to_string());
        assert_eq!(status_key(&kg), "kg|kg1|status");
        assert_eq!(mutable_key(&kg), "kg|kg1|mutable");
        assert_eq!(expiry_key(&kg, &node), "kg|kg1|expiry|n1");
        assert_eq!(node_key(&kg, &node), "kg|kg1|node|n1");
        assert_eq!(
            permission_key("alice", &kg, Method::Read),
            "user|alice|kg|kg1|method|Read"
        );
        assert_eq!(permission_prefix("alice", &kg), "user|alice|kg|kg1|method|");
    }
}
