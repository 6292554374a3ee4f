//! Control glue: the thin dispatcher that authorizes a request against N,
//! validates it against N, applies it locally via S, and fans it out via P
//! to the keygroup's other replicas. The zmq-style message demultiplexer
//! that would sit in front of this (decoding wire requests into these
//! calls) is external to the core; `Handler` is the interface it dispatches
//! into.

use crate::config::{PeeringConfig, StorageConfig};
use crate::error::{CResult, Error};
use crate::model::{Item, ItemId, KeygroupName, Method, Node, NodeId};
use crate::naming::coordination_store::CoordinationStore;
use crate::naming::NamingClient;
use crate::peering::PeeringClient;
use crate::storage::engine::Engine;
use crate::storage::kvstore::{run_background_compaction, KvStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[async_trait]
pub trait Handler {
    async fn create_keygroup(
        &self,
        user: &str,
        kg: &KeygroupName,
        mutable: bool,
        expiry_seconds: i64,
    ) -> CResult<()>;

    async fn delete_keygroup(&self, user: &str, kg: &KeygroupName) -> CResult<()>;

    async fn read(&self, user: &str, kg: &KeygroupName, id: &ItemId) -> CResult<String>;

    async fn read_all(&self, user: &str, kg: &KeygroupName) -> CResult<Vec<Item>>;

    async fn update(
        &self,
        user: &str,
        kg: &KeygroupName,
        id: &ItemId,
        value: &str,
        expiry_seconds: i64,
    ) -> CResult<()>;

    async fn append(
        &self,
        user: &str,
        kg: &KeygroupName,
        value: &str,
        expiry_seconds: i64,
    ) -> CResult<ItemId>;

    async fn delete(&self, user: &str, kg: &KeygroupName, id: &ItemId) -> CResult<()>;

    async fn add_replica(
        &self,
        user: &str,
        kg: &KeygroupName,
        node: &Node,
        expiry_seconds: i64,
    ) -> CResult<()>;

    async fn remove_replica(&self, user: &str, kg: &KeygroupName, node: &NodeId) -> CResult<()>;
}

/// Composes the storage engine, naming client, and peering client behind
/// the `Handler` interface.
pub struct FredNode<E: Engine + 'static, C: CoordinationStore + 'static> {
    storage: KvStore<E>,
    naming: NamingClient<C>,
    peering: Arc<PeeringClient>,
    /// `NodeId -> Node` directory, populated as `AddReplica` calls observe
    /// hosts. Naming only tracks membership by id; the host to dial is
    /// this node's own bookkeeping.
    directory: Mutex<HashMap<NodeId, Node>>,
}

impl<E: Engine + 'static, C: CoordinationStore + 'static> FredNode<E, C> {
    pub async fn new(
        storage: KvStore<E>,
        naming: NamingClient<C>,
        peering_config: &PeeringConfig,
        storage_config: &StorageConfig,
    ) -> CResult<Self> {
        let peering = Arc::new(PeeringClient::new(peering_config).await?);
        tokio::spawn(run_background_compaction(storage.clone(), storage_config.compaction_interval));
        Ok(FredNode { storage, naming, peering, directory: Mutex::new(HashMap::new()) })
    }

    async fn authorize(&self, user: &str, kg: &KeygroupName, method: Method) -> CResult<()> {
        let perms = self.naming.get_user_permissions(user, kg).await?;
        if perms.contains(&method) {
            Ok(())
        } else {
            Err(Error::PermissionDenied(format!("{} may not {} on {}", user, method, kg)))
        }
    }

    async fn require_mutable(&self, kg: &KeygroupName) -> CResult<()> {
        match self.naming.get_keygroup_mutable(kg).await? {
            Some(true) | None => Ok(()),
            Some(false) => {
                Err(Error::BadKey(format!("{} is append-only; use Append, not Update", kg)))
            }
        }
    }

    /// Other replicas of `kg`, excluding the local node.
    async fn replica_hosts(&self, kg: &KeygroupName) -> CResult<Vec<String>> {
        let nodes = self.naming.get_keygroup_nodes(kg).await?;
        let self_id = self.naming.self_node_id().clone();
        let directory = self.directory.lock().expect("replica directory mutex poisoned");
        Ok(nodes
            .into_iter()
            .filter(|id| *id != self_id)
            .filter_map(|id| directory.get(&id))
            .map(|node| format!("{}:{}", node.host, node.port))
            .collect())
    }

    /// Fan-out failures are logged, not propagated: peer unreachability is
    /// not this node's failure to apply the operation locally, and
    /// automatic failure detection of peers is out of scope.
    fn log_fanout_error(kg: &KeygroupName, host: &str, err: Error) {
        log::error!("fan-out to {} for keygroup {} failed: {}", host, kg, err);
    }
}

#[async_trait]
impl<E: Engine + 'static, C: CoordinationStore + 'static> Handler for FredNode<E, C> {
    async fn create_keygroup(
        &self,
        user: &str,
        kg: &KeygroupName,
        mutable: bool,
        expiry_seconds: i64,
    ) -> CResult<()> {
        self.authorize(user, kg, Method::CreateKeygroup).await?;
        self.storage.create_keygroup(kg)?;
        self.naming.add_kg_status_entry(kg, "ready").await?;
        self.naming.add_kg_mutable_entry(kg, mutable).await?;
        self.naming.add_own_kg_node_entry(kg, expiry_seconds).await?;

        for host in self.replica_hosts(kg).await? {
            if let Err(err) = self.peering.send_create_keygroup(&host, kg, expiry_seconds).await {
                Self::log_fanout_error(kg, &host, err);
            }
        }
        Ok(())
    }

    async fn delete_keygroup(&self, user: &str, kg: &KeygroupName) -> CResult<()> {
        self.authorize(user, kg, Method::DeleteKeygroup).await?;
        let hosts = self.replica_hosts(kg).await?;
        self.storage.delete_keygroup(kg)?;

        for host in hosts {
            if let Err(err) = self.peering.send_delete_keygroup(&host, kg).await {
                Self::log_fanout_error(kg, &host, err);
            }
        }
        Ok(())
    }

    async fn read(&self, user: &str, kg: &KeygroupName, id: &ItemId) -> CResult<String> {
        self.authorize(user, kg, Method::Read).await?;
        self.storage.read(kg, id)
    }

    async fn read_all(&self, user: &str, kg: &KeygroupName) -> CResult<Vec<Item>> {
        self.authorize(user, kg, Method::Read).await?;
        Ok(self
            .storage
            .read_all(kg)?
            .into_iter()
            .map(|(id, val)| Item { keygroup: kg.clone(), id: ItemId::new(id).unwrap(), val })
            .collect())
    }

    async fn update(
        &self,
        user: &str,
        kg: &KeygroupName,
        id: &ItemId,
        value: &str,
        expiry_seconds: i64,
    ) -> CResult<()> {
        self.authorize(user, kg, Method::Update).await?;
        self.require_mutable(kg).await?;
        self.storage.update(kg, id, value, false, expiry_seconds)?;

        for host in self.replica_hosts(kg).await? {
            if let Err(err) = self.peering.send_update(&host, kg, id, value, expiry_seconds).await {
                Self::log_fanout_error(kg, &host, err);
            }
        }
        Ok(())
    }

    async fn append(
        &self,
        user: &str,
        kg: &KeygroupName,
        value: &str,
        expiry_seconds: i64,
    ) -> CResult<ItemId> {
        self.authorize(user, kg, Method::Append).await?;
        let id = self.storage.append(kg, value, expiry_seconds)?;

        for host in self.replica_hosts(kg).await? {
            if let Err(err) = self.peering.send_append(&host, kg, &id, value, expiry_seconds).await {
                Self::log_fanout_error(kg, &host, err);
            }
        }
        Ok(id)
    }

    async fn delete(&self, user: &str, kg: &KeygroupName, id: &ItemId) -> CResult<()> {
        self.authorize(user, kg, Method::Delete).await?;
        self.storage.delete(kg, id)?;

        for host in self.replica_hosts(kg).await? {
            if let Err(err) = self.peering.send_delete(&host, kg, id).await {
                Self::log_fanout_error(kg, &host, err);
            }
        }
        Ok(())
    }

    async fn add_replica(
        &self,
        user: &str,
        kg: &KeygroupName,
        node: &Node,
        expiry_seconds: i64,
    ) -> CResult<()> {
        self.authorize(user, kg, Method::AddReplica).await?;
        self.directory.lock().expect("replica directory mutex poisoned").insert(node.id.clone(), node.clone());
        self.naming.add_other_kg_node_entry(kg, &node.id, expiry_seconds).await?;

        let host = format!("{}:{}", node.host, node.port);
        if let Err(err) = self.peering.send_add_replica(&host, kg, node, expiry_seconds).await {
            Self::log_fanout_error(kg, &host, err);
        }
        Ok(())
    }

    async fn remove_replica(&self, user: &str, kg: &KeygroupName, node: &NodeId) -> CResult<()> {
        self.authorize(user, kg, Method::RemoveReplica).await?;
        let host = self
            .directory
            .lock()
            .expect("replica directory mutex poisoned")
            .get(node)
            .map(|n| format!("{}:{}", n.host, n.port));

        self.naming.delete(&crate::naming::key::node_key(kg, node), &[&crate::naming::key::node_prefix(kg)]).await?;

        if let Some(host) = host {
            if let Err(err) = self.peering.send_remove_replica(&host, kg, node).await {
                Self::log_fanout_error(kg, &host, err);
            }
        }
        Ok(())
    }
}
