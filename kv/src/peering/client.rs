//! Authenticated RPC client to peer nodes. A single process-wide pool maps
//! `host -> connection`; connections are created on first use and retained
//! until process exit. Mutual TLS is mandatory.

use crate::config::PeeringConfig;
use crate::error::{CResult, Error};
use crate::fred_proto::peering_client::PeeringClient as GrpcPeeringClient;
use crate::fred_proto::{
    AddReplicaRequest, AppendItemRequest, CreateKeygroupRequest, DeleteItemRequest,
    DeleteKeygroupRequest, GetAllItemsRequest, GetItemRequest, PutItemRequest,
    RemoveReplicaRequest,
};
use crate::model::{Item, ItemId, KeygroupName, Node, NodeId};
use std::collections::HashMap;
use std::sync::Mutex;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

type Connection = GrpcPeeringClient<Channel>;

/// Mutually-authenticated, connection-pooled peering client. `Destroy` is
/// intentionally not modeled: connections live for the process's lifetime.
pub struct PeeringClient {
    tls: ClientTlsConfig,
    pool: Mutex<HashMap<String, Connection>>,
}

impl PeeringClient {
    /// Loads the client cert/key and CA file and builds the shared TLS
    /// credentials object. The CA pool is the configured CA only here; the
    /// system pool is merged in by `ClientTlsConfig::with_native_roots`.
    pub async fn new(config: &PeeringConfig) -> CResult<Self> {
        let cert = tokio::fs::read(&config.cert_file)
            .await
            .map_err(|err| Error::internal("reading peering client cert", err))?;
        let key = tokio::fs::read(&config.key_file)
            .await
            .map_err(|err| Error::internal("reading peering client key", err))?;
        let ca = tokio::fs::read(&config.ca_file)
            .await
            .map_err(|err| Error::internal("reading peering CA", err))?;

        let identity = Identity::from_pem(cert, key);
        let ca_cert = Certificate::from_pem(ca);

        let tls = ClientTlsConfig::new()
            .identity(identity)
            .ca_certificate(ca_cert)
            .with_native_roots();

        Ok(PeeringClient { tls, pool: Mutex::new(HashMap::new()) })
    }

    async fn connection(&self, host: &str) -> CResult<Connection> {
        if let Some(conn) = self.pool.lock().expect("peering pool mutex poisoned").get(host) {
            return Ok(conn.clone());
        }

        let endpoint = Endpoint::from_shared(format!("https://{}", host))
            .map_err(|err| Error::internal(format!("invalid peer address {}", host), err))?
            .tls_config(self.tls.clone())
            .map_err(|err| Error::internal("configuring peer TLS", err))?;
        let channel = endpoint.connect().await?;
        let conn = GrpcPeeringClient::new(channel);

        self.pool.lock().expect("peering pool mutex poisoned").insert(host.to_string(), conn.clone());
        Ok(conn)
    }

    pub async fn send_create_keygroup(
        &self,
        host: &str,
        kg: &KeygroupName,
        expiry_seconds: i64,
    ) -> CResult<()> {
        self.connection(host)
            .await?
            .create_keygroup(CreateKeygroupRequest {
                keygroup: kg.to_string(),
                expiry_seconds,
            })
            .await?;
        Ok(())
    }

    pub async fn send_delete_keygroup(&self, host: &str, kg: &KeygroupName) -> CResult<()> {
        self.connection(host)
            .await?
            .delete_keygroup(DeleteKeygroupRequest { keygroup: kg.to_string() })
            .await?;
        Ok(())
    }

    pub async fn send_update(
        &self,
        host: &str,
        kg: &KeygroupName,
        id: &ItemId,
        value: &str,
        expiry_seconds: i64,
    ) -> CResult<()> {
        self.connection(host)
            .await?
            .put_item(PutItemRequest {
                keygroup: kg.to_string(),
                id: id.to_string(),
                value: value.to_string(),
                expiry_seconds,
            })
            .await?;
        Ok(())
    }

    /// `id` is the id the local node already reserved; the peer applies it
    /// with append semantics rather than minting its own (§4.1 `append`).
    pub async fn send_append(
        &self,
        host: &str,
        kg: &KeygroupName,
        id: &ItemId,
        value: &str,
        expiry_seconds: i64,
    ) -> CResult<()> {
        self.connection(host)
            .await?
            .append_item(AppendItemRequest {
                keygroup: kg.to_string(),
                id: id.to_string(),
                value: value.to_string(),
                expiry_seconds,
            })
            .await?;
        Ok(())
    }

    pub async fn send_delete(&self, host: &str, kg: &KeygroupName, id: &ItemId) -> CResult<()> {
        self.connection(host)
            .await?
            .delete_item(DeleteItemRequest { keygroup: kg.to_string(), id: id.to_string() })
            .await?;
        Ok(())
    }

    pub async fn send_add_replica(
        &self,
        host: &str,
        kg: &KeygroupName,
        node: &Node,
        expiry_seconds: i64,
    ) -> CResult<()> {
        self.connection(host)
            .await?
            .add_replica(AddReplicaRequest {
                keygroup: kg.to_string(),
                node_id: node.id.to_string(),
                expiry_seconds,
            })
            .await?;
        Ok(())
    }

    pub async fn send_remove_replica(
        &self,
        host: &str,
        kg: &KeygroupName,
        node: &NodeId,
    ) -> CResult<()> {
        self.connection(host)
            .await?
            .remove_replica(RemoveReplicaRequest { keygroup: kg.to_string(), node_id: node.to_string() })
            .await?;
        Ok(())
    }

    pub async fn send_get_item(&self, host: &str, kg: &KeygroupName, id: &ItemId) -> CResult<Item> {
        let resp = self
            .connection(host)
            .await?
            .get_item(GetItemRequest { keygroup: kg.to_string(), id: id.to_string() })
            .await?;
        Ok(Item { keygroup: kg.clone(), id: id.clone(), val: resp.into_inner().value })
    }

    pub async fn send_get_all_items(&self, host: &str, kg: &KeygroupName) -> CResult<Vec<Item>> {
        let resp = self
            .connection(host)
            .await?
            .get_all_items(GetAllItemsRequest { keygroup: kg.to_string() })
            .await?
            .into_inner();

        resp.items
            .into_iter()
            .map(|item| {
                Ok(Item {
                    keygroup: kg.clone(),
                    id: ItemId::new(item.id)?,
                    val: item.value,
                })
            })
            .collect()
    }
}
