//! `CoordinationStore` backed by an etcd v3 cluster, the coordination store
//! assumed by the original FReD deployment model.

use crate::error::{CResult, Error};
use crate::naming::coordination_store::{CoordinationStore, WatchEvent, WatchReceiver};
use async_trait::async_trait;
use etcd_client::{Client, GetOptions, WatchOptions};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct EtcdCoordinationStore {
    client: Client,
    timeout: Duration,
}

impl EtcdCoordinationStore {
    pub async fn connect(endpoints: &[String], timeout: Duration) -> CResult<Self> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|err| Error::Unavailable(format!("connecting to coordination store: {}", err)))?;
        Ok(EtcdCoordinationStore { client, timeout })
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, etcd_client::Error>>,
    ) -> CResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::Unavailable(format!("coordination store call failed: {}", err))),
            Err(_) => Err(Error::Unavailable("coordination store call timed out".to_string())),
        }
    }
}

#[async_trait]
impl CoordinationStore for EtcdCoordinationStore {
    async fn put(&self, key: &str, value: &str) -> CResult<()> {
        let mut client = self.client.clone();
        self.with_timeout(client.put(key, value, None)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> CResult<Option<String>> {
        let mut client = self.client.clone();
        let resp = self.with_timeout(client.get(key, None)).await?;
        match resp.kvs().first() {
            Some(kv) => Ok(Some(
                kv.value_str()
                    .map_err(|err| Error::internal("decoding coordination store value", err))?
                    .to_string(),
            )),
            None => Ok(None),
        }
    }

    async fn get_prefix(&self, prefix: &str) -> CResult<BTreeMap<String, String>> {
        let mut client = self.client.clone();
        let opts = GetOptions::new().with_prefix().with_sort(
            etcd_client::SortTarget::Key,
            etcd_client::SortOrder::Ascend,
        );
        let resp = self.with_timeout(client.get(prefix, Some(opts))).await?;
        let mut out = BTreeMap::new();
        for kv in resp.kvs() {
            let key = kv.key_str().map_err(|err| Error::internal("decoding key", err))?;
            let value = kv.value_str().map_err(|err| Error::internal("decoding value", err))?;
            out.insert(key.to_string(), value.to_string());
        }
        Ok(out)
    }

    async fn delete(&self, key: &str) -> CResult<()> {
        let mut client = self.client.clone();
        self.with_timeout(client.delete(key, None)).await?;
        Ok(())
    }

    async fn watch(&self, key_or_prefix: &str) -> CResult<WatchReceiver> {
        let mut client = self.client.clone();
        let opts = WatchOptions::new().with_prefix();
        let (mut watcher, mut stream) = client
            .watch(key_or_prefix, Some(opts))
            .await
            .map_err(|err| Error::Unavailable(format!("registering watch: {}", err)))?;

        let (tx, rx) = mpsc::channel(1);
        let key_or_prefix = key_or_prefix.to_string();
        tokio::spawn(async move {
            loop {
                match stream.message().await {
                    Ok(Some(resp)) if !resp.events().is_empty() => {
                        if tx.send(WatchEvent).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(err) => {
                        log::error!("watch on {} failed: {}", key_or_prefix, err);
                        break;
                    }
                }
            }
            let _ = watcher.cancel().await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_fails_against_an_unreachable_endpoint() {
        // Port 1 on loopback: nothing listens there, so the dial fails
        // fast with connection-refused rather than hanging until timeout.
        let result =
            EtcdCoordinationStore::connect(&["127.0.0.1:1".to_string()], Duration::from_secs(2))
                .await;
        assert!(result.is_err());
    }
}
