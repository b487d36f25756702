// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `etcd` backend for `MetaStore`, the backend RisingWave's own meta store
//! uses in production. Thin: every method maps to one etcd RPC, with no
//! caching or batching beyond what `multi_save`'s single `Txn` already gives.

use std::collections::HashMap;

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, GetOptions, PutOptions, Txn, TxnOp, WatchOptions};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{EventType, MetaStore, StoreResult, WatchEvent};

pub struct EtcdMetaStore {
    client: Client,
}

impl EtcdMetaStore {
    pub async fn connect(endpoints: &[String]) -> StoreResult<Self> {
        let client = Client::connect(endpoints, None).await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetaStore for EtcdMetaStore {
    async fn save(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.client.kv_client().put(key, value, None).await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let resp = self.client.kv_client().get(key, None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn load_with_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let resp = self
            .client
            .kv_client()
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| (kv.key_str().unwrap_or_default().to_owned(), kv.value().to_vec()))
            .collect())
    }

    async fn load_with_revision(&self, prefix: &str) -> StoreResult<(Vec<(String, Vec<u8>)>, i64)> {
        let resp = self
            .client
            .kv_client()
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or(0);
        let kvs = resp
            .kvs()
            .iter()
            .map(|kv| (kv.key_str().unwrap_or_default().to_owned(), kv.value().to_vec()))
            .collect();
        Ok((kvs, revision))
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.client.kv_client().delete(key, None).await?;
        Ok(())
    }

    async fn remove_with_prefix(&self, prefix: &str) -> StoreResult<()> {
        self.client
            .kv_client()
            .delete(prefix, Some(etcd_client::DeleteOptions::new().with_prefix()))
            .await?;
        Ok(())
    }

    async fn multi_save(&self, kvs: HashMap<String, Vec<u8>>) -> StoreResult<()> {
        let ops = kvs
            .into_iter()
            .map(|(k, v)| TxnOp::put(k, v, Some(PutOptions::new())))
            .collect::<Vec<_>>();
        self.client.kv_client().txn(Txn::new().and_then(ops)).await?;
        Ok(())
    }

    async fn compare_version_and_swap(&self, key: &str, version: i64, value: Vec<u8>) -> StoreResult<bool> {
        let txn = Txn::new()
            .when(vec![Compare::version(key, CompareOp::Equal, version)])
            .and_then(vec![TxnOp::put(key, value, None)]);
        let resp = self.client.kv_client().txn(txn).await?;
        Ok(resp.succeeded())
    }

    async fn watch_with_revision(
        &self,
        prefix: &str,
        revision: i64,
    ) -> StoreResult<ReceiverStream<WatchEvent>> {
        let (mut watcher, mut stream) = self
            .client
            .watch_client()
            .watch(
                prefix,
                Some(
                    WatchOptions::new()
                        .with_prefix()
                        .with_start_revision(revision + 1),
                ),
            )
            .await?;
        // Keep the watcher alive for the lifetime of the forwarding task; etcd
        // cancels server-side once it, and every clone, is dropped.
        let _ = watcher.watch_id();
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(async move {
            while let Ok(Some(resp)) = stream.message().await {
                for event in resp.events() {
                    let Some(kv) = event.kv() else { continue };
                    let event_type = match event.event_type() {
                        etcd_client::EventType::Put => EventType::Put,
                        etcd_client::EventType::Delete => EventType::Delete,
                    };
                    let forwarded = WatchEvent {
                        event_type,
                        key: kv.key_str().unwrap_or_default().to_owned(),
                        value: kv.value().to_vec(),
                    };
                    if tx.send(forwarded).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(ReceiverStream::new(rx))
    }
}
