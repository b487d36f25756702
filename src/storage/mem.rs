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

//! An in-process `MetaStore`. Used by every test in this crate and suitable as
//! a single-node embedding when no external store is wired up.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{EventType, MetaStore, StoreResult, WatchEvent};

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    version: i64,
}

struct Watcher {
    prefix: String,
    tx: mpsc::Sender<WatchEvent>,
}

/// In-memory `MetaStore`. A single write lock serialises all mutations, which
/// is sufficient to give the sole-source-of-truth guarantees §4.2 asks of the
/// Channel Store's caller; nothing below this trait needs to be lock-free.
#[derive(Default)]
pub struct MemMetaStore {
    tree: RwLock<BTreeMap<String, Entry>>,
    revision: AtomicI64,
    watchers: RwLock<Vec<Watcher>>,
}

impl MemMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> i64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, event: WatchEvent) {
        let watchers = self.watchers.read();
        for w in watchers.iter() {
            if event.key.starts_with(&w.prefix) {
                // Best effort: a full watcher channel means a slow consumer: drop
                // rather than block the write path holding no lock at this point.
                let _ = w.tx.try_send(event.clone());
            }
        }
    }
}

#[async_trait]
impl MetaStore for MemMetaStore {
    async fn save(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let rev = self.next_revision();
        self.tree.write().insert(
            key.to_owned(),
            Entry {
                value: value.clone(),
                version: rev,
            },
        );
        self.notify(WatchEvent {
            event_type: EventType::Put,
            key: key.to_owned(),
            value,
        });
        Ok(())
    }

    async fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.tree.read().get(key).map(|e| e.value.clone()))
    }

    async fn load_with_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .tree
            .read()
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }

    async fn load_with_revision(&self, prefix: &str) -> StoreResult<(Vec<(String, Vec<u8>)>, i64)> {
        let kvs = self.load_with_prefix(prefix).await?;
        Ok((kvs, self.revision.load(Ordering::SeqCst)))
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let existed = self.tree.write().remove(key).is_some();
        if existed {
            self.notify(WatchEvent {
                event_type: EventType::Delete,
                key: key.to_owned(),
                value: Vec::new(),
            });
        }
        Ok(())
    }

    async fn remove_with_prefix(&self, prefix: &str) -> StoreResult<()> {
        let removed: Vec<String> = {
            let mut tree = self.tree.write();
            let keys: Vec<String> = tree
                .range(prefix.to_owned()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect();
            for k in &keys {
                tree.remove(k);
            }
            keys
        };
        for key in removed {
            self.notify(WatchEvent {
                event_type: EventType::Delete,
                key,
                value: Vec::new(),
            });
        }
        Ok(())
    }

    async fn multi_save(&self, kvs: HashMap<String, Vec<u8>>) -> StoreResult<()> {
        let mut events = Vec::with_capacity(kvs.len());
        {
            let mut tree = self.tree.write();
            for (key, value) in kvs {
                let rev = self.next_revision();
                tree.insert(
                    key.clone(),
                    Entry {
                        value: value.clone(),
                        version: rev,
                    },
                );
                events.push(WatchEvent {
                    event_type: EventType::Put,
                    key,
                    value,
                });
            }
        }
        for event in events {
            self.notify(event);
        }
        Ok(())
    }

    async fn compare_version_and_swap(&self, key: &str, version: i64, value: Vec<u8>) -> StoreResult<bool> {
        let rev = self.next_revision();
        let mut tree = self.tree.write();
        let current_version = tree.get(key).map(|e| e.version).unwrap_or(0);
        if current_version != version {
            return Ok(false);
        }
        tree.insert(
            key.to_owned(),
            Entry {
                value: value.clone(),
                version: rev,
            },
        );
        drop(tree);
        self.notify(WatchEvent {
            event_type: EventType::Put,
            key: key.to_owned(),
            value,
        });
        Ok(true)
    }

    async fn watch_with_revision(
        &self,
        prefix: &str,
        _revision: i64,
    ) -> StoreResult<ReceiverStream<WatchEvent>> {
        let (tx, rx) = mpsc::channel(1024);
        self.watchers.write().push(Watcher {
            prefix: prefix.to_owned(),
            tx,
        });
        Ok(ReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_load_roundtrip() {
        let store = MemMetaStore::new();
        store.save("a/b", b"v1".to_vec()).await.unwrap();
        assert_eq!(store.load("a/b").await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn prefix_listing_is_scoped() {
        let store = MemMetaStore::new();
        store.save("p/1", b"x".to_vec()).await.unwrap();
        store.save("p/2", b"y".to_vec()).await.unwrap();
        store.save("q/1", b"z".to_vec()).await.unwrap();
        let under_p = store.load_with_prefix("p/").await.unwrap();
        assert_eq!(under_p.len(), 2);
    }

    #[tokio::test]
    async fn cas_fails_on_version_mismatch() {
        let store = MemMetaStore::new();
        store.save("k", b"v1".to_vec()).await.unwrap();
        let ok = store.compare_version_and_swap("k", 999, b"v2".to_vec()).await.unwrap();
        assert!(!ok);
        assert_eq!(store.load("k").await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn watch_receives_subsequent_writes() {
        let store = MemMetaStore::new();
        let mut stream = store.watch_with_revision("w/", 0).await.unwrap();
        store.save("w/a", b"1".to_vec()).await.unwrap();
        use tokio_stream::StreamExt;
        let ev = stream.next().await.unwrap();
        assert_eq!(ev.key, "w/a");
        assert_eq!(ev.event_type, EventType::Put);
    }
}
