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

//! The Channel Store (§4.2): the in-memory channel-to-node index, backed by a
//! write-through `MetaStore` so the index can be rebuilt after a restart. A
//! single `RwLock` over the whole index is the store's only hotspot, the same
//! shape the teacher's cluster and compactor managers use for their core
//! tables.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CoordError, CoordResult};
use crate::model::{ChannelName, NodeChannelInfo, NodeId, WatchInfo, BUFFER_ID};
use crate::storage::{channel_watch_key, MetaStore};

pub struct ChannelStore {
    prefix: String,
    meta: Arc<dyn MetaStore>,
    entries: RwLock<HashMap<ChannelName, (NodeId, WatchInfo)>>,
}

impl ChannelStore {
    pub fn new(prefix: impl Into<String>, meta: Arc<dyn MetaStore>) -> Self {
        Self {
            prefix: prefix.into(),
            meta,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuilds the in-memory index from the durable store. Returns the raw
    /// `(node, WatchInfo)` pairs too, so the Channel Manager's startup
    /// protocol (§4.3) can classify each one without a second read pass.
    pub async fn reload(&self) -> CoordResult<Vec<(NodeId, WatchInfo)>> {
        let kvs = self
            .meta
            .load_with_prefix(&self.prefix)
            .await
            .map_err(CoordError::StoreFailure)?;
        let mut loaded = Vec::with_capacity(kvs.len());
        let mut entries = HashMap::new();
        for (key, value) in kvs {
            let Some(node_id) = parse_node_id(&self.prefix, &key) else {
                continue;
            };
            let info: WatchInfo = serde_json::from_slice(&value).map_err(|e| CoordError::StoreFailure(e.into()))?;
            entries.insert(info.channel.name.clone(), (node_id, info.clone()));
            loaded.push((node_id, info));
        }
        *self.entries.write() = entries;
        Ok(loaded)
    }

    /// Writes `info` under `node`, both durably and in memory. Overwrites any
    /// prior assignment for the same channel name, including one held by a
    /// different node; the stale key under the old node is removed so a
    /// reload never resurrects it.
    pub async fn upsert(&self, node: NodeId, info: WatchInfo) -> CoordResult<()> {
        let previous_node = self.entries.read().get(&info.channel.name).map(|(n, _)| *n);
        let key = channel_watch_key(&self.prefix, node, &info.channel.name);
        let bytes = serde_json::to_vec(&info).map_err(|e| CoordError::StoreFailure(e.into()))?;
        self.meta.save(&key, bytes).await.map_err(CoordError::StoreFailure)?;
        if let Some(previous_node) = previous_node {
            if previous_node != node {
                let stale_key = channel_watch_key(&self.prefix, previous_node, &info.channel.name);
                self.meta.remove(&stale_key).await.map_err(CoordError::StoreFailure)?;
            }
        }
        self.entries.write().insert(info.channel.name.clone(), (node, info));
        Ok(())
    }

    /// Removes `channel`'s assignment entirely, wherever it currently lives.
    pub async fn delete(&self, channel: &str) -> CoordResult<()> {
        let node = {
            let mut entries = self.entries.write();
            entries.remove(channel).map(|(node, _)| node)
        };
        if let Some(node) = node {
            let key = channel_watch_key(&self.prefix, node, channel);
            self.meta.remove(&key).await.map_err(CoordError::StoreFailure)?;
        }
        Ok(())
    }

    pub fn get(&self, channel: &str) -> Option<(NodeId, WatchInfo)> {
        self.entries.read().get(channel).cloned()
    }

    /// The node currently holding `channel`, if any (§4.3's `FindWatcher`).
    pub fn get_node(&self, channel: &str) -> Option<NodeId> {
        self.entries.read().get(channel).map(|(node, _)| *node)
    }

    pub fn get_nodes(&self) -> Vec<NodeId> {
        self.entries
            .read()
            .values()
            .map(|(node, _)| *node)
            .filter(|n| *n != BUFFER_ID)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn get_nodes_channels(&self) -> HashMap<NodeId, HashSet<ChannelName>> {
        let mut out: HashMap<NodeId, HashSet<ChannelName>> = HashMap::new();
        for (channel, (node, _)) in self.entries.read().iter() {
            if *node == BUFFER_ID {
                continue;
            }
            out.entry(*node).or_default().insert(channel.clone());
        }
        out
    }

    pub fn get_buffer_channel_info(&self) -> NodeChannelInfo {
        let channels = self
            .entries
            .read()
            .iter()
            .filter(|(_, (node, _))| *node == BUFFER_ID)
            .map(|(channel, _)| channel.clone())
            .collect();
        NodeChannelInfo { channels }
    }

    pub fn get_node_channel_count(&self, node: NodeId) -> usize {
        self.entries.read().values().filter(|(n, _)| *n == node).count()
    }
}

fn parse_node_id(prefix: &str, key: &str) -> Option<NodeId> {
    key.strip_prefix(prefix)?
        .trim_start_matches('/')
        .split('/')
        .next()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, WatchState};
    use crate::storage::MemMetaStore;

    fn info(channel: Channel, state: WatchState) -> WatchInfo {
        WatchInfo {
            channel,
            state,
            deadline_ns: 0,
            vchannel_meta: Vec::new(),
        }
    }

    #[tokio::test]
    async fn upsert_then_get_node_round_trips() {
        let store = ChannelStore::new("chan", Arc::new(MemMetaStore::new()));
        let channel = Channel { name: "c1".into(), collection_id: 1 };
        store.upsert(7, info(channel.clone(), WatchState::ToWatch)).await.unwrap();
        assert_eq!(store.get_node("c1"), Some(7));
        assert_eq!(store.get_node_channel_count(7), 1);
    }

    #[tokio::test]
    async fn delete_removes_from_index_and_store() {
        let store = ChannelStore::new("chan", Arc::new(MemMetaStore::new()));
        let channel = Channel { name: "c1".into(), collection_id: 1 };
        store.upsert(7, info(channel.clone(), WatchState::ToWatch)).await.unwrap();
        store.delete("c1").await.unwrap();
        assert_eq!(store.get_node("c1"), None);
    }

    #[tokio::test]
    async fn reload_rebuilds_index_from_backing_store() {
        let meta = Arc::new(MemMetaStore::new());
        let store = ChannelStore::new("chan", meta.clone());
        let channel = Channel { name: "c1".into(), collection_id: 1 };
        store.upsert(7, info(channel.clone(), WatchState::WatchSuccess)).await.unwrap();

        let fresh = ChannelStore::new("chan", meta);
        let loaded = fresh.reload().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(fresh.get_node("c1"), Some(7));
    }

    #[tokio::test]
    async fn buffer_channels_are_excluded_from_get_nodes() {
        let store = ChannelStore::new("chan", Arc::new(MemMetaStore::new()));
        let buffered = Channel { name: "c2".into(), collection_id: 1 };
        store.upsert(BUFFER_ID, info(buffered.clone(), WatchState::ToWatch)).await.unwrap();
        assert!(store.get_nodes().is_empty());
        assert_eq!(store.get_buffer_channel_info().channels.len(), 1);
    }

    #[tokio::test]
    async fn reassigning_a_channel_to_a_new_node_moves_it() {
        let store = ChannelStore::new("chan", Arc::new(MemMetaStore::new()));
        let channel = Channel { name: "c1".into(), collection_id: 1 };
        store.upsert(1, info(channel.clone(), WatchState::WatchSuccess)).await.unwrap();
        store.upsert(2, info(channel.clone(), WatchState::ToWatch)).await.unwrap();
        assert_eq!(store.get_node("c1"), Some(2));
        assert_eq!(store.get_node_channel_count(1), 0);
    }
}
