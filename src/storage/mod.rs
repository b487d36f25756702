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

//! The metadata store capability (§6): a linearizable key-value service with
//! prefix listing, revision-watch, and compare-and-swap. Treated as an opaque
//! collaborator elsewhere in the crate; this module only fixes the trait shape
//! and ships two implementations to drive it.

mod etcd;
mod mem;

use std::collections::HashMap;

use async_trait::async_trait;
pub use etcd::EtcdMetaStore;
pub use mem::MemMetaStore;

pub type StoreResult<T> = anyhow::Result<T>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Put,
    Delete,
}

#[derive(Clone, Debug)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub key: String,
    pub value: Vec<u8>,
}

/// The metadata store capability consumed by the Channel Store and the
/// segment-metadata façade (§6). Every method is a suspension point (§5).
#[async_trait]
pub trait MetaStore: Send + Sync + 'static {
    async fn save(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    async fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn load_with_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// Same as `load_with_prefix` but also returns the revision the snapshot was
    /// taken at, so a caller can immediately `watch_with_revision` from there
    /// without missing or double-delivering events (§4.3 startup protocol).
    async fn load_with_revision(&self, prefix: &str) -> StoreResult<(Vec<(String, Vec<u8>)>, i64)>;

    async fn remove(&self, key: &str) -> StoreResult<()>;

    async fn remove_with_prefix(&self, prefix: &str) -> StoreResult<()>;

    async fn multi_save(&self, kvs: HashMap<String, Vec<u8>>) -> StoreResult<()>;

    /// Succeeds and writes `value` only if the key's current version equals
    /// `version` (0 meaning "must not exist").
    async fn compare_version_and_swap(&self, key: &str, version: i64, value: Vec<u8>) -> StoreResult<bool>;

    /// A stream of every key's latest value under `prefix`, starting after
    /// `revision`, delivered in per-key order (§4.3).
    async fn watch_with_revision(
        &self,
        prefix: &str,
        revision: i64,
    ) -> StoreResult<tokio_stream::wrappers::ReceiverStream<WatchEvent>>;
}

pub fn channel_watch_key(prefix: &str, node_id: crate::model::NodeId, channel: &str) -> String {
    format!("{prefix}/{node_id}/{channel}")
}
