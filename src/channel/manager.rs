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

//! The Channel Manager (§4.3): owns the watch/release state machine for
//! every channel, reconciles from durable state on startup, and drives a
//! single `tokio::select!` loop that serialises timer expirations against
//! worker acknowledgements, mirroring the teacher's single-consumer
//! scheduling loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::channel::policy::{AssignPolicy, LeastLoadedPolicy};
use crate::channel::store::ChannelStore;
use crate::config::CoordOpts;
use crate::error::{CoordError, CoordResult};
use crate::model::{AckType, Channel, ChannelName, NodeId, WatchInfo, WatchState, BUFFER_ID};
use crate::timer::{ChannelTimer, TimerExpired};
use crate::worker_rpc::WorkerRpcClient;

/// An acknowledgement reported back from a worker for one outstanding
/// watch/release request (§4.1).
#[derive(Clone, Debug)]
pub struct ChannelAck {
    pub channel: ChannelName,
    pub node: NodeId,
    pub ack: AckType,
}

pub struct ChannelManager {
    store: Arc<ChannelStore>,
    timer: Arc<ChannelTimer>,
    rpc: Arc<dyn WorkerRpcClient>,
    policy: RwLock<Box<dyn AssignPolicy>>,
    opts: CoordOpts,
    nodes: RwLock<HashSet<NodeId>>,
}

fn now_ns() -> i128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as i128
}

impl ChannelManager {
    pub fn new(store: Arc<ChannelStore>, timer: Arc<ChannelTimer>, rpc: Arc<dyn WorkerRpcClient>, opts: CoordOpts) -> Self {
        Self {
            store,
            timer,
            rpc,
            policy: RwLock::new(Box::new(LeastLoadedPolicy)),
            opts,
            nodes: RwLock::new(HashSet::new()),
        }
    }

    pub fn set_policy(&self, policy: Box<dyn AssignPolicy>) {
        *self.policy.write() = policy;
    }

    /// Reconciles in-memory state from the durable store (§4.3's startup
    /// protocol): every channel still `ToWatch`/`ToRelease` either gets its
    /// countdown restarted with whatever time remains, or, if its deadline
    /// has already passed, is treated as an immediate timeout.
    pub async fn startup(&self) -> CoordResult<()> {
        let loaded = self.store.reload().await?;
        let mut nodes = self.nodes.write();
        for (node, _) in &loaded {
            if *node != BUFFER_ID {
                nodes.insert(*node);
            }
        }
        drop(nodes);

        for (node, info) in loaded {
            if node == BUFFER_ID {
                continue;
            }
            match info.state {
                WatchState::WatchSuccess => {}
                WatchState::ToWatch | WatchState::ToRelease => {
                    let remaining_ns = info.deadline_ns - now_ns();
                    if remaining_ns > 0 {
                        self.timer.add(
                            info.channel.name.clone(),
                            node,
                            std::time::Duration::from_nanos(remaining_ns as u64),
                        );
                    } else {
                        let ack = if info.state == WatchState::ToWatch {
                            AckType::WatchTimeout
                        } else {
                            AckType::ReleaseTimeout
                        };
                        self.report_ack(ChannelAck { channel: info.channel.name, node, ack }).await?;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn add_node(&self, node: NodeId) -> CoordResult<()> {
        self.nodes.write().insert(node);
        self.rebalance_buffer().await
    }

    /// A node left the cluster. Every channel it held is re-parked in the
    /// buffer directly: the node can no longer be dialed, so the normal
    /// release handshake is skipped (§9's re-parking resolution).
    pub async fn delete_node(&self, node: NodeId) -> CoordResult<()> {
        self.nodes.write().remove(&node);
        let orphaned: Vec<ChannelName> = self
            .store
            .get_nodes_channels()
            .remove(&node)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for channel_name in orphaned {
            self.timer.remove(&channel_name);
            if let Some((_, info)) = self.store.get(&channel_name) {
                self.park_in_buffer(info.channel).await?;
            }
        }
        Ok(())
    }

    /// Requests that `channel` start being watched. Assigns it to the
    /// least-loaded online node, or parks it in the buffer if none are
    /// available.
    pub async fn watch(&self, channel: Channel) -> CoordResult<()> {
        let nodes = self.nodes.read().iter().copied().collect::<Vec<_>>();
        let load = self.store.get_nodes_channels().into_iter().map(|(n, c)| (n, c.len())).collect();
        let target = self.policy.read().assign(&nodes, &load, &channel.name);
        match target {
            Some(node) => self.dispatch_watch(node, channel).await,
            None => self.park_in_buffer(channel).await,
        }
    }

    /// Requests that `channel` stop being watched wherever it currently is.
    pub async fn release(&self, channel_name: &str) -> CoordResult<()> {
        let (node, mut info) = self.store.get(channel_name).ok_or_else(|| CoordError::ChannelNotWatched(channel_name.to_owned()))?;
        if node == BUFFER_ID {
            self.timer.remove(channel_name);
            self.store.delete(channel_name).await?;
            return Ok(());
        }
        info.state = WatchState::ToRelease;
        info.deadline_ns = now_ns() + self.opts.channel_action_timeout.as_nanos() as i128;
        self.store.upsert(node, info.clone()).await?;
        self.timer.add(channel_name.to_owned(), node, self.opts.channel_action_timeout);
        self.rpc.request_release(node, info.channel).await
    }

    pub fn find_watcher(&self, channel: &str) -> Option<NodeId> {
        self.store.get_node(channel)
    }

    pub async fn remove_channel(&self, channel_name: &str) -> CoordResult<()> {
        self.timer.remove(channel_name);
        self.store.delete(channel_name).await
    }

    /// Classifies one acknowledgement/timeout event and advances the state
    /// machine (§4.1's `AckType` table).
    pub async fn report_ack(&self, event: ChannelAck) -> CoordResult<()> {
        self.timer.remove(&event.channel);
        let Some((stored_node, info)) = self.store.get(&event.channel) else {
            return Ok(());
        };
        if stored_node != event.node {
            // A stale ack from a node that no longer owns this channel; the
            // channel has already moved on, so there is nothing to do.
            return Ok(());
        }
        match event.ack {
            AckType::WatchSuccess => {
                let mut info = info;
                info.state = WatchState::WatchSuccess;
                self.store.upsert(event.node, info).await
            }
            AckType::WatchFailure | AckType::WatchTimeout => self.park_in_buffer(info.channel).await,
            AckType::ReleaseSuccess | AckType::ReleaseFailure | AckType::ReleaseTimeout => {
                self.park_in_buffer(info.channel).await
            }
        }
    }

    /// Attempts to hand every buffered channel to a now-available node. Runs
    /// after `add_node` and opportunistically whenever a channel is parked.
    pub async fn rebalance_buffer(&self) -> CoordResult<()> {
        let buffered = self.store.get_buffer_channel_info().channels;
        for channel_name in buffered {
            let Some((_, info)) = self.store.get(&channel_name) else { continue };
            let nodes = self.nodes.read().iter().copied().collect::<Vec<_>>();
            let load = self.store.get_nodes_channels().into_iter().map(|(n, c)| (n, c.len())).collect();
            if let Some(node) = self.policy.read().assign(&nodes, &load, &channel_name) {
                self.dispatch_watch(node, info.channel).await?;
            }
        }
        Ok(())
    }

    async fn dispatch_watch(&self, node: NodeId, channel: Channel) -> CoordResult<()> {
        let info = WatchInfo {
            channel: channel.clone(),
            state: WatchState::ToWatch,
            deadline_ns: now_ns() + self.opts.channel_action_timeout.as_nanos() as i128,
            vchannel_meta: Vec::new(),
        };
        self.store.upsert(node, info.clone()).await?;
        self.timer.add(channel.name.clone(), node, self.opts.channel_action_timeout);
        self.rpc.request_watch(node, info).await
    }

    async fn park_in_buffer(&self, channel: Channel) -> CoordResult<()> {
        let info = WatchInfo {
            channel,
            state: WatchState::ToWatch,
            deadline_ns: 0,
            vchannel_meta: Vec::new(),
        };
        self.store.upsert(BUFFER_ID, info).await
    }

    /// Drains timer expirations until `stop` fires, classifying each as the
    /// matching timeout `AckType`. A production deployment also feeds worker
    /// acks into `report_ack` from its own ingress loop; this task only owns
    /// the timeout half of §4.1's event sources.
    pub async fn run(self: Arc<Self>, mut timeouts: mpsc::Receiver<TimerExpired>, mut stop: mpsc::Receiver<()>) {
        loop {
            tokio::select! {
                Some(TimerExpired { channel, node }) = timeouts.recv() => {
                    let ack = match self.store.get(&channel) {
                        Some((_, info)) if info.state == WatchState::ToWatch => AckType::WatchTimeout,
                        _ => AckType::ReleaseTimeout,
                    };
                    if let Err(err) = self.report_ack(ChannelAck { channel, node, ack }).await {
                        tracing::warn!(error = %err, "failed to process channel timeout");
                    }
                }
                _ = stop.recv() => break,
                else => break,
            }
        }
    }
}

impl crate::compaction::ChannelLocator for ChannelManager {
    fn locate(&self, channel: &str) -> Option<NodeId> {
        self.find_watcher(channel)
    }
}
