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

//! The coordination plane of a distributed vector-database storage
//! subsystem: channel assignment (§4.1-4.3) and segment compaction
//! (§4.4-4.6), composed behind one [`Coordinator`].

pub mod channel;
pub mod compaction;
pub mod config;
pub mod error;
pub mod ids;
pub mod model;
pub mod storage;
pub mod timer;
pub mod worker_rpc;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use channel::{ChannelManager, ChannelStore};
use compaction::{CompactionTrigger, InMemorySegmentCatalog, PlanHandler, SegmentCatalog};
use config::CoordOpts;
use ids::{IdAllocator, LocalIdAllocator};
use model::{CollectionId, CompactionSignal, SegmentId};
use storage::MetaStore;
use timer::{ChannelTimer, TimerExpired};
use worker_rpc::WorkerRpcClient;

const CHANNEL_WATCH_PREFIX: &str = "channel_watch";

/// The composition root, analogous to the teacher's `MetaSrvEnv`: owns every
/// collaborator and the background tasks that drive them, and hands back
/// their `JoinHandle`s so a caller can await or abort a graceful shutdown.
pub struct Coordinator {
    pub channel_manager: Arc<ChannelManager>,
    pub plan_handler: Arc<PlanHandler>,
    pub trigger: Arc<CompactionTrigger>,
    pub segment_catalog: Arc<dyn SegmentCatalog>,
    pub opts: CoordOpts,
    channel_timeouts: Option<mpsc::Receiver<TimerExpired>>,
    compaction_signals: Option<mpsc::Receiver<CompactionSignal>>,
    /// Produced segment ids of completed `Merge` plans, for downstream flush
    /// logic to drain; taken on the first call to [`Coordinator::flush_events`].
    flush_events: Option<mpsc::Receiver<SegmentId>>,
    tasks: Vec<JoinHandle<()>>,
    stop_tx: Vec<mpsc::Sender<()>>,
}

impl Coordinator {
    /// Wires every collaborator together but does not yet start any
    /// background task; call [`Coordinator::start`] once the known
    /// collections (for the Trigger's periodic sweep) are known.
    pub fn new(meta: Arc<dyn MetaStore>, rpc: Arc<dyn WorkerRpcClient>, opts: CoordOpts) -> Self {
        Self::with_segment_catalog(meta, rpc, InMemorySegmentCatalog::shared(), opts)
    }

    pub fn with_segment_catalog(
        meta: Arc<dyn MetaStore>,
        rpc: Arc<dyn WorkerRpcClient>,
        segment_catalog: Arc<dyn SegmentCatalog>,
        opts: CoordOpts,
    ) -> Self {
        let store = Arc::new(ChannelStore::new(CHANNEL_WATCH_PREFIX, meta));
        let (timer, channel_timeouts) = ChannelTimer::new(opts.compaction_signal_queue_capacity.max(64));
        let timer = Arc::new(timer);
        let channel_manager = Arc::new(ChannelManager::new(store, timer, rpc.clone(), opts.clone()));

        let (flush_tx, flush_events) = mpsc::channel(opts.compaction_signal_queue_capacity.max(64));
        let plan_handler = Arc::new(
            PlanHandler::new(segment_catalog.clone(), rpc, opts.clone()).with_flush_channel(flush_tx),
        );
        let allocator: Arc<dyn IdAllocator> = Arc::new(LocalIdAllocator::new());
        let locator: Arc<dyn compaction::ChannelLocator> = channel_manager.clone();
        let (trigger, compaction_signals) =
            CompactionTrigger::new(segment_catalog.clone(), plan_handler.clone(), allocator, locator, opts.clone());

        Self {
            channel_manager,
            plan_handler,
            trigger: Arc::new(trigger),
            segment_catalog,
            opts,
            channel_timeouts: Some(channel_timeouts),
            compaction_signals: Some(compaction_signals),
            flush_events: Some(flush_events),
            tasks: Vec::new(),
            stop_tx: Vec::new(),
        }
    }

    /// Takes the receiving end of the flush-notification channel (§4.4, §6).
    /// Returns `None` if already taken; callers should hold onto the receiver
    /// for the coordinator's lifetime.
    pub fn flush_events(&mut self) -> Option<mpsc::Receiver<SegmentId>> {
        self.flush_events.take()
    }

    /// Reconciles from durable state, then spawns the Channel Manager's
    /// timeout loop and the Trigger's signal/ticker loop. `collections` seeds
    /// the Trigger's periodic global sweep. Idempotent calls after the first
    /// are a no-op: the receivers are consumed on the first call.
    pub async fn start(&mut self, collections: Vec<CollectionId>) -> error::CoordResult<()> {
        self.channel_manager.startup().await?;

        if let Some(timeouts) = self.channel_timeouts.take() {
            let (stop_tx, stop_rx) = mpsc::channel(1);
            self.stop_tx.push(stop_tx);
            let manager = self.channel_manager.clone();
            self.tasks.push(tokio::spawn(manager.run(timeouts, stop_rx)));
        }

        if let Some(signals) = self.compaction_signals.take() {
            let (stop_tx, stop_rx) = mpsc::channel(1);
            self.stop_tx.push(stop_tx);
            let trigger = self.trigger.clone();
            self.tasks.push(tokio::spawn(trigger.run(signals, collections, stop_rx)));
        }

        Ok(())
    }

    /// Signals every background task to stop and waits for them to exit.
    pub async fn shutdown(mut self) {
        for stop in self.stop_tx.drain(..) {
            let _ = stop.send(()).await;
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}
