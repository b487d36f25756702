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

//! The Compaction Trigger (§4.5): a bounded, single-consumer signal queue
//! plus a periodic global re-arm, in the shape of the teacher's
//! `CompactionScheduler` — one background task drains the queue, a second
//! tick re-feeds it so collections are swept even with nothing asking for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::compaction::plan_handler::PlanHandler;
use crate::compaction::policy::TriggerPolicy;
use crate::compaction::segment::SegmentCatalog;
use crate::config::CoordOpts;
use crate::error::{CoordError, CoordResult};
use crate::ids::IdAllocator;
use crate::model::{ChannelName, CollectionId, CompactionPlan, CompactionSignal, NodeId, PartitionId, SegmentId, Timestamp};

/// Resolves which node currently owns a channel, so the Trigger can dispatch
/// a plan to the node that actually holds the segment's data. Implemented by
/// the Channel Manager; kept as a trait here so the two engines stay
/// decoupled.
pub trait ChannelLocator: Send + Sync + 'static {
    fn locate(&self, channel: &str) -> Option<NodeId>;
}

pub struct CompactionTrigger {
    catalog: Arc<dyn SegmentCatalog>,
    plan_handler: Arc<PlanHandler>,
    allocator: Arc<dyn IdAllocator>,
    locator: Arc<dyn ChannelLocator>,
    opts: CoordOpts,
    tx: mpsc::Sender<CompactionSignal>,
    next_signal_id: AtomicU64,
}

impl CompactionTrigger {
    pub fn new(
        catalog: Arc<dyn SegmentCatalog>,
        plan_handler: Arc<PlanHandler>,
        allocator: Arc<dyn IdAllocator>,
        locator: Arc<dyn ChannelLocator>,
        opts: CoordOpts,
    ) -> (Self, mpsc::Receiver<CompactionSignal>) {
        let (tx, rx) = mpsc::channel(opts.compaction_signal_queue_capacity);
        (
            Self {
                catalog,
                plan_handler,
                allocator,
                locator,
                opts,
                tx,
                next_signal_id: AtomicU64::new(1),
            },
            rx,
        )
    }

    fn next_id(&self) -> u64 {
        self.next_signal_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn enqueue(&self, signal: CompactionSignal) -> CoordResult<u64> {
        let id = signal.id;
        self.tx
            .try_send(signal)
            .map_err(|_| CoordError::PlanHandlerFull)?;
        Ok(id)
    }

    /// Regular, best-effort compaction evaluation of one collection (or one
    /// of its partitions).
    pub async fn trigger_compaction(&self, collection_id: CollectionId, partition_id: Option<PartitionId>) -> CoordResult<u64> {
        self.enqueue(CompactionSignal {
            id: self.next_id(),
            force: false,
            global: false,
            collection_id: Some(collection_id),
            partition_id,
            segment_id: None,
            channel: None,
            timetravel: self.allocator.alloc_timestamp().await?,
        })
        .await
    }

    /// Forces a single, specific segment through `Inner` compaction
    /// regardless of the usual eligibility thresholds.
    pub async fn trigger_single_compaction(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
        segment_id: SegmentId,
        channel: ChannelName,
        timetravel: Timestamp,
    ) -> CoordResult<u64> {
        self.enqueue(CompactionSignal {
            id: self.next_id(),
            force: true,
            global: false,
            collection_id: Some(collection_id),
            partition_id: Some(partition_id),
            segment_id: Some(segment_id),
            channel: Some(channel),
            timetravel,
        })
        .await
    }

    /// Forces every eligible segment of `collection_id` through compaction,
    /// bypassing the usual thresholds (an operator-invoked sweep).
    pub async fn force_trigger_compaction(&self, collection_id: CollectionId) -> CoordResult<u64> {
        self.enqueue(CompactionSignal {
            id: self.next_id(),
            force: true,
            global: true,
            collection_id: Some(collection_id),
            partition_id: None,
            segment_id: None,
            channel: None,
            timetravel: self.allocator.alloc_timestamp().await?,
        })
        .await
    }

    async fn handle_signal(&self, signal: CompactionSignal, single: &dyn TriggerPolicy, merge: &dyn TriggerPolicy) -> CoordResult<()> {
        let Some(collection_id) = signal.collection_id else { return Ok(()) };
        let segments = self.catalog.list_segments(collection_id, signal.partition_id).await?;

        let specs = if signal.force {
            if let Some(segment_id) = signal.segment_id {
                vec![crate::compaction::policy::PlanSpec {
                    compaction_type: crate::model::CompactionType::Inner,
                    segment_ids: vec![segment_id],
                }]
            } else {
                let mut specs = single.plan(&segments, signal.timetravel, &self.opts);
                specs.extend(merge.plan(&segments, signal.timetravel, &self.opts));
                specs
            }
        } else {
            let mut specs = single.plan(&segments, signal.timetravel, &self.opts);
            specs.extend(merge.plan(&segments, signal.timetravel, &self.opts));
            specs
        };

        for spec in specs {
            if self.plan_handler.is_full() {
                tracing::debug!(collection_id, "plan handler at capacity, deferring remaining plans");
                break;
            }
            let Some(first_segment_id) = spec.segment_ids.first() else { continue };
            let Some(segment) = self.catalog.get_segment(*first_segment_id).await? else { continue };
            let Some(node) = self.locator.locate(&segment.insert_channel) else {
                tracing::debug!(channel = %segment.insert_channel, "no node owns this channel yet, skipping plan");
                continue;
            };
            let plan = CompactionPlan {
                plan_id: self.allocator.alloc_id().await?,
                compaction_type: spec.compaction_type,
                segment_ids: spec.segment_ids,
                timeout_in_seconds: self.opts.max_compaction_timeout_secs,
                start_time: self.allocator.alloc_timestamp().await?,
                timetravel: signal.timetravel,
                signal_id: Some(signal.id),
            };
            if let Err(err) = self.plan_handler.exec_compaction_plan(node, plan).await {
                tracing::warn!(error = %err, "failed to dispatch compaction plan");
            }
        }
        Ok(())
    }

    /// Drains the signal queue and re-arms a global sweep every
    /// `global_compaction_interval_secs`, until `stop` fires.
    pub async fn run(self: Arc<Self>, mut signals: mpsc::Receiver<CompactionSignal>, collections: Vec<CollectionId>, mut stop: mpsc::Receiver<()>) {
        let single = crate::compaction::policy::SinglePolicy;
        let merge = crate::compaction::policy::MergePolicy;
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(self.opts.global_compaction_interval_secs.max(1)));
        loop {
            tokio::select! {
                Some(signal) = signals.recv() => {
                    if let Err(err) = self.handle_signal(signal, &single, &merge).await {
                        tracing::warn!(error = %err, "failed to evaluate compaction signal");
                    }
                }
                _ = ticker.tick() => {
                    for collection_id in &collections {
                        if let Err(err) = self.trigger_compaction(*collection_id, None).await {
                            tracing::debug!(error = %err, collection_id, "global re-arm signal was dropped");
                        }
                    }
                }
                _ = stop.recv() => break,
                else => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::segment::InMemorySegmentCatalog;
    use crate::ids::LocalIdAllocator;
    use crate::model::{Segment, SegmentState};
    use crate::worker_rpc::RecordingWorkerRpcClient;

    struct FixedLocator(NodeId);
    impl ChannelLocator for FixedLocator {
        fn locate(&self, _channel: &str) -> Option<NodeId> {
            Some(self.0)
        }
    }

    fn segment(id: SegmentId) -> Segment {
        Segment {
            id,
            collection_id: 1,
            partition_id: 1,
            insert_channel: "c1".into(),
            state: SegmentState::Flushed,
            num_rows: 500,
            max_row_num: 1000,
            last_expire_time: Timestamp(0),
            delta_logs: vec![crate::model::DeltaLogEntry {
                timestamp_from: Timestamp(0),
                timestamp_to: Timestamp(0),
                record_entries: 600,
                byte_size: 600,
            }],
            is_compacting: false,
        }
    }

    fn trigger() -> (Arc<CompactionTrigger>, Arc<PlanHandler>, mpsc::Receiver<CompactionSignal>) {
        let catalog = InMemorySegmentCatalog::shared();
        let plan_handler = Arc::new(PlanHandler::new(catalog.clone(), Arc::new(RecordingWorkerRpcClient::new()), CoordOpts::default()));
        let allocator = Arc::new(LocalIdAllocator::new());
        let locator = Arc::new(FixedLocator(1));
        let (trigger, rx) = CompactionTrigger::new(catalog, plan_handler.clone(), allocator, locator, CoordOpts::default());
        (Arc::new(trigger), plan_handler, rx)
    }

    #[tokio::test]
    async fn trigger_compaction_enqueues_a_signal() {
        let (trigger, _ph, mut rx) = trigger();
        trigger.trigger_compaction(1, None).await.unwrap();
        let signal = rx.recv().await.unwrap();
        assert_eq!(signal.collection_id, Some(1));
        assert!(!signal.force);
    }

    #[tokio::test]
    async fn handle_signal_dispatches_a_plan_for_an_eligible_segment() {
        let catalog = InMemorySegmentCatalog::new();
        catalog.insert(segment(1));
        let catalog = Arc::new(catalog);
        let plan_handler = Arc::new(PlanHandler::new(catalog.clone(), Arc::new(RecordingWorkerRpcClient::new()), CoordOpts::default()));
        let allocator = Arc::new(LocalIdAllocator::new());
        let locator = Arc::new(FixedLocator(1));
        let (trigger, _rx) = CompactionTrigger::new(catalog, plan_handler.clone(), allocator, locator, CoordOpts::default());

        let single = crate::compaction::policy::SinglePolicy;
        let merge = crate::compaction::policy::MergePolicy;
        trigger
            .handle_signal(
                CompactionSignal {
                    id: 1,
                    force: false,
                    global: false,
                    collection_id: Some(1),
                    partition_id: None,
                    segment_id: None,
                    channel: None,
                    timetravel: Timestamp(1000),
                },
                &single,
                &merge,
            )
            .await
            .unwrap();
        assert!(plan_handler.get_compaction_by_signal_id(1).is_some());
    }

    #[tokio::test]
    async fn force_trigger_sets_both_force_and_global() {
        let (trigger, _ph, mut rx) = trigger();
        trigger.force_trigger_compaction(1).await.unwrap();
        let signal = rx.recv().await.unwrap();
        assert!(signal.force);
        assert!(signal.global);
    }

    #[tokio::test]
    async fn full_queue_is_reported_as_plan_handler_full() {
        let catalog = InMemorySegmentCatalog::shared();
        let plan_handler = Arc::new(PlanHandler::new(catalog.clone(), Arc::new(RecordingWorkerRpcClient::new()), CoordOpts::default()));
        let allocator = Arc::new(LocalIdAllocator::new());
        let locator = Arc::new(FixedLocator(1));
        let mut opts = CoordOpts::default();
        opts.compaction_signal_queue_capacity = 1;
        let (trigger, _rx) = CompactionTrigger::new(catalog, plan_handler, allocator, locator, opts);
        trigger.trigger_compaction(1, None).await.unwrap();
        let err = trigger.trigger_compaction(1, None).await.unwrap_err();
        assert!(matches!(err, CoordError::PlanHandlerFull));
    }
}
