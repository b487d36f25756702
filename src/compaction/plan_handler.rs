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

//! The Compaction Plan Handler (§4.4): a bounded concurrent executor over
//! dispatched plans, with one task map behind one lock, in the same shape as
//! the teacher's `CompactorManager` tracks outstanding compaction tasks by
//! heartbeat expiry rather than by push notification alone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::compaction::segment::SegmentCatalog;
use crate::config::CoordOpts;
use crate::error::{CoordError, CoordResult};
use crate::model::{CompactionPlan, CompactionResult, CompactionTask, CompactionType, NodeId, PlanId, SegmentId, SignalId, TaskState};
use crate::worker_rpc::WorkerRpcClient;

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

pub struct PlanHandler {
    catalog: Arc<dyn SegmentCatalog>,
    rpc: Arc<dyn WorkerRpcClient>,
    opts: CoordOpts,
    tasks: Mutex<HashMap<PlanId, CompactionTask>>,
    flush_tx: Option<mpsc::Sender<SegmentId>>,
}

impl PlanHandler {
    pub fn new(catalog: Arc<dyn SegmentCatalog>, rpc: Arc<dyn WorkerRpcClient>, opts: CoordOpts) -> Self {
        Self {
            catalog,
            rpc,
            opts,
            tasks: Mutex::new(HashMap::new()),
            flush_tx: None,
        }
    }

    /// Every produced segment id of a completed `Merge` plan is published
    /// onto `flush_tx` for downstream flush logic to pick up (§4.4, §6).
    pub fn with_flush_channel(mut self, flush_tx: mpsc::Sender<SegmentId>) -> Self {
        self.flush_tx = Some(flush_tx);
        self
    }

    pub fn is_full(&self) -> bool {
        self.tasks.lock().len() >= self.opts.max_parallel_compaction_task_num
    }

    /// Admits `plan` and dispatches it to `node`. Rejects once the
    /// parallelism cap (§4.4) is reached; the caller (the Trigger) is
    /// expected to retry the signal later rather than treat this as fatal.
    pub async fn exec_compaction_plan(&self, node: NodeId, plan: CompactionPlan) -> CoordResult<()> {
        if self.is_full() {
            return Err(CoordError::PlanHandlerFull);
        }
        self.catalog.set_compacting(&plan.segment_ids, true).await?;
        self.tasks.lock().insert(
            plan.plan_id,
            CompactionTask {
                plan: plan.clone(),
                state: TaskState::Executing,
                worker_id: node,
            },
        );
        let result = self.rpc.request_compaction(node, plan.clone()).await;
        if result.is_err() {
            self.tasks.lock().remove(&plan.plan_id);
            self.catalog.set_compacting(&plan.segment_ids, false).await?;
        }
        result
    }

    /// A worker reported a plan as finished. Applies the produced segment to
    /// the catalog per the plan's type, publishes a `Merge` plan's produced
    /// id onto the flush channel, and returns the completed task.
    pub async fn complete_compaction(&self, result: CompactionResult) -> CoordResult<CompactionTask> {
        let task = {
            let mut tasks = self.tasks.lock();
            match tasks.get(&result.plan_id) {
                Some(task) if task.state == TaskState::Executing => tasks.remove(&result.plan_id).unwrap(),
                _ => return Err(CoordError::TaskStateMismatch(result.plan_id)),
            }
        };
        match task.plan.compaction_type {
            CompactionType::Inner => {
                let old_segment_id = *task.plan.segment_ids.first().ok_or(CoordError::TaskStateMismatch(result.plan_id))?;
                self.catalog.complete_inner_compaction(old_segment_id, result.produced_segment).await?;
            }
            CompactionType::Merge => {
                let produced_id = self
                    .catalog
                    .complete_merge_compaction(&task.plan.segment_ids, result.produced_segment)
                    .await?;
                if let Some(tx) = &self.flush_tx {
                    let _ = tx.send(produced_id).await;
                }
            }
        }
        Ok(CompactionTask { state: TaskState::Completed, ..task })
    }

    /// Sweeps the task map for plans whose `timeoutInSeconds` has elapsed
    /// since `startTime`, clears their `is_compacting` latch, and returns
    /// them so the caller can re-signal a retry.
    pub async fn expire_compaction(&self) -> CoordResult<Vec<CompactionTask>> {
        let expired: Vec<CompactionTask> = {
            let mut tasks = self.tasks.lock();
            let now = now_secs();
            let expired_ids: Vec<PlanId> = tasks
                .iter()
                .filter(|(_, task)| {
                    task.state == TaskState::Executing
                        && task.plan.start_time.physical_secs() + task.plan.timeout_in_seconds <= now
                })
                .map(|(id, _)| *id)
                .collect();
            expired_ids.into_iter().map(|id| tasks.remove(&id).unwrap()).collect()
        };
        for task in &expired {
            self.catalog.set_compacting(&task.plan.segment_ids, false).await?;
        }
        Ok(expired.into_iter().map(|t| CompactionTask { state: TaskState::Timeout, ..t }).collect())
    }

    pub fn get_compaction(&self, plan_id: PlanId) -> Option<CompactionTask> {
        self.tasks.lock().get(&plan_id).cloned()
    }

    pub fn get_compaction_by_signal_id(&self, signal_id: SignalId) -> Option<CompactionTask> {
        self.tasks.lock().values().find(|t| t.plan.signal_id == Some(signal_id)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::segment::InMemorySegmentCatalog;
    use crate::model::{Segment, SegmentState, Timestamp};
    use crate::worker_rpc::RecordingWorkerRpcClient;

    fn plan(id: PlanId, timeout: u64, start: Timestamp) -> CompactionPlan {
        CompactionPlan {
            plan_id: id,
            compaction_type: CompactionType::Inner,
            segment_ids: vec![1, 2],
            timeout_in_seconds: timeout,
            start_time: start,
            timetravel: start,
            signal_id: Some(42),
        }
    }

    fn segment(id: SegmentId) -> Segment {
        Segment {
            id,
            collection_id: 1,
            partition_id: 1,
            insert_channel: "c1".into(),
            state: SegmentState::Flushed,
            num_rows: 10,
            max_row_num: 1000,
            last_expire_time: Timestamp(0),
            delta_logs: Vec::new(),
            is_compacting: false,
        }
    }

    fn catalog_with_inputs() -> Arc<InMemorySegmentCatalog> {
        let catalog = InMemorySegmentCatalog::shared();
        catalog.insert(segment(1));
        catalog.insert(segment(2));
        catalog
    }

    fn handler() -> PlanHandler {
        PlanHandler::new(catalog_with_inputs(), Arc::new(RecordingWorkerRpcClient::new()), CoordOpts::default())
    }

    #[tokio::test]
    async fn exec_then_complete_round_trips() {
        let h = handler();
        h.exec_compaction_plan(1, plan(100, 60, Timestamp::compose(0, 0))).await.unwrap();
        assert!(h.get_compaction(100).is_some());
        let completed = h
            .complete_compaction(CompactionResult { plan_id: 100, produced_segment: segment(1) })
            .await
            .unwrap();
        assert_eq!(completed.state, TaskState::Completed);
        assert!(h.get_compaction(100).is_none());
    }

    #[tokio::test]
    async fn full_handler_rejects_new_plans() {
        let mut opts = CoordOpts::default();
        opts.max_parallel_compaction_task_num = 1;
        let h = PlanHandler::new(catalog_with_inputs(), Arc::new(RecordingWorkerRpcClient::new()), opts);
        h.exec_compaction_plan(1, plan(1, 60, Timestamp::compose(0, 0))).await.unwrap();
        let err = h.exec_compaction_plan(1, plan(2, 60, Timestamp::compose(0, 0))).await.unwrap_err();
        assert!(matches!(err, CoordError::PlanHandlerFull));
    }

    #[tokio::test]
    async fn complete_unknown_plan_errors() {
        let h = handler();
        let err = h
            .complete_compaction(CompactionResult { plan_id: 999, produced_segment: segment(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::TaskStateMismatch(999)));
    }

    #[tokio::test]
    async fn merge_completion_publishes_the_produced_id_on_the_flush_channel() {
        let (flush_tx, mut flush_rx) = mpsc::channel(1);
        let h = PlanHandler::new(catalog_with_inputs(), Arc::new(RecordingWorkerRpcClient::new()), CoordOpts::default())
            .with_flush_channel(flush_tx);
        let mut merge_plan = plan(200, 60, Timestamp::compose(0, 0));
        merge_plan.compaction_type = CompactionType::Merge;
        h.exec_compaction_plan(1, merge_plan).await.unwrap();
        h.complete_compaction(CompactionResult { plan_id: 200, produced_segment: segment(3) }).await.unwrap();
        assert_eq!(flush_rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn expire_compaction_sweeps_elapsed_tasks() {
        let h = handler();
        let stale_start = Timestamp::compose(0, 0);
        h.exec_compaction_plan(1, plan(7, 0, stale_start)).await.unwrap();
        let expired = h.expire_compaction().await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].state, TaskState::Timeout);
        assert!(h.get_compaction(7).is_none());
    }

    #[tokio::test]
    async fn get_compaction_by_signal_id_finds_the_owning_task() {
        let h = handler();
        h.exec_compaction_plan(1, plan(9, 60, Timestamp::compose(0, 0))).await.unwrap();
        let task = h.get_compaction_by_signal_id(42).unwrap();
        assert_eq!(task.plan.plan_id, 9);
    }
}
