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

//! The worker RPC capability (§6): dialing out to a node to ask it to watch or
//! release a channel, or to execute a compaction plan. Kept as a trait so the
//! Channel Manager and Plan Handler never depend on a concrete transport.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::CoordResult;
use crate::model::{Channel, CompactionPlan, NodeId, WatchInfo};

#[async_trait]
pub trait WorkerRpcClient: Send + Sync + 'static {
    async fn request_watch(&self, node: NodeId, info: WatchInfo) -> CoordResult<()>;

    async fn request_release(&self, node: NodeId, channel: Channel) -> CoordResult<()>;

    async fn request_compaction(&self, node: NodeId, plan: CompactionPlan) -> CoordResult<()>;
}

#[derive(Clone, Debug)]
pub enum RecordedCall {
    Watch(NodeId, Channel),
    Release(NodeId, Channel),
    Compaction(NodeId, CompactionPlan),
}

/// A test double that records every call it receives instead of dialing out,
/// in the manner of the teacher's mock metadata client: useful to assert what
/// the engines dispatched without standing up a real worker.
#[derive(Default)]
pub struct RecordingWorkerRpcClient {
    calls: Mutex<Vec<RecordedCall>>,
    fail_watch: Mutex<bool>,
}

impl RecordingWorkerRpcClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn set_fail_watch(&self, fail: bool) {
        *self.fail_watch.lock() = fail;
    }
}

#[async_trait]
impl WorkerRpcClient for RecordingWorkerRpcClient {
    async fn request_watch(&self, node: NodeId, info: WatchInfo) -> CoordResult<()> {
        if *self.fail_watch.lock() {
            return Err(crate::error::CoordError::StoreFailure(anyhow::anyhow!(
                "injected watch failure"
            )));
        }
        self.calls.lock().push(RecordedCall::Watch(node, info.channel));
        Ok(())
    }

    async fn request_release(&self, node: NodeId, channel: Channel) -> CoordResult<()> {
        self.calls.lock().push(RecordedCall::Release(node, channel));
        Ok(())
    }

    async fn request_compaction(&self, node: NodeId, plan: CompactionPlan) -> CoordResult<()> {
        self.calls.lock().push(RecordedCall::Compaction(node, plan));
        Ok(())
    }
}
