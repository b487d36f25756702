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

use std::time::Duration;

/// Tunables shared by every subsystem, constructed once at startup and handed down
/// through the `Coordinator`. Analogous to the teacher's `MetaOpts`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CoordOpts {
    /// Upper bound on concurrently `executing` compaction tasks (§4.4).
    pub max_parallel_compaction_task_num: usize,
    /// How often the Plan Handler scans for timed-out tasks (§4.4).
    pub compaction_expiration_check_interval_secs: u64,
    /// How often the Trigger re-arms the global compaction sweep (§4.5).
    pub global_compaction_interval_secs: u64,
    /// `timeoutInSeconds` stamped onto every plan the Trigger emits (§4.5).
    pub max_compaction_timeout_secs: u64,
    /// Capacity of the Trigger's bounded signal queue (§4.5).
    pub compaction_signal_queue_capacity: usize,
    /// Merge-policy admission threshold: minimum small-segment count (§4.5).
    pub max_little_segment_num: usize,
    /// Deadline given to a fresh `ToWatch`/`ToRelease` assignment before the
    /// State Timer fires (§4.1, §4.3). Not numerically pinned by the
    /// specification; see DESIGN.md.
    pub channel_action_timeout: Duration,
    /// Sub-context budget for allocator RPCs (§5).
    pub allocator_rpc_timeout: Duration,
    /// Sub-context budget for worker dials (§5).
    pub worker_rpc_timeout: Duration,
}

impl Default for CoordOpts {
    fn default() -> Self {
        Self {
            max_parallel_compaction_task_num: 100,
            compaction_expiration_check_interval_secs: 60,
            global_compaction_interval_secs: 60,
            max_compaction_timeout_secs: 60,
            compaction_signal_queue_capacity: 100,
            max_little_segment_num: 10,
            channel_action_timeout: Duration::from_secs(10),
            allocator_rpc_timeout: Duration::from_secs(5),
            worker_rpc_timeout: Duration::from_secs(15),
        }
    }
}
