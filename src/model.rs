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

//! The shared data model (§3): channels, watch records, in-memory node/channel
//! index entries, compaction tasks and signals, and the segment read view.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub type NodeId = u64;
pub type ChannelName = String;
pub type CollectionId = u64;
pub type PartitionId = u64;
pub type SegmentId = u64;
pub type PlanId = u64;
pub type SignalId = u64;

/// Reserved id denoting "currently unassigned, parked in the buffer" (§3, §9).
pub const BUFFER_ID: NodeId = 0;

/// A 64-bit composite timestamp: physical milliseconds in the high bits, a
/// logical counter in the low bits. The engine only relies on monotonic
/// ordering and on extracting the physical component (§6, §9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

const LOGICAL_BITS: u32 = 18;

impl Timestamp {
    pub fn compose(physical_ms: u64, logical: u64) -> Self {
        Timestamp((physical_ms << LOGICAL_BITS) | (logical & ((1 << LOGICAL_BITS) - 1)))
    }

    pub fn physical_ms(&self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    /// The clock domain §9's second Open Question warns about: always derive
    /// "elapsed seconds" from this, never from the raw composite value.
    pub fn physical_secs(&self) -> u64 {
        self.physical_ms() / 1000
    }
}

/// A named, ordered stream of data mutations for one collection (§3, GLOSSARY).
/// Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub name: ChannelName,
    pub collection_id: CollectionId,
}

/// The assignment state machine (§4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchState {
    ToWatch,
    WatchSuccess,
    ToRelease,
}

/// The durable record of one channel-to-node assignment (§3). Stored at
/// `<prefix>/<nodeID>/<channelName>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchInfo {
    pub channel: Channel,
    pub state: WatchState,
    /// Nanoseconds since epoch after which the assignment is considered timed out.
    pub deadline_ns: i128,
    /// Opaque, serialized vchannel metadata the worker needs to start consuming.
    pub vchannel_meta: Vec<u8>,
}

/// The closed set of acknowledgement kinds the Channel Manager's main loop
/// classifies every event into (§4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckType {
    WatchSuccess,
    WatchFailure,
    WatchTimeout,
    ReleaseSuccess,
    ReleaseFailure,
    ReleaseTimeout,
}

impl AckType {
    pub fn is_timeout(self) -> bool {
        matches!(self, AckType::WatchTimeout | AckType::ReleaseTimeout)
    }
}

/// Per-node in-memory record (§3). `node_id == BUFFER_ID` denotes the virtual
/// buffer node.
#[derive(Clone, Debug, Default)]
pub struct NodeChannelInfo {
    pub channels: HashSet<ChannelName>,
}

/// `Inner` rewrites one segment in place; `Merge` folds many into one (§3, GLOSSARY).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompactionType {
    Inner,
    Merge,
}

/// A compaction plan dispatched to a worker (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompactionPlan {
    pub plan_id: PlanId,
    pub compaction_type: CompactionType,
    pub segment_ids: Vec<SegmentId>,
    pub timeout_in_seconds: u64,
    pub start_time: Timestamp,
    pub timetravel: Timestamp,
    /// Back-pointer to the triggering signal, if any (§3).
    pub signal_id: Option<SignalId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Executing,
    Completed,
    Timeout,
}

/// In-memory bookkeeping record owned by the Plan Handler (§3).
#[derive(Clone, Debug)]
pub struct CompactionTask {
    pub plan: CompactionPlan,
    pub state: TaskState,
    pub worker_id: NodeId,
}

/// The worker's report of a finished plan (§4.4): the plan id plus the
/// single segment it produced, whether the plan rewrote one segment in
/// place or folded several into it.
#[derive(Clone, Debug)]
pub struct CompactionResult {
    pub plan_id: PlanId,
    pub produced_segment: Segment,
}

/// An ephemeral request to the Trigger (§3).
#[derive(Clone, Debug)]
pub struct CompactionSignal {
    pub id: SignalId,
    pub force: bool,
    pub global: bool,
    pub collection_id: Option<CollectionId>,
    pub partition_id: Option<PartitionId>,
    pub segment_id: Option<SegmentId>,
    pub channel: Option<ChannelName>,
    pub timetravel: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentState {
    Growing,
    Flushed,
    Dropped,
}

/// One delta-log entry: a range of tombstones plus their footprint (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeltaLogEntry {
    pub timestamp_from: Timestamp,
    pub timestamp_to: Timestamp,
    pub record_entries: u64,
    pub byte_size: u64,
}

/// Read-only view of a segment, the attributes the engines inspect (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub collection_id: CollectionId,
    pub partition_id: PartitionId,
    pub insert_channel: ChannelName,
    pub state: SegmentState,
    pub num_rows: u64,
    pub max_row_num: u64,
    pub last_expire_time: Timestamp,
    pub delta_logs: Vec<DeltaLogEntry>,
    pub is_compacting: bool,
}

impl Segment {
    pub fn total_deleted_rows(&self) -> u64 {
        self.delta_logs.iter().map(|d| d.record_entries).sum()
    }

    pub fn delta_bytes_before(&self, timetravel: Timestamp) -> u64 {
        self.delta_logs
            .iter()
            .filter(|d| d.timestamp_to < timetravel)
            .map(|d| d.byte_size)
            .sum()
    }
}
