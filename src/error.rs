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

use thiserror::Error;

use crate::model::{ChannelName, NodeId, PlanId};

pub type CoordResult<T> = std::result::Result<T, CoordError>;

#[derive(Error, Debug)]
pub enum CoordError {
    #[error("channel {0} is not watched by any node")]
    ChannelNotWatched(ChannelName),

    #[error("channel {0} is parked in the buffer")]
    ChannelInBuffer(ChannelName),

    #[error("metadata store rejected the write: {0}")]
    StoreFailure(#[source] anyhow::Error),

    #[error("allocator refused to hand out an id or timestamp: {0}")]
    AllocatorFailure(#[source] anyhow::Error),

    #[error("plan handler is at its parallelism cap")]
    PlanHandlerFull,

    #[error("completion reported for plan {0} but no matching executing task exists")]
    TaskStateMismatch(PlanId),

    #[error("worker reported an unknown compaction type for plan {0}")]
    UnknownCompactionType(PlanId),

    #[error("node {0} is not registered")]
    UnknownNode(NodeId),
}

impl CoordError {
    /// Transient errors are worth retrying on the next tick of the owning loop;
    /// invariant violations are not and must be surfaced to the caller untouched.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoordError::StoreFailure(_) | CoordError::AllocatorFailure(_) | CoordError::PlanHandlerFull
        )
    }
}
