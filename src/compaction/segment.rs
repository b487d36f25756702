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

//! The segment-metadata façade (§4.6, §6): the read-only view the Trigger's
//! policies inspect to decide what to compact, and the `is_compacting` latch
//! the Plan Handler sets while a plan is in flight. Kept as a trait so the
//! compaction engine never depends on how segment metadata is actually
//! stored, the same boundary the teacher draws around its own meta client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::CoordResult;
use crate::model::{CollectionId, PartitionId, Segment, SegmentId, SegmentState};

#[async_trait]
pub trait SegmentCatalog: Send + Sync + 'static {
    async fn list_segments(&self, collection_id: CollectionId, partition_id: Option<PartitionId>) -> CoordResult<Vec<Segment>>;

    async fn get_segment(&self, segment_id: SegmentId) -> CoordResult<Option<Segment>>;

    async fn get_segments_by_channel(&self, channel: &str) -> CoordResult<Vec<Segment>>;

    /// Marks `segment_ids` as currently being compacted, or clears the flag
    /// once a plan completes or times out.
    async fn set_compacting(&self, segment_ids: &[SegmentId], compacting: bool) -> CoordResult<()>;

    /// Applies the result of an `Inner` (single-segment rewrite) plan: the
    /// old segment's binlogs are replaced by `result`'s.
    async fn complete_inner_compaction(&self, old_segment_id: SegmentId, result: Segment) -> CoordResult<()>;

    /// Applies the result of a `Merge` plan: every input segment is dropped
    /// and replaced by the single produced segment, whose id is returned so
    /// the caller can publish it on the flush channel (§6).
    async fn complete_merge_compaction(&self, old_segment_ids: &[SegmentId], result: Segment) -> CoordResult<SegmentId>;
}

/// A fixture-friendly catalog that holds segments in memory. The Trigger's
/// tests and any local development wiring drive the whole engine through this
/// instead of a real segment-metadata service.
#[derive(Default)]
pub struct InMemorySegmentCatalog {
    segments: RwLock<HashMap<SegmentId, Segment>>,
}

impl InMemorySegmentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, segment: Segment) {
        self.segments.write().insert(segment.id, segment);
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl SegmentCatalog for InMemorySegmentCatalog {
    async fn list_segments(&self, collection_id: CollectionId, partition_id: Option<PartitionId>) -> CoordResult<Vec<Segment>> {
        Ok(self
            .segments
            .read()
            .values()
            .filter(|s| s.collection_id == collection_id)
            .filter(|s| partition_id.map(|p| p == s.partition_id).unwrap_or(true))
            .filter(|s| s.state != SegmentState::Dropped)
            .cloned()
            .collect())
    }

    async fn get_segment(&self, segment_id: SegmentId) -> CoordResult<Option<Segment>> {
        Ok(self.segments.read().get(&segment_id).cloned())
    }

    async fn get_segments_by_channel(&self, channel: &str) -> CoordResult<Vec<Segment>> {
        Ok(self
            .segments
            .read()
            .values()
            .filter(|s| s.insert_channel == channel)
            .filter(|s| s.state != SegmentState::Dropped)
            .cloned()
            .collect())
    }

    async fn set_compacting(&self, segment_ids: &[SegmentId], compacting: bool) -> CoordResult<()> {
        let mut segments = self.segments.write();
        for id in segment_ids {
            if let Some(segment) = segments.get_mut(id) {
                segment.is_compacting = compacting;
            }
        }
        Ok(())
    }

    async fn complete_inner_compaction(&self, old_segment_id: SegmentId, result: Segment) -> CoordResult<()> {
        let mut segments = self.segments.write();
        segments.remove(&old_segment_id);
        segments.insert(result.id, result);
        Ok(())
    }

    async fn complete_merge_compaction(&self, old_segment_ids: &[SegmentId], result: Segment) -> CoordResult<SegmentId> {
        let mut segments = self.segments.write();
        for id in old_segment_ids {
            segments.remove(id);
        }
        let produced_id = result.id;
        segments.insert(result.id, result);
        Ok(produced_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Timestamp;

    fn segment(id: SegmentId, collection_id: CollectionId) -> Segment {
        Segment {
            id,
            collection_id,
            partition_id: 1,
            insert_channel: "c1".into(),
            state: SegmentState::Flushed,
            num_rows: 100,
            max_row_num: 1000,
            last_expire_time: Timestamp(0),
            delta_logs: Vec::new(),
            is_compacting: false,
        }
    }

    #[tokio::test]
    async fn list_segments_filters_by_collection() {
        let catalog = InMemorySegmentCatalog::new();
        catalog.insert(segment(1, 10));
        catalog.insert(segment(2, 20));
        let listed = catalog.list_segments(10, None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, 1);
    }

    #[tokio::test]
    async fn set_compacting_flips_the_flag() {
        let catalog = InMemorySegmentCatalog::new();
        catalog.insert(segment(1, 10));
        catalog.set_compacting(&[1], true).await.unwrap();
        let segment = catalog.get_segment(1).await.unwrap().unwrap();
        assert!(segment.is_compacting);
    }

    #[tokio::test]
    async fn complete_merge_compaction_drops_inputs_and_inserts_the_result() {
        let catalog = InMemorySegmentCatalog::new();
        catalog.insert(segment(1, 10));
        catalog.insert(segment(2, 10));
        let produced = segment(3, 10);
        let produced_id = catalog.complete_merge_compaction(&[1, 2], produced).await.unwrap();
        assert_eq!(produced_id, 3);
        assert!(catalog.get_segment(1).await.unwrap().is_none());
        assert!(catalog.get_segment(2).await.unwrap().is_none());
        assert!(catalog.get_segment(3).await.unwrap().is_some());
    }
}
