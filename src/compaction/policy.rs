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

//! Trigger policies (§4.5): which segments get folded into a plan, and of
//! which kind. Boxed as trait objects so a deployment can swap in its own
//! thresholds without touching the Trigger's queue/ticker plumbing.

use crate::config::CoordOpts;
use crate::model::{CompactionType, Segment, SegmentId, SegmentState, Timestamp};

#[derive(Clone, Debug)]
pub struct PlanSpec {
    pub compaction_type: CompactionType,
    pub segment_ids: Vec<SegmentId>,
}

const DELETED_ROW_RATIO_THRESHOLD: f64 = 0.2;
const DELTA_LOG_BYTE_THRESHOLD: u64 = 10 * 1024 * 1024;

pub trait TriggerPolicy: Send + Sync + 'static {
    fn plan(&self, segments: &[Segment], timetravel: Timestamp, opts: &CoordOpts) -> Vec<PlanSpec>;
}

fn eligible(segment: &Segment) -> bool {
    segment.state == SegmentState::Flushed && !segment.is_compacting
}

/// One plan per segment whose deletion tombstones have gone stable
/// (`lastExpireTime < timetravel`) and have either eaten a fifth of its rows
/// or accumulated more than 10 MiB of delta-log bytes: rewriting it in place
/// reclaims the deleted space without touching its siblings.
pub struct SinglePolicy;

impl TriggerPolicy for SinglePolicy {
    fn plan(&self, segments: &[Segment], timetravel: Timestamp, _opts: &CoordOpts) -> Vec<PlanSpec> {
        segments
            .iter()
            .filter(|s| eligible(s))
            .filter(|s| s.last_expire_time < timetravel)
            .filter(|s| {
                let deleted_ratio = if s.num_rows == 0 {
                    0.0
                } else {
                    s.total_deleted_rows() as f64 / s.num_rows as f64
                };
                deleted_ratio >= DELETED_ROW_RATIO_THRESHOLD || s.delta_bytes_before(timetravel) > DELTA_LOG_BYTE_THRESHOLD
            })
            .map(|s| PlanSpec {
                compaction_type: CompactionType::Inner,
                segment_ids: vec![s.id],
            })
            .collect()
    }
}

/// Folds small, lightly-filled segments together once there are enough of
/// them to be worth a merge, chunked to `opts.max_little_segment_num` plans
/// apiece so no single plan grows unbounded.
pub struct MergePolicy;

impl TriggerPolicy for MergePolicy {
    fn plan(&self, segments: &[Segment], _timetravel: Timestamp, opts: &CoordOpts) -> Vec<PlanSpec> {
        let small: Vec<SegmentId> = segments
            .iter()
            .filter(|s| eligible(s))
            .filter(|s| s.max_row_num > 0 && s.num_rows * 2 < s.max_row_num)
            .map(|s| s.id)
            .collect();
        if small.len() < opts.max_little_segment_num.max(2) {
            return Vec::new();
        }
        small
            .chunks(opts.max_little_segment_num.max(2))
            .filter(|chunk| chunk.len() > 1)
            .map(|chunk| PlanSpec {
                compaction_type: CompactionType::Merge,
                segment_ids: chunk.to_vec(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Timestamp;

    const TIMETRAVEL: Timestamp = Timestamp(1_000_000);

    fn segment(id: SegmentId, num_rows: u64, max_row_num: u64, deleted: u64) -> Segment {
        Segment {
            id,
            collection_id: 1,
            partition_id: 1,
            insert_channel: "c1".into(),
            state: SegmentState::Flushed,
            num_rows,
            max_row_num,
            last_expire_time: Timestamp(0),
            delta_logs: vec![crate::model::DeltaLogEntry {
                timestamp_from: Timestamp(0),
                timestamp_to: Timestamp(0),
                record_entries: deleted,
                byte_size: deleted * 16,
            }],
            is_compacting: false,
        }
    }

    #[test]
    fn single_policy_picks_segments_past_the_deleted_row_ratio() {
        // 2001/10000 = 0.2001, just over the 0.2 threshold from scenario 5.
        let segments = vec![segment(1, 10_000, 20_000, 2001), segment(2, 10_000, 20_000, 100)];
        let plans = SinglePolicy.plan(&segments, TIMETRAVEL, &CoordOpts::default());
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].segment_ids, vec![1]);
    }

    #[test]
    fn single_policy_ignores_segments_whose_tombstones_are_not_yet_stable() {
        let mut s = segment(1, 10_000, 20_000, 5000);
        s.last_expire_time = TIMETRAVEL;
        let plans = SinglePolicy.plan(&[s], TIMETRAVEL, &CoordOpts::default());
        assert!(plans.is_empty());
    }

    #[test]
    fn single_policy_picks_segments_past_the_byte_threshold_even_below_the_ratio() {
        let mut s = segment(1, 10_000, 20_000, 100);
        s.delta_logs[0].byte_size = 11 * 1024 * 1024;
        let plans = SinglePolicy.plan(&[s], TIMETRAVEL, &CoordOpts::default());
        assert_eq!(plans.len(), 1);
    }

    #[test]
    fn merge_policy_requires_enough_small_segments() {
        let mut opts = CoordOpts::default();
        opts.max_little_segment_num = 3;
        let segments = vec![segment(1, 10, 1000, 0), segment(2, 10, 1000, 0)];
        assert!(MergePolicy.plan(&segments, TIMETRAVEL, &opts).is_empty());
    }

    #[test]
    fn merge_policy_chunks_once_threshold_is_met() {
        let mut opts = CoordOpts::default();
        opts.max_little_segment_num = 2;
        let segments = vec![segment(1, 10, 1000, 0), segment(2, 10, 1000, 0), segment(3, 10, 1000, 0)];
        let plans = MergePolicy.plan(&segments, TIMETRAVEL, &opts);
        // Three small segments chunked by two: one full pair, and a trailing
        // singleton that is dropped since merging one segment is a no-op.
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].segment_ids.len(), 2);
    }

    #[test]
    fn compacting_segments_are_excluded() {
        let mut s = segment(1, 10_000, 20_000, 5000);
        s.is_compacting = true;
        let plans = SinglePolicy.plan(&[s], TIMETRAVEL, &CoordOpts::default());
        assert!(plans.is_empty());
    }
}
