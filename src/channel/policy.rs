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

//! Assignment policy (§4.3): which node a newly watched or re-parked channel
//! lands on. Boxed as a trait object, the same dynamic-dispatch shape the
//! teacher uses for its own pluggable scheduling/selection policies, so a
//! deployment can swap the policy without touching the Channel Manager.

use std::collections::HashMap;

use crate::model::{ChannelName, NodeId};

pub trait AssignPolicy: Send + Sync + 'static {
    /// Picks a node to host a new channel out of the currently registered,
    /// online nodes and their present load. Returns `None` when no node is
    /// available and the channel must be parked in the buffer.
    fn assign(&self, nodes: &[NodeId], load: &HashMap<NodeId, usize>, channel: &ChannelName) -> Option<NodeId>;
}

/// Picks the node with the fewest currently-assigned channels, breaking ties
/// by the lowest node id so the choice is deterministic (useful for tests and
/// for not thrashing assignments on repeat calls with even load).
pub struct LeastLoadedPolicy;

impl AssignPolicy for LeastLoadedPolicy {
    fn assign(&self, nodes: &[NodeId], load: &HashMap<NodeId, usize>, _channel: &ChannelName) -> Option<NodeId> {
        nodes
            .iter()
            .copied()
            .min_by_key(|node| (load.get(node).copied().unwrap_or(0), *node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_least_loaded_node() {
        let policy = LeastLoadedPolicy;
        let nodes = vec![1, 2, 3];
        let mut load = HashMap::new();
        load.insert(1, 5);
        load.insert(2, 1);
        load.insert(3, 3);
        assert_eq!(policy.assign(&nodes, &load, &"c".to_string()), Some(2));
    }

    #[test]
    fn ties_break_on_lowest_node_id() {
        let policy = LeastLoadedPolicy;
        let nodes = vec![3, 1, 2];
        let load = HashMap::new();
        assert_eq!(policy.assign(&nodes, &load, &"c".to_string()), Some(1));
    }

    #[test]
    fn empty_node_set_returns_none() {
        let policy = LeastLoadedPolicy;
        assert_eq!(policy.assign(&[], &HashMap::new(), &"c".to_string()), None);
    }
}
