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

//! The compaction engine: the segment-metadata façade (§4.6), the Trigger's
//! pluggable policies (§4.5), the Trigger itself, and the Plan Handler (§4.4)
//! that actually runs plans against workers.

pub mod plan_handler;
pub mod policy;
pub mod segment;
pub mod trigger;

pub use plan_handler::PlanHandler;
pub use policy::{MergePolicy, PlanSpec, SinglePolicy, TriggerPolicy};
pub use segment::{InMemorySegmentCatalog, SegmentCatalog};
pub use trigger::{ChannelLocator, CompactionTrigger};
