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

//! The channel-assignment engine: the durable store (§4.2), the assignment
//! policy (§4.3), and the manager tying both to the State Timer (§4.1).

pub mod manager;
pub mod policy;
pub mod store;

pub use manager::{ChannelAck, ChannelManager};
pub use policy::{AssignPolicy, LeastLoadedPolicy};
pub use store::ChannelStore;
