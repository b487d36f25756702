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

//! The State Timer (§4.1): one single-shot countdown per channel, cancellable
//! by name, racing a cancel signal against the deadline so cancellation never
//! fires a spurious timeout.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::model::{ChannelName, NodeId};

/// Emitted once a channel's countdown elapses without being cancelled first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerExpired {
    pub channel: ChannelName,
    pub node: NodeId,
}

struct Handle {
    cancel: oneshot::Sender<()>,
}

/// Owns one background task per live countdown. Cancelling removes the task's
/// `Handle`, dropping its `oneshot::Sender`, which the task observes instead
/// of waiting out the clock.
pub struct ChannelTimer {
    handles: Mutex<HashMap<ChannelName, Handle>>,
    tx: mpsc::Sender<TimerExpired>,
}

impl ChannelTimer {
    /// `capacity` bounds the expiry event channel; a slow consumer applies
    /// backpressure to new timer firings rather than growing unbounded.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TimerExpired>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                handles: Mutex::new(HashMap::new()),
                tx,
            },
            rx,
        )
    }

    /// Starts (or restarts) a countdown for `channel`. Any prior countdown for
    /// the same channel is cancelled first, so a single channel never has two
    /// competing timers in flight.
    pub fn add(&self, channel: ChannelName, node: NodeId, timeout: Duration) {
        self.remove(&channel);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.handles.lock().insert(channel.clone(), Handle { cancel: cancel_tx });
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    let _ = tx.send(TimerExpired { channel, node }).await;
                }
                _ = cancel_rx => {}
            }
        });
    }

    /// Cancels `channel`'s countdown, if one is running. Idempotent.
    pub fn remove(&self, channel: &str) {
        if let Some(handle) = self.handles.lock().remove(channel) {
            let _ = handle.cancel.send(());
        }
    }

    /// Cancels every countdown in `channels`. Idempotent per channel.
    pub fn remove_many<'a>(&self, channels: impl IntoIterator<Item = &'a str>) {
        for channel in channels {
            self.remove(channel);
        }
    }

    pub fn is_running(&self, channel: &str) -> bool {
        self.handles.lock().contains_key(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_after_timeout() {
        let (timer, mut rx) = ChannelTimer::new(8);
        timer.add("c1".to_string(), 1, Duration::from_millis(20));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel, "c1");
        assert_eq!(event.node, 1);
    }

    #[tokio::test]
    async fn cancel_suppresses_the_event() {
        let (timer, mut rx) = ChannelTimer::new(8);
        timer.add("c1".to_string(), 1, Duration::from_millis(30));
        timer.remove("c1");
        let res = tokio::time::timeout(Duration::from_millis(80), rx.recv()).await;
        assert!(res.is_err(), "no event should have been delivered");
    }

    #[tokio::test]
    async fn re_adding_replaces_the_prior_countdown() {
        let (timer, mut rx) = ChannelTimer::new(8);
        timer.add("c1".to_string(), 1, Duration::from_millis(10));
        timer.add("c1".to_string(), 2, Duration::from_secs(5));
        let event = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(event.is_err(), "the short-lived first timer must not fire");
        assert!(timer.is_running("c1"));
    }
}
