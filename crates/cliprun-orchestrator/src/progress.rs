//! Progress Channel: per-task ordered event streams.
//!
//! A channel is opened when a task is created and closed exactly once, right
//! after its terminal event is published. Closing drops every subscriber's
//! sender, which ends their streams.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use cliprun_core::{ProgressEvent, TaskId};

/// Stream of events for one task; ends after the terminal event.
pub type ProgressStream = UnboundedReceiverStream<ProgressEvent>;

#[derive(Default)]
struct Channel {
    subscribers: Vec<mpsc::UnboundedSender<ProgressEvent>>,
    next_seq: u64,
}

/// Registry of open progress channels.
#[derive(Default)]
pub struct ProgressHub {
    channels: RwLock<HashMap<TaskId, Arc<Mutex<Channel>>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the channel for a new task. Re-opening is a no-op.
    pub async fn open(&self, task_id: &TaskId) {
        self.channels
            .write()
            .await
            .entry(task_id.clone())
            .or_default();
    }

    /// Subscribe to a task's future events.
    ///
    /// Returns `None` once the channel has been closed; callers then fall back
    /// to the Registry snapshot.
    pub async fn subscribe(&self, task_id: &TaskId) -> Option<ProgressStream> {
        let channel = self.channels.read().await.get(task_id).cloned()?;
        let mut channel = channel.lock().await;
        if !self.channels.read().await.contains_key(task_id) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        channel.subscribers.push(tx);
        Some(UnboundedReceiverStream::new(rx))
    }

    /// Publish an event to every current subscriber, in order.
    ///
    /// A terminal event closes the channel. Returns false if the channel was
    /// already closed, in which case nothing is delivered.
    pub async fn publish(&self, mut event: ProgressEvent) -> bool {
        let Some(channel) = self.channels.read().await.get(&event.task_id).cloned() else {
            debug!(task_id = %event.task_id, "Dropping event for closed channel");
            return false;
        };
        let terminal = event.is_terminal();

        // Close under the channel lock so no publish can slip in after the
        // terminal event.
        let mut channel = channel.lock().await;
        if terminal {
            let removed = self.channels.write().await.remove(&event.task_id);
            if removed.is_none() {
                warn!(task_id = %event.task_id, "Terminal event for already closed channel");
                return false;
            }
        } else if !self.channels.read().await.contains_key(&event.task_id) {
            return false;
        }

        event.seq = channel.next_seq;
        channel.next_seq += 1;
        channel.subscribers.retain(|tx| tx.send(event.clone()).is_ok());

        if terminal {
            channel.subscribers.clear();
            debug!(task_id = %event.task_id, "Progress channel closed");
        }
        true
    }

    /// Returns true while the task's channel is open.
    pub async fn is_open(&self, task_id: &TaskId) -> bool {
        self.channels.read().await.contains_key(task_id)
    }
}

/// A one-event stream carrying `event`, for subscribers that arrive after a
/// task has finished.
pub fn replay(event: ProgressEvent) -> ProgressStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(event);
    UnboundedReceiverStream::new(rx)
}
