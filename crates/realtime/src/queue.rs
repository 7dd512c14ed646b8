//! Durable offline queue for outbound messages.
//!
//! Messages sent while no connection is open are appended here and flushed,
//! oldest first, on the next transition into Open. The queue is persisted
//! as a JSON file so it survives a full process restart. Delivery is
//! at-least-once: an entry is removed only after its send is confirmed, so
//! a crash between send and removal can resend on the next flush.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use huntboard_protocol::Envelope;

/// A message held while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub envelope: Envelope,
    pub enqueued_at: DateTime<Utc>,
}

/// FIFO buffer of outbound messages, optionally backed by a file.
pub(crate) struct OfflineQueue {
    path: Option<PathBuf>,
    capacity: usize,
    messages: Mutex<VecDeque<QueuedMessage>>,
}

impl OfflineQueue {
    /// Opens the queue, loading any persisted messages.
    ///
    /// An unreadable or corrupt backing file degrades to an empty queue;
    /// it is never fatal.
    pub(crate) fn open(path: Option<PathBuf>, capacity: usize) -> Self {
        let messages = match &path {
            Some(p) => load_messages(p),
            None => VecDeque::new(),
        };
        Self {
            path,
            capacity,
            messages: Mutex::new(messages),
        }
    }

    /// Appends a message, persisting the new tail.
    ///
    /// Past capacity the message is dropped and logged; existing entries
    /// are never evicted to make room.
    pub(crate) fn enqueue(&self, envelope: Envelope) {
        {
            let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
            if messages.len() >= self.capacity {
                warn!(
                    kind = %envelope.kind,
                    capacity = self.capacity,
                    "offline queue full, dropping message"
                );
                return;
            }
            messages.push_back(QueuedMessage {
                envelope,
                enqueued_at: Utc::now(),
            });
            debug!(queued = messages.len(), "message buffered offline");
        }
        self.persist();
    }

    /// Returns a copy of the oldest message without removing it.
    pub(crate) fn front(&self) -> Option<QueuedMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .front()
            .cloned()
    }

    /// Removes the oldest message after its send was confirmed.
    pub(crate) fn confirm_front(&self) {
        {
            let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
            messages.pop_front();
        }
        self.persist();
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the current queue to disk. Failures are logged, not raised —
    /// the in-memory queue stays authoritative for this process.
    fn persist(&self) {
        let Some(path) = &self.path else { return };
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let json = match serde_json::to_string_pretty(&*messages) {
            Ok(j) => j,
            Err(e) => {
                warn!("failed to serialize offline queue: {e}");
                return;
            }
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("failed to create queue directory: {e}");
                return;
            }
        }
        if let Err(e) = std::fs::write(path, json) {
            warn!("failed to persist offline queue: {e}");
        }
    }
}

/// Loads queued messages from disk; any failure yields an empty queue.
fn load_messages(path: &Path) -> VecDeque<QueuedMessage> {
    if !path.exists() {
        return VecDeque::new();
    }
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) => {
            warn!("failed to read offline queue, starting empty: {e}");
            return VecDeque::new();
        }
    };
    match serde_json::from_str::<VecDeque<QueuedMessage>>(&data) {
        Ok(messages) => {
            debug!(count = messages.len(), "loaded offline queue from {path:?}");
            messages
        }
        Err(e) => {
            warn!("corrupt offline queue, starting empty: {e}");
            VecDeque::new()
        }
    }
}
