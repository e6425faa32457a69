//! Timer management for the node runtime.
//!
//! Each armed timer is a spawned sleep task that pushes the matching event
//! into the node's dedicated timer channel when it fires.

use dolev_core::{Event, TimerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Manages the timers of one node.
pub struct TimerManager {
    /// Active timers (can be cancelled).
    timers: HashMap<TimerId, JoinHandle<()>>,

    /// Channel the fired timer events are delivered on.
    event_tx: mpsc::Sender<Event>,
}

impl TimerManager {
    /// Create a new timer manager.
    pub fn new(event_tx: mpsc::Sender<Event>) -> Self {
        Self {
            timers: HashMap::new(),
            event_tx,
        }
    }

    /// The event a timer delivers when it fires.
    pub fn event_for(id: TimerId) -> Event {
        match id {
            TimerId::Liveness => Event::LivenessTimer,
        }
    }

    /// Arm a timer, replacing any pending timer with the same id.
    pub fn set_timer(&mut self, id: TimerId, duration: Duration) {
        self.cancel_timer(id);

        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if event_tx.send(Self::event_for(id)).await.is_err() {
                trace!(timer = ?id, "Timer fired after the node stopped");
            }
        });

        self.timers.insert(id, handle);
    }

    /// Cancel a timer. No-op if it is not armed.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
        }
    }

    /// Cancel every armed timer.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    /// Number of timers that are armed or have fired without being re-armed.
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
