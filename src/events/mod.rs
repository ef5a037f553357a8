// Operator event bus (spec §6 "External interfaces" control surface).
//
// Every operator-visible thing that happens inside the coordinator — a
// cyber spawning, a cycle completing, a message landing — is published here
// as a typed envelope. The coordinator keeps one `EventBus` and clones its
// `Arc` into the Sandbox Host, Message Router, and each cyber's Cognitive
// Loop driver; an attached operator session subscribes with `subscribe()`.
//
// Modeled on `tokio::sync::broadcast` the way the teacher's CLI fans
// progress updates out to multiple listeners, rather than a single-consumer
// `mpsc`: an operator session that isn't currently listening simply misses
// events instead of blocking publishers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default channel capacity. A lagging subscriber drops the oldest events
/// rather than stalling the coordinator.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    CyberCreated { cyber: String },
    CyberTerminated { cyber: String, reason: String },
    CyberCrashed { cyber: String, exit_code: Option<i32> },
    CyberStateChanged { cyber: String, state: String },
    CycleStarted { cyber: String, cycle: u64 },
    CycleCompleted { cyber: String, cycle: u64 },
    StageStarted { cyber: String, cycle: u64, stage: String },
    StageCompleted { cyber: String, cycle: u64, stage: String },
    MessageSent { from: String, to: String, subject: String },
    MemoryChanged { cyber: String, block_id: String },
    BrainThinking { cyber: String, stage: String, request_id: String },
}

/// Envelope wrapping every event with a timestamp, matching spec §6's
/// `{type, data, timestamp}` operator event shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Thin wrapper around a `broadcast::Sender` so call sites publish by kind
/// without touching the channel machinery.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, kind: EventKind) {
        // No subscribers is a normal, common state (no attached operator
        // session); a send error here just means nobody is listening.
        let _ = self.sender.send(Event::new(kind));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
