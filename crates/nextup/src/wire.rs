//! JSON payloads exchanged with clients.
//!
//! ```text
//! {"queue": "A3"}                 ticket reply
//! {"queue": "A3", "count": 2}     queue state (reply or broadcast)
//! {"event": "queue"}              change notification, re-fetch required
//! {"queue": ["x", "y"], "count": 2}   free-form board state
//! ```

use crate::{Error, Result, Snapshot, Ticket};
use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};

/// Response carrying a single ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketReply {
    pub queue: Ticket,
}

impl From<Ticket> for TicketReply {
    fn from(queue: Ticket) -> Self {
        Self { queue }
    }
}

/// The highest active ticket together with the number of active holders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    pub queue: Ticket,
    pub count: usize,
}

impl From<Snapshot> for QueueState {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            queue: snapshot.current,
            count: snapshot.active,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Queue,
}

/// Payload pushed to ticket observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Notification {
    State(QueueState),
    Event { event: EventKind },
}

/// Shape of the payload pushed to ticket observers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BroadcastMode {
    /// Push the full [`QueueState`].
    #[default]
    State,
    /// Push `{"event":"queue"}` and let observers re-fetch.
    Event,
}

impl BroadcastMode {
    pub fn notification(self, snapshot: Snapshot) -> Notification {
        match self {
            Self::State => Notification::State(snapshot.into()),
            Self::Event => Notification::Event {
                event: EventKind::Queue,
            },
        }
    }
}

impl fmt::Display for BroadcastMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::State => "state",
            Self::Event => "event",
        })
    }
}

impl FromStr for BroadcastMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "state" => Ok(Self::State),
            "event" => Ok(Self::Event),
            other => Err(Error::InvalidSetting {
                reason: format!("unknown broadcast mode {other:?}, expected `state` or `event`"),
            }),
        }
    }
}

/// Snapshot of the free-form board.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    pub queue: Vec<String>,
    pub count: usize,
}

impl BoardState {
    pub fn new(queue: Vec<String>) -> Self {
        let count = queue.len();
        Self { queue, count }
    }
}
