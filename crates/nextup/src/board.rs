//! Free-form queue board.
//!
//! A simpler sibling of the ticket queue: observers share one ordered list of
//! arbitrary strings. Any accepted mutation is pushed to every board observer
//! as a [`BoardState`].
//!
//! Inbound frames are either JSON commands or raw text:
//!
//! ```text
//! {"action": "add", "value": "latte"}   append "latte"
//! {"action": "clear"}                   empty the board
//! clear                                 empty the board
//! latte                                 append "latte"
//! ```

use crate::{
    hub::{BroadcastHub, Observer, ObserverId},
    wire::BoardState,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;

/// A mutation of the board.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoardCommand {
    Add(String),
    Clear,
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ActionFrame {
    Add {
        #[serde(default)]
        value: String,
    },
    Clear,
}

impl BoardCommand {
    /// Interprets an inbound text frame.
    ///
    /// Returns `None` for frames that change nothing: empty text, JSON with an
    /// unknown action, or an `add` without a value.
    pub fn parse(frame: &str) -> Option<Self> {
        let trimmed = frame.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed.starts_with('{') {
            return match serde_json::from_str::<ActionFrame>(trimmed) {
                Ok(ActionFrame::Add { value }) if !value.is_empty() => Some(Self::Add(value)),
                Ok(ActionFrame::Add { .. }) => None,
                Ok(ActionFrame::Clear) => Some(Self::Clear),
                Err(_) => None,
            };
        }

        if trimmed == "clear" {
            Some(Self::Clear)
        } else {
            Some(Self::Add(trimmed.to_string()))
        }
    }
}

/// Shared list of items with live fan-out.
///
/// Mutations publish while the item lock is held, and new observers are
/// seeded with the current board under the same lock, so every observer sees
/// the board it joined followed by each later change exactly once.
#[derive(Debug)]
pub struct ItemBoard {
    items: Mutex<Vec<String>>,
    hub: BroadcastHub<Arc<BoardState>>,
}

impl ItemBoard {
    pub fn new(observer_capacity: usize) -> Self {
        Self {
            items: Mutex::default(),
            hub: BroadcastHub::new(observer_capacity),
        }
    }

    /// Applies `command` and broadcasts the resulting state.
    pub fn apply(&self, command: BoardCommand) -> Arc<BoardState> {
        let mut items = self.items.lock();
        match command {
            BoardCommand::Add(item) => items.push(item),
            BoardCommand::Clear => items.clear(),
        }
        let state = Arc::new(BoardState::new(items.clone()));
        self.hub.publish(Arc::clone(&state));
        state
    }

    pub fn snapshot(&self) -> Arc<BoardState> {
        Arc::new(BoardState::new(self.items.lock().clone()))
    }

    /// Registers an observer. Its first payload is the current board.
    pub fn subscribe(&self) -> Observer<Arc<BoardState>> {
        let items = self.items.lock();
        self.hub.register_with(Arc::new(BoardState::new(items.clone())))
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.hub.unregister(id)
    }

    pub fn observers(&self) -> usize {
        self.hub.len()
    }
}

impl Default for ItemBoard {
    fn default() -> Self {
        Self::new(crate::hub::DEFAULT_OBSERVER_BUFFER)
    }
}
