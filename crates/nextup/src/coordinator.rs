//! Composition of the store and the broadcast hub.
//!
//! Each operation runs one [`TicketStore`] critical section, then publishes the
//! resulting [`Snapshot`] after the store lock has been released. Snapshots are
//! published with their version, so a publisher that lost the race to the hub
//! cannot overwrite newer state for any observer.

use crate::{
    BroadcastHub, BroadcastMode, ClientIdentity, Delivery, Issued, Notification, Observer,
    ObserverId, QueueState, Snapshot, Ticket, TicketReply, TicketStore,
};

/// A command received on a ticket stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Read the current maximum ticket without allocating.
    Get,
    /// Replace the caller's ticket with a fresh one.
    Next,
    /// Deactivate every ticket.
    Clear,
}

impl Command {
    /// Recognises `get`, `next`, `add` and `clear`. Anything else is `None`
    /// and must be ignored by the transport.
    pub fn parse(frame: &str) -> Option<Self> {
        match frame.trim() {
            "get" => Some(Self::Get),
            "next" | "add" => Some(Self::Next),
            "clear" => Some(Self::Clear),
            _ => None,
        }
    }
}

/// Result of a coordinator operation together with what its broadcast did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub delivery: Delivery,
}

/// Entry point shared by every transport.
#[derive(Debug)]
pub struct Coordinator {
    store: TicketStore,
    hub: BroadcastHub<Notification>,
    mode: BroadcastMode,
}

impl Coordinator {
    pub fn new(store: TicketStore, mode: BroadcastMode, observer_capacity: usize) -> Self {
        Self {
            store,
            hub: BroadcastHub::new(observer_capacity),
            mode,
        }
    }

    pub fn store(&self) -> &TicketStore {
        &self.store
    }

    pub fn mode(&self) -> BroadcastMode {
        self.mode
    }

    /// Returns the caller's ticket, issuing one if needed, and broadcasts the
    /// queue state.
    pub fn get_or_create(&self, identity: &ClientIdentity) -> Outcome<Issued> {
        let issued = self.store.current_or_assign(identity);
        let delivery = self.publish(issued.snapshot);
        Outcome {
            value: issued,
            delivery,
        }
    }

    /// Gives the caller a fresh ticket and broadcasts the queue state.
    pub fn advance(&self, identity: &ClientIdentity) -> Outcome<Issued> {
        let issued = self.store.advance(identity);
        let delivery = self.publish(issued.snapshot);
        Outcome {
            value: issued,
            delivery,
        }
    }

    /// Deactivates every ticket and broadcasts the empty queue.
    pub fn reset(&self) -> Outcome<Snapshot> {
        let snapshot = self.store.reset_all();
        let delivery = self.publish(snapshot);
        Outcome {
            value: snapshot,
            delivery,
        }
    }

    /// Current maximum ticket and active count. Publishes nothing.
    pub fn current(&self) -> QueueState {
        self.store.snapshot().into()
    }

    /// Executes a stream command on behalf of `identity`.
    pub fn handle(&self, identity: &ClientIdentity, command: Command) -> Outcome<TicketReply> {
        match command {
            Command::Get => Outcome {
                value: self.store.peek().into(),
                delivery: Delivery::default(),
            },
            Command::Next => {
                let outcome = self.advance(identity);
                Outcome {
                    value: outcome.value.ticket.into(),
                    delivery: outcome.delivery,
                }
            }
            Command::Clear => Outcome {
                value: Ticket::ORIGIN.into(),
                delivery: self.reset().delivery,
            },
        }
    }

    pub fn subscribe(&self) -> Observer<Notification> {
        self.hub.register()
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.hub.unregister(id)
    }

    pub fn observers(&self) -> usize {
        self.hub.len()
    }

    fn publish(&self, snapshot: Snapshot) -> Delivery {
        self.hub
            .publish_versioned(snapshot.version, self.mode.notification(snapshot))
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(
            TicketStore::new(),
            BroadcastMode::default(),
            crate::hub::DEFAULT_OBSERVER_BUFFER,
        )
    }
}
