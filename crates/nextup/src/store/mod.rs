//! Authoritative ticket state.
//!
//! [`TicketStore`] owns every [`AllocationRecord`] ever created and the index of
//! which record is currently active for each [`ClientIdentity`]. All reads and
//! writes go through one coarse lock, so each public operation is a single
//! critical section and the operations are linearizable with respect to one
//! another.
//!
//! ## Invariants
//!
//! - At most one active record per identity.
//! - No ticket is active for two identities at once, unless all
//!   [`CYCLE_LEN`] tickets are already held.
//! - Every mutation bumps [`Snapshot::version`] by exactly one.
//!
//! When a [`Journal`] is attached, each mutation is submitted to it while the
//! lock is still held, so the ledger replays mutations in commit order.

#[cfg(test)]
mod tests;

use crate::{
    AllocationRecord, ClientIdentity, RecordStatus, Ticket,
    ledger::{Journal, LedgerCommand},
    ticket::CYCLE_LEN,
};
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Global queue state captured inside the critical section that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// Number of mutations applied so far.
    pub version: u64,
    /// Highest active ticket, or [`Ticket::ORIGIN`] when none is active.
    pub current: Ticket,
    /// Number of active records.
    pub active: usize,
}

/// Result of an allocating operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Issued {
    /// The ticket now held by the caller.
    pub ticket: Ticket,
    /// `false` when an existing active ticket was returned unchanged.
    pub created: bool,
    pub snapshot: Snapshot,
}

#[derive(Debug, Default)]
struct StoreState {
    records: Vec<AllocationRecord>,
    active: HashMap<ClientIdentity, usize>,
    version: u64,
}

impl StoreState {
    fn active_ticket(&self, identity: &ClientIdentity) -> Option<Ticket> {
        self.active
            .get(identity)
            .map(|&index| self.records[index].ticket)
    }

    fn active_tickets(&self) -> impl Iterator<Item = Ticket> + '_ {
        self.active.values().map(|&index| self.records[index].ticket)
    }

    fn max_active(&self) -> Option<Ticket> {
        self.active_tickets().max()
    }

    fn peek(&self) -> Ticket {
        self.max_active().unwrap_or(Ticket::ORIGIN)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: self.version,
            current: self.peek(),
            active: self.active.len(),
        }
    }

    /// First ticket after `after` that nobody currently holds.
    ///
    /// Collisions only happen once the cycle has wrapped while an old ticket
    /// is still active. If every ticket is held, the plain successor is
    /// returned.
    fn next_free(&self, after: Ticket) -> Ticket {
        let held: HashSet<Ticket> = self.active_tickets().collect();
        let first = after.successor();
        let mut candidate = first;
        for _ in 0..CYCLE_LEN {
            if !held.contains(&candidate) {
                return candidate;
            }
            candidate = candidate.successor();
        }
        first
    }

    fn deactivate(&mut self, identity: &ClientIdentity) {
        if let Some(index) = self.active.remove(identity) {
            self.records[index].status = RecordStatus::Inactive;
        }
    }

    fn activate(&mut self, identity: &ClientIdentity, ticket: Ticket) -> AllocationRecord {
        self.deactivate(identity);
        let record = AllocationRecord::active(identity.clone(), ticket);
        self.active.insert(identity.clone(), self.records.len());
        self.records.push(record.clone());
        self.version += 1;
        record
    }
}

/// In-memory ticket state with atomic allocate/peek/reset operations.
#[derive(Debug, Default)]
pub struct TicketStore {
    state: Mutex<StoreState>,
    journal: Option<Journal>,
}

impl TicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that journals every mutation to a ledger.
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            state: Mutex::default(),
            journal: Some(journal),
        }
    }

    /// Returns the caller's active ticket, or issues one.
    ///
    /// A new ticket is the successor of the highest active ticket. An empty
    /// store issues [`Ticket::FIRST`].
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(identity = %identity)))]
    pub fn current_or_assign(&self, identity: &ClientIdentity) -> Issued {
        let mut state = self.state.lock();

        if let Some(ticket) = state.active_ticket(identity) {
            return Issued {
                ticket,
                created: false,
                snapshot: state.snapshot(),
            };
        }

        let ticket = match state.max_active() {
            None => Ticket::FIRST,
            Some(max) => state.next_free(max),
        };
        let record = state.activate(identity, ticket);
        self.journal(LedgerCommand::Append(record));

        #[cfg(feature = "tracing")]
        tracing::debug!(%ticket, "Issued ticket");

        Issued {
            ticket,
            created: true,
            snapshot: state.snapshot(),
        }
    }

    /// Replaces the caller's ticket with a fresh one.
    ///
    /// The new ticket is the successor of the highest active ticket, which
    /// includes the caller's own. With nothing active the successor of
    /// [`Ticket::ORIGIN`] is used. The caller's previous record becomes
    /// inactive.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(identity = %identity)))]
    pub fn advance(&self, identity: &ClientIdentity) -> Issued {
        let mut state = self.state.lock();

        let base = state.max_active().unwrap_or(Ticket::ORIGIN);
        state.deactivate(identity);
        let ticket = state.next_free(base);
        let record = state.activate(identity, ticket);
        self.journal(LedgerCommand::Append(record));

        #[cfg(feature = "tracing")]
        tracing::debug!(%ticket, "Advanced ticket");

        Issued {
            ticket,
            created: true,
            snapshot: state.snapshot(),
        }
    }

    /// Highest active ticket, or [`Ticket::ORIGIN`] when none is active.
    pub fn peek(&self) -> Ticket {
        self.state.lock().peek()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().snapshot()
    }

    /// Marks every active record inactive. Always counts as a mutation, so
    /// observers are told about repeated resets too.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub fn reset_all(&self) -> Snapshot {
        let mut state = self.state.lock();

        let StoreState {
            records, active, ..
        } = &mut *state;
        for (_, index) in active.drain() {
            records[index].status = RecordStatus::Inactive;
        }
        state.version += 1;
        self.journal(LedgerCommand::MarkInactiveAll);

        state.snapshot()
    }

    /// Replaces the store contents with records read back from a ledger.
    ///
    /// Records are taken oldest first. If several active records name the
    /// same identity, or hand the same ticket to different identities, the
    /// last one wins and the earlier ones are demoted. Nothing is journaled.
    pub fn restore(&self, records: impl IntoIterator<Item = AllocationRecord>) -> Snapshot {
        let mut guard = self.state.lock();
        let version = guard.version + 1;
        *guard = StoreState {
            version,
            ..StoreState::default()
        };
        let state = &mut *guard;
        let mut holders: HashMap<Ticket, usize> = HashMap::new();

        for mut record in records {
            if record.is_active() {
                let index = state.records.len();
                if let Some(previous) = state.active.insert(record.identity.clone(), index) {
                    state.records[previous].status = RecordStatus::Inactive;
                    holders.remove(&state.records[previous].ticket);
                }
                if let Some(previous) = holders.insert(record.ticket, index) {
                    let displaced = &mut state.records[previous];
                    displaced.status = RecordStatus::Inactive;
                    state.active.remove(&displaced.identity);
                }
            } else {
                record.status = RecordStatus::Inactive;
            }
            state.records.push(record);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            records = state.records.len(),
            active = state.active.len(),
            "Restored ticket state"
        );

        state.snapshot()
    }

    /// The identity's active ticket, if any.
    pub fn ticket_of(&self, identity: &ClientIdentity) -> Option<Ticket> {
        self.state.lock().active_ticket(identity)
    }

    /// Every active record.
    pub fn active_records(&self) -> Vec<AllocationRecord> {
        let state = self.state.lock();
        let mut active: Vec<AllocationRecord> = state
            .active
            .values()
            .map(|&index| state.records[index].clone())
            .collect();
        active.sort_by_key(|record| record.created_at);
        active
    }

    /// Every record ever created, oldest first.
    pub fn history(&self) -> Vec<AllocationRecord> {
        self.state.lock().records.clone()
    }

    /// Records created on the given local day, oldest first.
    pub fn records_on(&self, day: NaiveDate) -> Vec<AllocationRecord> {
        self.state
            .lock()
            .records
            .iter()
            .filter(|record| record.created_on(day))
            .cloned()
            .collect()
    }

    fn journal(&self, command: LedgerCommand) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Err(_e) = journal.submit(command) {
            #[cfg(feature = "tracing")]
            tracing::warn!("Dropped ledger command: {_e}");
        }
    }
}
