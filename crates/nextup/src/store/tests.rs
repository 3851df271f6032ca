use super::*;
use crate::ledger::Journal;
use std::sync::Arc;

fn id(token: &str) -> ClientIdentity {
    ClientIdentity::from(token)
}

fn t(raw: &str) -> Ticket {
    Ticket::parse(raw).unwrap()
}

fn assert_single_active_per_identity(store: &TicketStore) {
    let mut seen = HashSet::new();
    for record in store.history().iter().filter(|r| r.is_active()) {
        assert!(
            seen.insert(record.identity.clone()),
            "{} holds more than one active record",
            record.identity
        );
    }
}

fn assert_no_duplicate_active_ticket(store: &TicketStore) {
    let mut seen = HashSet::new();
    for record in store.active_records() {
        assert!(seen.insert(record.ticket), "{} is active twice", record.ticket);
    }
}

#[test]
fn first_ticket_from_empty_store_is_a1() {
    let store = TicketStore::new();
    let issued = store.current_or_assign(&id("c1"));
    assert_eq!(issued.ticket, Ticket::FIRST);
    assert!(issued.created);
    assert_eq!(issued.snapshot.current, Ticket::FIRST);
    assert_eq!(issued.snapshot.active, 1);
}

#[test]
fn empty_store_branch_matches_successor_of_origin() {
    // The empty-store path and the "A0 is the max" path must agree.
    let empty = TicketStore::new();
    let from_empty = empty.current_or_assign(&id("c1")).ticket;

    let store = TicketStore::new();
    store.restore([AllocationRecord::active(id("holder"), Ticket::ORIGIN)]);
    let from_origin = store.current_or_assign(&id("c1")).ticket;

    assert_eq!(from_empty, from_origin);
    assert_eq!(from_origin, Ticket::ORIGIN.successor());
}

#[test]
fn current_or_assign_is_idempotent_per_identity() {
    let store = TicketStore::new();
    let first = store.current_or_assign(&id("c1"));
    let again = store.current_or_assign(&id("c1"));
    assert_eq!(first.ticket, again.ticket);
    assert!(!again.created);
    assert_eq!(first.snapshot.version, again.snapshot.version);
    assert_eq!(store.history().len(), 1);
}

#[test]
fn walkthrough_get_advance_reset() {
    let store = TicketStore::new();

    assert_eq!(store.current_or_assign(&id("C1")).ticket, t("A1"));
    assert_eq!(store.current_or_assign(&id("C2")).ticket, t("A2"));

    // C1 must not collide with C2's A2.
    assert_eq!(store.advance(&id("C1")).ticket, t("A3"));
    assert_eq!(store.current_or_assign(&id("C1")).ticket, t("A3"));
    assert_eq!(store.peek(), t("A3"));

    store.reset_all();
    assert_eq!(store.peek(), Ticket::ORIGIN);
    assert_eq!(store.current_or_assign(&id("C9")).ticket, t("A1"));
    assert_eq!(store.current_or_assign(&id("C1")).ticket, t("A2"));

    assert_single_active_per_identity(&store);
}

#[test]
fn advance_without_active_ticket_starts_after_origin() {
    let store = TicketStore::new();
    assert_eq!(store.advance(&id("c1")).ticket, t("A1"));
    assert_eq!(store.advance(&id("c1")).ticket, t("A2"));
    assert_eq!(store.ticket_of(&id("c1")), Some(t("A2")));

    let history = store.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, RecordStatus::Inactive);
    assert_eq!(history[1].status, RecordStatus::Active);
}

#[test]
fn peek_does_not_mutate() {
    let store = TicketStore::new();
    assert_eq!(store.peek(), Ticket::ORIGIN);
    store.current_or_assign(&id("c1"));
    let before = store.snapshot();
    assert_eq!(store.peek(), t("A1"));
    assert_eq!(store.snapshot(), before);
}

#[test]
fn reset_is_idempotent_and_keeps_history() {
    let store = TicketStore::new();
    store.current_or_assign(&id("c1"));
    store.current_or_assign(&id("c2"));

    let first = store.reset_all();
    let second = store.reset_all();

    assert_eq!(first.current, Ticket::ORIGIN);
    assert_eq!(second.current, Ticket::ORIGIN);
    assert_eq!(first.active, 0);
    assert_eq!(second.active, 0);
    assert_eq!(second.version, first.version + 1);
    assert_eq!(store.peek(), Ticket::ORIGIN);
    assert_eq!(store.history().len(), 2);
    assert!(store.active_records().is_empty());
}

#[test]
fn issuance_is_monotonic_until_wrap() {
    let store = TicketStore::new();
    let mut last = Ticket::ORIGIN;
    for n in 0..200 {
        let issued = if n % 3 == 0 {
            store.advance(&id(&format!("c{}", n % 7)))
        } else {
            store.current_or_assign(&id(&format!("fresh-{n}")))
        };
        if issued.created {
            assert!(issued.ticket > last, "{} after {}", issued.ticket, last);
            last = issued.ticket;
        }
    }
    assert_single_active_per_identity(&store);
    assert_no_duplicate_active_ticket(&store);
}

#[test]
fn wrap_skips_tickets_still_held() {
    let store = TicketStore::new();
    store.restore([
        AllocationRecord::active(id("early"), t("A0")),
        AllocationRecord::active(id("late"), Ticket::LAST),
    ]);

    // Z9 wraps to A0, which is still held, so A1 is next.
    assert_eq!(store.current_or_assign(&id("new")).ticket, t("A1"));
    assert_eq!(store.advance(&id("late")).ticket, t("A2"));
    assert_no_duplicate_active_ticket(&store);
}

#[test]
fn full_cycle_falls_back_to_plain_successor() {
    let store = TicketStore::new();
    store.restore((0..CYCLE_LEN).map(|i| {
        AllocationRecord::active(id(&format!("h{i}")), Ticket::from_index(i))
    }));
    assert_eq!(store.snapshot().active, CYCLE_LEN);
    assert_eq!(store.current_or_assign(&id("overflow")).ticket, Ticket::ORIGIN);
}

#[test]
fn version_counts_mutations_only() {
    let store = TicketStore::new();
    assert_eq!(store.snapshot().version, 0);
    store.current_or_assign(&id("c1"));
    store.current_or_assign(&id("c1"));
    store.peek();
    assert_eq!(store.snapshot().version, 1);
    store.advance(&id("c1"));
    store.reset_all();
    assert_eq!(store.snapshot().version, 3);
}

#[test]
fn restore_demotes_duplicate_active_records() {
    let store = TicketStore::new();
    let snapshot = store.restore([
        AllocationRecord::active(id("c1"), t("A1")),
        AllocationRecord::active(id("c2"), t("A2")),
        AllocationRecord::active(id("c1"), t("A3")),
    ]);

    assert_eq!(snapshot.active, 2);
    assert_eq!(snapshot.current, t("A3"));
    assert_eq!(store.ticket_of(&id("c1")), Some(t("A3")));
    assert_single_active_per_identity(&store);
    assert_eq!(store.current_or_assign(&id("c3")).ticket, t("A4"));
}

#[test]
fn restore_keeps_the_newest_holder_of_a_shared_ticket() {
    let store = TicketStore::new();
    let snapshot = store.restore([
        AllocationRecord::active(id("a"), t("A1")),
        AllocationRecord::active(id("b"), t("A1")),
        AllocationRecord::active(id("c"), t("A2")),
    ]);

    assert_eq!(snapshot.active, 2);
    assert_eq!(store.ticket_of(&id("a")), None);
    assert_eq!(store.ticket_of(&id("b")), Some(t("A1")));
    assert_no_duplicate_active_ticket(&store);
    assert_single_active_per_identity(&store);

    // The demoted holder is issued a fresh ticket.
    assert_eq!(store.current_or_assign(&id("a")).ticket, t("A3"));
    assert_no_duplicate_active_ticket(&store);
}

#[test]
fn records_on_filters_by_day() {
    let store = TicketStore::new();
    let mut old = AllocationRecord::active(id("old"), t("B1"));
    old.created_at = old.created_at - chrono::Duration::days(3);
    store.restore([old]);
    store.current_or_assign(&id("today"));

    let today = crate::local_today();
    let records = store.records_on(today);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identity, id("today"));
}

#[test]
fn concurrent_allocations_never_share_a_ticket() {
    let store = Arc::new(TicketStore::new());

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                for n in 0..10 {
                    let me = id(&format!("w{worker}-{n}"));
                    store.current_or_assign(&me);
                    if n % 2 == 0 {
                        store.advance(&me);
                    }
                }
            });
        }
    });

    let active = store.active_records();
    assert_eq!(active.len(), 80);
    assert_single_active_per_identity(&store);
    assert_no_duplicate_active_ticket(&store);
    assert_eq!(store.snapshot().version, 80 + 40);
}

#[test]
fn concurrent_advances_for_one_identity_serialize() {
    let store = Arc::new(TicketStore::new());
    let me = id("shared");

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let me = me.clone();
            scope.spawn(move || {
                for _ in 0..25 {
                    store.advance(&me);
                }
            });
        }
    });

    // 100 advances starting from A1 end on index 100, K0.
    assert_eq!(store.ticket_of(&me), Some(Ticket::from_index(100)));
    assert_eq!(store.active_records().len(), 1);
    assert_eq!(store.history().len(), 100);
}

#[test]
fn mutations_are_journaled_in_commit_order() {
    let (journal, mut rx) = Journal::channel(16);
    let store = TicketStore::with_journal(journal);

    store.current_or_assign(&id("c1"));
    store.current_or_assign(&id("c1"));
    store.advance(&id("c1"));
    store.reset_all();

    let mut commands = Vec::new();
    while let Ok(command) = rx.try_recv() {
        commands.push(command);
    }

    assert_eq!(commands.len(), 3);
    assert!(matches!(&commands[0], LedgerCommand::Append(r) if r.ticket == t("A1")));
    assert!(matches!(&commands[1], LedgerCommand::Append(r) if r.ticket == t("A2")));
    assert!(matches!(commands[2], LedgerCommand::MarkInactiveAll));
}

#[test]
fn saturated_journal_does_not_block_allocation() {
    let (journal, _rx) = Journal::channel(1);
    let store = TicketStore::with_journal(journal);

    for n in 0..5 {
        store.current_or_assign(&id(&format!("c{n}")));
    }
    assert_eq!(store.peek(), t("A5"));
}
