//! Persistence collaborator and the journal that feeds it.
//!
//! The in-memory [`TicketStore`](crate::TicketStore) is always authoritative.
//! A [`TicketLedger`] only records history and lets a restarted process pick up
//! where it left off. Mutations reach the ledger through a [`Journal`]: the
//! store submits a [`LedgerCommand`] from inside its critical section, so the
//! ledger sees mutations in exactly the order they were committed, and a single
//! background task applies them.
//!
//! Ledger failures never propagate to callers. They are logged, counted in
//! [`JournalStats`], and reported to an optional failure hook.

use crate::{AllocationRecord, Error, RecordStatus, Result, Ticket, record::local_today};
use core::{future::Future, time::Duration};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
    time::timeout,
};

/// Durable history of allocations.
///
/// Implementations must make [`TicketLedger::append`] supersede: any active
/// row for the same identity becomes inactive before the new row is stored.
pub trait TicketLedger: Send + Sync + 'static {
    /// Stores `record`, deactivating the identity's previous active row.
    fn append(&self, record: &AllocationRecord) -> impl Future<Output = Result<()>> + Send;

    /// Marks every active row inactive.
    fn mark_inactive_all(&self) -> impl Future<Output = Result<()>> + Send;

    /// Highest active ticket, or [`Ticket::ORIGIN`] when nothing is active.
    fn query_active_max(&self) -> impl Future<Output = Result<Ticket>> + Send;

    /// Every row created on the current UTC day, oldest first.
    fn query_today(&self) -> impl Future<Output = Result<Vec<AllocationRecord>>> + Send;

    /// Every active row, oldest first.
    fn query_active(&self) -> impl Future<Output = Result<Vec<AllocationRecord>>> + Send;
}

/// Work items processed by [`journal_loop`].
#[derive(Debug)]
pub enum LedgerCommand {
    Append(AllocationRecord),
    MarkInactiveAll,
    /// Stop after everything queued ahead of this command has been applied.
    Shutdown {
        response: oneshot::Sender<JournalStats>,
    },
}

/// Outcome counters reported when the journal shuts down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JournalStats {
    pub applied: u64,
    pub failed: u64,
}

/// Sending half of the journal channel.
#[derive(Clone, Debug)]
pub struct Journal {
    tx: mpsc::Sender<LedgerCommand>,
}

impl Journal {
    /// Creates a bounded journal channel. A capacity of zero is raised to one.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LedgerCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Creates a journal and spawns [`journal_loop`] on the current Tokio
    /// runtime.
    pub fn spawn<L, F>(
        ledger: Arc<L>,
        capacity: usize,
        on_failure: F,
    ) -> (Self, JoinHandle<JournalStats>)
    where
        L: TicketLedger,
        F: Fn(&Error) + Send + Sync + 'static,
    {
        let (journal, rx) = Self::channel(capacity);
        let handle = tokio::spawn(journal_loop(rx, ledger, on_failure));
        (journal, handle)
    }

    /// Queues a command without waiting.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelError`] if the channel is full; the command is dropped.
    /// - [`Error::ServiceShutdown`] if the worker has stopped.
    pub fn submit(&self, command: LedgerCommand) -> Result<()> {
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => Error::ChannelError {
                context: "journal is full".to_string(),
            },
            TrySendError::Closed(_) => Error::ServiceShutdown,
        })
    }

    /// Asks the worker to stop once the backlog is applied and waits up to
    /// `wait` for its acknowledgement.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] if the worker is already gone.
    /// - [`Error::ChannelError`] if the backlog did not drain in time.
    pub async fn shutdown(&self, wait: Duration) -> Result<JournalStats> {
        let (response, ack) = oneshot::channel();
        let flush = async {
            self.tx
                .send(LedgerCommand::Shutdown { response })
                .await
                .map_err(|_| Error::ServiceShutdown)?;
            ack.await.map_err(|_| Error::ServiceShutdown)
        };

        timeout(wait, flush)
            .await
            .map_err(|_| Error::ChannelError {
                context: format!("journal did not drain within {wait:?}"),
            })?
    }
}

/// Applies journaled commands to `ledger` until the channel closes or a
/// [`LedgerCommand::Shutdown`] arrives.
///
/// Designed to be spawned as a Tokio task. Failed commands are counted,
/// logged, and handed to `on_failure`; the loop keeps going.
pub async fn journal_loop<L, F>(
    mut rx: mpsc::Receiver<LedgerCommand>,
    ledger: Arc<L>,
    on_failure: F,
) -> JournalStats
where
    L: TicketLedger,
    F: Fn(&Error) + Send + Sync + 'static,
{
    #[cfg(feature = "tracing")]
    tracing::trace!("Journal started");

    let mut stats = JournalStats::default();

    while let Some(command) = rx.recv().await {
        let result = match command {
            LedgerCommand::Append(record) => ledger.append(&record).await,
            LedgerCommand::MarkInactiveAll => ledger.mark_inactive_all().await,
            LedgerCommand::Shutdown { response } => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    applied = stats.applied,
                    failed = stats.failed,
                    "Journal received shutdown signal"
                );

                if response.send(stats).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Journal failed to acknowledge shutdown");
                }
                break;
            }
        };

        match result {
            Ok(()) => stats.applied += 1,
            Err(e) => {
                stats.failed += 1;
                #[cfg(feature = "tracing")]
                tracing::warn!("Ledger write failed, keeping in-memory state: {e}");
                on_failure(&e);
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Journal stopped");

    stats
}

/// A [`TicketLedger`] that keeps its rows in process memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    rows: Mutex<Vec<AllocationRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the ledger with existing rows, as if read back from disk.
    pub fn with_rows(rows: Vec<AllocationRecord>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }

    pub fn rows(&self) -> Vec<AllocationRecord> {
        self.rows.lock().clone()
    }
}

impl TicketLedger for MemoryLedger {
    async fn append(&self, record: &AllocationRecord) -> Result<()> {
        let mut rows = self.rows.lock();
        rows.iter_mut()
            .filter(|row| row.is_active() && row.identity == record.identity)
            .for_each(|row| row.status = RecordStatus::Inactive);
        rows.push(record.clone());
        Ok(())
    }

    async fn mark_inactive_all(&self) -> Result<()> {
        self.rows
            .lock()
            .iter_mut()
            .for_each(|row| row.status = RecordStatus::Inactive);
        Ok(())
    }

    async fn query_active_max(&self) -> Result<Ticket> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|row| row.is_active())
            .map(|row| row.ticket)
            .max()
            .unwrap_or(Ticket::ORIGIN))
    }

    async fn query_today(&self) -> Result<Vec<AllocationRecord>> {
        let today = local_today();
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|row| row.created_on(today))
            .cloned()
            .collect())
    }

    async fn query_active(&self) -> Result<Vec<AllocationRecord>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|row| row.is_active())
            .cloned()
            .collect())
    }
}
