use crate::server::{config::ServerConfig, ledger::SqliteLedger, telemetry};
use anyhow::Context;
use core::time::Duration;
use nextup::{AllocationRecord, Coordinator, ItemBoard, Journal, TicketLedger, TicketStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared handles passed to every route.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub board: Arc<ItemBoard>,
    pub ledger: Option<Arc<SqliteLedger>>,
    journal: Option<Journal>,
    /// Cancelled when the process starts shutting down; open sockets watch it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Opens the ledger named in `config`, if any, and builds the state.
    pub async fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        match &config.database_url {
            Some(url) => {
                let ledger = SqliteLedger::connect(url)
                    .await
                    .with_context(|| format!("failed to open ledger at {url}"))?;
                Ok(Self::with_ledger(config, Arc::new(ledger)).await)
            }
            None => Ok(Self::in_memory(config)),
        }
    }

    /// State without persistence.
    pub fn in_memory(config: &ServerConfig) -> Self {
        Self::assemble(config, TicketStore::new(), None, None)
    }

    /// State backed by `ledger`.
    ///
    /// Active rows are loaded back into the store before the journal starts.
    /// A ledger that cannot be read leaves the store empty; the server still
    /// starts.
    pub async fn with_ledger(config: &ServerConfig, ledger: Arc<SqliteLedger>) -> Self {
        let restored = match ledger.query_active().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Could not restore active tickets, starting empty: {e}");
                Vec::new()
            }
        };

        let (journal, _handle) = Journal::spawn(Arc::clone(&ledger), config.ledger_buffer, |_e| {
            telemetry::increment_ledger_failures();
        });

        let store = TicketStore::with_journal(journal.clone());
        restore(&store, &ledger, restored).await;

        Self::assemble(config, store, Some(ledger), Some(journal))
    }

    fn assemble(
        config: &ServerConfig,
        store: TicketStore,
        ledger: Option<Arc<SqliteLedger>>,
        journal: Option<Journal>,
    ) -> Self {
        Self {
            coordinator: Arc::new(Coordinator::new(
                store,
                config.broadcast,
                config.observer_buffer,
            )),
            board: Arc::new(ItemBoard::new(config.observer_buffer)),
            ledger,
            journal,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stops open sockets, flushes the journal and closes the ledger.
    pub async fn close(&self, wait: Duration) {
        self.shutdown.cancel();
        self.flush(wait).await;

        if let Some(ledger) = &self.ledger {
            ledger.close().await;
        }
    }

    /// Waits up to `wait` for queued ledger writes and stops the journal.
    /// Later mutations are no longer persisted.
    pub async fn flush(&self, wait: Duration) {
        if let Some(journal) = &self.journal {
            match journal.shutdown(wait).await {
                Ok(stats) => tracing::info!(
                    applied = stats.applied,
                    failed = stats.failed,
                    "Ledger journal flushed"
                ),
                Err(e) => tracing::warn!("Ledger journal did not flush cleanly: {e}"),
            }
        }
    }
}

async fn restore(store: &TicketStore, ledger: &SqliteLedger, records: Vec<AllocationRecord>) {
    let snapshot = store.restore(records);

    match ledger.query_active_max().await {
        Ok(max) if max != snapshot.current => tracing::warn!(
            ledger = %max,
            store = %snapshot.current,
            "Restored maximum ticket disagrees with the ledger"
        ),
        Ok(_) => {}
        Err(e) => tracing::warn!("Could not read the ledger maximum: {e}"),
    }

    tracing::info!(
        active = snapshot.active,
        current = %snapshot.current,
        "Restored queue from ledger"
    );
}
