//! SQLite-backed [`TicketLedger`].
//!
//! One row per allocation in the `queue` table. Rows are never deleted;
//! superseded and reset rows keep `status = 'inactive'`. Timestamps are stored
//! as UTC text; "today" is the local day, via `date(created_at, 'localtime')`.

use chrono::{DateTime, NaiveDateTime, Utc};
use core::str::FromStr;
use nextup::{
    AllocationRecord, ClientIdentity, Error, RecordStatus, Result, Ticket, TicketLedger,
    local_today,
};
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id TEXT NOT NULL,
    queue_number TEXT NOT NULL,
    created_at TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('active', 'inactive'))
);

CREATE INDEX IF NOT EXISTS idx_queue_status ON queue(status);
CREATE INDEX IF NOT EXISTS idx_queue_client ON queue(client_id, status);
";

const TIMESTAMP_WRITE: &str = "%Y-%m-%d %H:%M:%S%.3f";
const TIMESTAMP_READ: &str = "%Y-%m-%d %H:%M:%S%.f";

const SELECT_COLUMNS: &str = "SELECT client_id, queue_number, created_at, status FROM queue";

#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Opens (creating if needed) the database at `url` and applies the
    /// schema.
    ///
    /// A single long-lived connection is used, which also keeps a
    /// `sqlite::memory:` database alive for the life of the ledger.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::ledger(format!("invalid database url: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| Error::ledger(format!("failed to connect to database: {e}")))?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::ledger(format!("failed to initialize schema: {e}")))?;

        tracing::debug!(url, "Ledger ready");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch(&self, sql: &str, bind: Option<String>) -> Result<Vec<AllocationRecord>> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::ledger(format!("query failed: {e}")))?;
        rows.iter().map(record_from_row).collect()
    }
}

impl TicketLedger for SqliteLedger {
    async fn append(&self, record: &AllocationRecord) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::ledger(format!("failed to begin transaction: {e}")))?;

        sqlx::query("UPDATE queue SET status = 'inactive' WHERE client_id = ? AND status = 'active'")
            .bind(record.identity.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::ledger(format!("failed to supersede previous ticket: {e}")))?;

        sqlx::query(
            "INSERT INTO queue (client_id, queue_number, created_at, status) VALUES (?, ?, ?, ?)",
        )
        .bind(record.identity.as_str())
        .bind(record.ticket.to_string())
        .bind(record.created_at.format(TIMESTAMP_WRITE).to_string())
        .bind(record.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::ledger(format!("failed to insert ticket: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| Error::ledger(format!("failed to commit ticket: {e}")))
    }

    async fn mark_inactive_all(&self) -> Result<()> {
        sqlx::query("UPDATE queue SET status = 'inactive' WHERE status = 'active'")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| Error::ledger(format!("failed to clear queue: {e}")))
    }

    async fn query_active_max(&self) -> Result<Ticket> {
        let rows = sqlx::query("SELECT queue_number FROM queue WHERE status = 'active'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::ledger(format!("query failed: {e}")))?;

        let mut max = Ticket::ORIGIN;
        for row in &rows {
            let raw: String = row
                .try_get("queue_number")
                .map_err(|e| Error::ledger(format!("bad queue_number column: {e}")))?;
            max = max.max(Ticket::parse_or_origin(&raw));
        }
        Ok(max)
    }

    async fn query_today(&self) -> Result<Vec<AllocationRecord>> {
        let today = local_today().format("%Y-%m-%d").to_string();
        self.fetch(
            &format!("{SELECT_COLUMNS} WHERE date(created_at, 'localtime') = ? ORDER BY id"),
            Some(today),
        )
        .await
    }

    async fn query_active(&self) -> Result<Vec<AllocationRecord>> {
        self.fetch(
            &format!("{SELECT_COLUMNS} WHERE status = 'active' ORDER BY id"),
            None,
        )
        .await
    }
}

/// Stored tickets that fail to parse come back as [`Ticket::ORIGIN`].
fn record_from_row(row: &SqliteRow) -> Result<AllocationRecord> {
    let column = |name: &str| -> Result<String> {
        row.try_get(name)
            .map_err(|e| Error::ledger(format!("bad {name} column: {e}")))
    };

    let created_at = column("created_at")?;
    let created_at = NaiveDateTime::parse_from_str(&created_at, TIMESTAMP_READ)
        .map_err(|e| Error::ledger(format!("bad timestamp {created_at:?}: {e}")))?;

    Ok(AllocationRecord {
        identity: ClientIdentity::new(column("client_id")?),
        ticket: Ticket::parse_or_origin(&column("queue_number")?),
        status: RecordStatus::from_str(&column("status")?)?,
        created_at: DateTime::<Utc>::from_naive_utc_and_offset(created_at, Utc),
    })
}
