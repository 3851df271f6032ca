//! Error types for ticket allocation and journaling.
//!
//! Allocation itself never fails: every operation on
//! [`TicketStore`](crate::TicketStore) and [`BroadcastHub`](crate::BroadcastHub)
//! is total. Errors only surface at the edges:
//!
//! - `InvalidTicket`: a strict parse of a ticket string failed.
//! - `Ledger`: the persistence collaborator rejected a read or write.
//! - `ChannelError`: the journal channel is closed or saturated.
//! - `ServiceShutdown`: the journal worker has already stopped.
//! - `InvalidSetting`: a textual setting such as a broadcast mode was not
//!   recognised.

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the `nextup` crate.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The input was not a letter `A..=Z` followed by a digit `0..=9`.
    #[error("Invalid ticket: {raw:?}")]
    InvalidTicket { raw: String },

    /// The persistence collaborator failed.
    #[error("Ledger error: {context}")]
    Ledger { context: String },

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The journal worker is no longer accepting commands.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// A textual setting could not be parsed.
    #[error("Invalid setting: {reason}")]
    InvalidSetting { reason: String },
}

impl Error {
    pub fn ledger(context: impl Into<String>) -> Self {
        Self::Ledger {
            context: context.into(),
        }
    }
}
