use crate::{ClientIdentity, Error, Result, Ticket};
use chrono::{DateTime, Local, NaiveDate, Utc};
use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};

/// Whether an [`AllocationRecord`] is the holder's current ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Inactive,
}

impl RecordStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(Error::ledger(format!("unknown record status {other:?}"))),
        }
    }
}

/// Who was handed which ticket, when, and whether it still stands.
///
/// Records are never deleted. Re-allocation and reset flip the status of the
/// superseded record to [`RecordStatus::Inactive`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub identity: ClientIdentity,
    pub ticket: Ticket,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

impl AllocationRecord {
    /// A fresh active record stamped with the current time.
    pub fn active(identity: ClientIdentity, ticket: Ticket) -> Self {
        Self {
            identity,
            ticket,
            status: RecordStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }

    /// Whether the record was created on the given local calendar day.
    pub fn created_on(&self, day: NaiveDate) -> bool {
        self.created_at.with_timezone(&Local).date_naive() == day
    }
}

/// Today's date in the process's local time zone.
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}
