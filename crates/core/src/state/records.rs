//! Per-identifier bookkeeping records.

use chrono::{DateTime, Utc};

/// An identifier still awaiting a terminal answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRecord {
    /// When the identifier entered the job.
    pub init: DateTime<Utc>,
    /// Earliest time the identifier may be requested again.
    pub due: DateTime<Utc>,
    /// Delivery attempts so far.
    pub requested: u32,
}

/// An identifier the lookup service answered (successfully or with an error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRecord {
    pub init: DateTime<Utc>,
    pub requested: u32,
    /// When the terminal answer arrived.
    pub found: DateTime<Utc>,
}

/// An identifier abandoned after exhausting its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxedRecord {
    pub init: DateTime<Utc>,
    pub requested: u32,
}

impl PendingRecord {
    pub(crate) fn resolve(self, found: DateTime<Utc>) -> ResolvedRecord {
        ResolvedRecord {
            init: self.init,
            requested: self.requested,
            found,
        }
    }

    pub(crate) fn abandon(self) -> MaxedRecord {
        MaxedRecord {
            init: self.init,
            requested: self.requested,
        }
    }
}

/// Which of the four disjoint maps an identifier currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierStatus {
    Pending,
    Success,
    Error,
    Maxed,
}
