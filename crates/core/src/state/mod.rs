//! Per-job ledger of identifier resolution.
//!
//! ## Design
//!
//! Every identifier supplied at construction lives in exactly one of four
//! disjoint maps: `pending`, `success`, `error` or `maxed`. The only
//! transitions are out of `pending`, so
//!
//! - `pending + success + error + maxed` always equals the identifiers supplied
//! - nothing ever returns to `pending`
//! - "what still needs polling" is an O(pending) scan
//!
//! All scheduling data is plain, second-precision data so a state can be
//! persisted between cycles and resumed after a restart (see `document`).
//! The success/error buffers are runtime-only and start empty after a load.

pub mod document;
pub mod params;
pub mod records;
pub mod result;

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use tracing::warn;

use crate::backoff::BackoffPolicy;
use crate::error::{StateError, StateResult};
use crate::id::{Identifier, JobId};
use crate::timestamp;

pub use document::{MaxedEntry, PendingEntry, RequestStateDocument, ResolvedEntry};
pub use params::{StateDefaults, StateParams};
pub use records::{IdentifierStatus, MaxedRecord, PendingRecord, ResolvedRecord};
pub use result::{LookupResult, item_identifier};

/// Counts of identifiers moved by one `record_*` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub succeeded: usize,
    pub errored: usize,
    /// Identifiers that stayed pending with a new due time.
    pub rescheduled: usize,
    pub maxed: usize,
    /// Items referring to identifiers that are not pending (or unreadable).
    pub ignored: usize,
}

impl ApplySummary {
    pub fn merge(&mut self, other: ApplySummary) {
        self.succeeded += other.succeeded;
        self.errored += other.errored;
        self.rescheduled += other.rescheduled;
        self.maxed += other.maxed;
        self.ignored += other.ignored;
    }
}

/// Where a job stands overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Work outstanding and the deadline (if any) not reached.
    Active,
    /// Every identifier reached success, error or maxed.
    Completed,
    /// The deadline passed while identifiers were still pending; they stay
    /// in `pending` rather than being counted as maxed.
    TimedOut,
}

/// Per-bucket counts, displayed as the operator status line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub success: usize,
    pub error: usize,
    pub pending: usize,
    pub maxed: usize,
}

impl StatusReport {
    pub fn total(&self) -> usize {
        self.success + self.error + self.pending + self.maxed
    }
}

impl core::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} received; {} errors; {} pending; {} maxed",
            self.success, self.error, self.pending, self.maxed
        )
    }
}

/// Job tunables, displayed as a multi-line summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateParameters {
    pub timeout: Option<DateTime<Utc>>,
    pub back_off_factor: f64,
    pub max_back_off: f64,
    pub max_retries: Option<u32>,
    pub batch_size: usize,
}

impl core::fmt::Display for StateParameters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.timeout {
            Some(t) => writeln!(f, "Timeout: {}", timestamp::format(&t))?,
            None => writeln!(f, "Timeout: none")?,
        }
        writeln!(f, "Back Off Factor: {}", self.back_off_factor)?;
        writeln!(f, "Max Back Off: {}", self.max_back_off)?;
        match self.max_retries {
            Some(n) => writeln!(f, "Max Tries per Identifier: {n}")?,
            None => writeln!(f, "Max Tries per Identifier: unlimited")?,
        }
        write!(f, "Batch Size: {}", self.batch_size)
    }
}

enum Bump {
    Rescheduled,
    Maxed,
}

/// Resolution state of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestState {
    id: JobId,
    start: DateTime<Utc>,
    timeout: Option<DateTime<Utc>>,
    back_off_factor: f64,
    max_back_off: f64,
    max_retries: Option<u32>,
    batch_size: usize,

    pending: BTreeMap<Identifier, PendingRecord>,
    success: BTreeMap<Identifier, ResolvedRecord>,
    error: BTreeMap<Identifier, ResolvedRecord>,
    maxed: BTreeMap<Identifier, MaxedRecord>,

    success_buffer: Vec<Value>,
    error_buffer: Vec<Value>,
}

impl RequestState {
    /// Start a job with every identifier pending and due at `start`.
    ///
    /// Duplicate identifiers collapse into one entry.
    pub fn new<I>(
        identifiers: I,
        params: StateParams,
        defaults: &StateDefaults,
    ) -> StateResult<Self>
    where
        I: IntoIterator<Item = Identifier>,
    {
        let start = params
            .start
            .unwrap_or_else(Utc::now)
            .trunc_subsecs(0);

        let back_off_factor = params.back_off_factor.unwrap_or(defaults.back_off_factor);
        let max_back_off = params.max_back_off.unwrap_or(defaults.max_back_off);
        let max_retries = params.max_retries.or(defaults.max_retries);
        let batch_size = params.batch_size.unwrap_or(defaults.batch_size);

        validate_tunables(back_off_factor, max_back_off, max_retries, batch_size)?;

        let timeout = match params.timeout.or(defaults.timeout) {
            Some(t) => {
                let span = chrono::Duration::from_std(t)
                    .map_err(|e| StateError::validation(format!("timeout out of range: {e}")))?;
                let deadline = start
                    .checked_add_signed(span)
                    .ok_or_else(|| StateError::validation("timeout out of range"))?;
                Some(deadline.trunc_subsecs(0))
            }
            None => None,
        };

        let pending = identifiers
            .into_iter()
            .map(|id| {
                (
                    id,
                    PendingRecord {
                        init: start,
                        due: start,
                        requested: 0,
                    },
                )
            })
            .collect();

        Ok(Self {
            id: JobId::new(),
            start,
            timeout,
            back_off_factor,
            max_back_off,
            max_retries,
            batch_size,
            pending,
            success: BTreeMap::new(),
            error: BTreeMap::new(),
            maxed: BTreeMap::new(),
            success_buffer: Vec::new(),
            error_buffer: Vec::new(),
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn timeout(&self) -> Option<DateTime<Utc>> {
        self.timeout
    }

    pub fn back_off_factor(&self) -> f64 {
        self.back_off_factor
    }

    pub fn max_back_off(&self) -> f64 {
        self.max_back_off
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.back_off_factor, self.max_back_off)
    }

    pub fn pending(&self) -> &BTreeMap<Identifier, PendingRecord> {
        &self.pending
    }

    pub fn success(&self) -> &BTreeMap<Identifier, ResolvedRecord> {
        &self.success
    }

    pub fn error(&self) -> &BTreeMap<Identifier, ResolvedRecord> {
        &self.error
    }

    pub fn maxed(&self) -> &BTreeMap<Identifier, MaxedRecord> {
        &self.maxed
    }

    /// Total identifiers across all four maps.
    pub fn identifier_count(&self) -> usize {
        self.pending.len() + self.success.len() + self.error.len() + self.maxed.len()
    }

    pub fn status_of(&self, id: &Identifier) -> Option<IdentifierStatus> {
        if self.pending.contains_key(id) {
            Some(IdentifierStatus::Pending)
        } else if self.success.contains_key(id) {
            Some(IdentifierStatus::Success)
        } else if self.error.contains_key(id) {
            Some(IdentifierStatus::Error)
        } else if self.maxed.contains_key(id) {
            Some(IdentifierStatus::Maxed)
        } else {
            None
        }
    }

    /// Pending identifiers whose `due <= now`, in ascending order.
    pub fn get_due(&self, now: DateTime<Utc>) -> Vec<Identifier> {
        self.pending
            .iter()
            .filter(|(_, rec)| rec.due <= now)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Earliest due time across pending identifiers.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.pending.values().map(|rec| rec.due).min()
    }

    /// True when nothing is pending or the deadline has passed.
    pub fn finished(&self) -> bool {
        self.finished_at(Utc::now())
    }

    pub fn finished_at(&self, now: DateTime<Utc>) -> bool {
        self.outcome(now) != JobOutcome::Active
    }

    pub fn outcome(&self, now: DateTime<Utc>) -> JobOutcome {
        if self.pending.is_empty() {
            JobOutcome::Completed
        } else if self.timeout.is_some_and(|deadline| now > deadline) {
            JobOutcome::TimedOut
        } else {
            JobOutcome::Active
        }
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            success: self.success.len(),
            error: self.error.len(),
            pending: self.pending.len(),
            maxed: self.maxed.len(),
        }
    }

    pub fn parameters(&self) -> StateParameters {
        StateParameters {
            timeout: self.timeout,
            back_off_factor: self.back_off_factor,
            max_back_off: self.max_back_off,
            max_retries: self.max_retries,
            batch_size: self.batch_size,
        }
    }

    /// Count one delivery attempt against each identifier (e.g. a failed batch).
    ///
    /// Identifiers reaching `max_retries` move to `maxed`; the rest are
    /// rescheduled by backoff. Identifiers that are not pending are logged
    /// and skipped.
    pub fn record_requested(&mut self, identifiers: &[Identifier]) -> ApplySummary {
        self.record_requested_at(identifiers, Utc::now())
    }

    pub fn record_requested_at(
        &mut self,
        identifiers: &[Identifier],
        now: DateTime<Utc>,
    ) -> ApplySummary {
        let now = now.trunc_subsecs(0);
        let mut summary = ApplySummary::default();
        for id in identifiers {
            match self.bump(id, now) {
                Some(Bump::Rescheduled) => summary.rescheduled += 1,
                Some(Bump::Maxed) => summary.maxed += 1,
                None => {
                    warn!(
                        job_id = %self.id,
                        identifier = %id,
                        "requested identifier is not pending"
                    );
                    summary.ignored += 1;
                }
            }
        }
        summary
    }

    /// Apply one lookup response.
    ///
    /// `results` and `errors` resolve their identifiers (counting the
    /// delivery) and append the raw items to the matching buffer;
    /// `processing` counts as another attempt and reschedules. Items for
    /// identifiers that are not pending are logged and ignored.
    pub fn record_result(&mut self, result: LookupResult) -> ApplySummary {
        self.record_result_at(result, Utc::now())
    }

    pub fn record_result_at(&mut self, result: LookupResult, now: DateTime<Utc>) -> ApplySummary {
        let now = now.trunc_subsecs(0);
        let mut summary = ApplySummary::default();
        let LookupResult {
            results,
            errors,
            processing,
        } = result;

        for item in results {
            match self.take_pending(&item, "result") {
                Some((id, mut rec)) => {
                    rec.requested = rec.requested.saturating_add(1);
                    self.success.insert(id, rec.resolve(now));
                    self.success_buffer.push(item);
                    summary.succeeded += 1;
                }
                None => summary.ignored += 1,
            }
        }

        for item in errors {
            match self.take_pending(&item, "error") {
                Some((id, mut rec)) => {
                    rec.requested = rec.requested.saturating_add(1);
                    self.error.insert(id, rec.resolve(now));
                    self.error_buffer.push(item);
                    summary.errored += 1;
                }
                None => summary.ignored += 1,
            }
        }

        for item in processing {
            let Some(id) = item_identifier(&item) else {
                warn!(job_id = %self.id, "processing item without a readable identifier");
                summary.ignored += 1;
                continue;
            };
            match self.bump(&id, now) {
                Some(Bump::Rescheduled) => summary.rescheduled += 1,
                Some(Bump::Maxed) => summary.maxed += 1,
                None => {
                    warn!(job_id = %self.id, identifier = %id, "no record of pending identifier");
                    summary.ignored += 1;
                }
            }
        }

        summary
    }

    /// Drain results buffered since the last flush.
    pub fn flush_success(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.success_buffer)
    }

    /// Drain errors buffered since the last flush.
    pub fn flush_error(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.error_buffer)
    }

    fn take_pending(&mut self, item: &Value, kind: &str) -> Option<(Identifier, PendingRecord)> {
        let Some(id) = item_identifier(item) else {
            warn!(job_id = %self.id, kind, "lookup item without a readable identifier");
            return None;
        };
        match self.pending.remove(&id) {
            Some(rec) => Some((id, rec)),
            None => {
                warn!(job_id = %self.id, identifier = %id, kind, "no record of pending identifier");
                None
            }
        }
    }

    fn bump(&mut self, id: &Identifier, now: DateTime<Utc>) -> Option<Bump> {
        let policy = self.backoff_policy();
        let max_retries = self.max_retries;
        let rec = self.pending.get_mut(id)?;

        rec.requested = rec.requested.saturating_add(1);
        if max_retries.is_some_and(|max| rec.requested >= max) {
            let rec = self.pending.remove(id)?;
            self.maxed.insert(id.clone(), rec.abandon());
            return Some(Bump::Maxed);
        }

        let wait = chrono::Duration::seconds(policy.delay_whole_secs(rec.requested));
        rec.due = now.checked_add_signed(wait).unwrap_or(now).max(rec.init);
        Some(Bump::Rescheduled)
    }

    pub fn to_document(&self) -> RequestStateDocument {
        RequestStateDocument {
            id: self.id,
            start: self.start,
            timeout: self.timeout,
            back_off_factor: self.back_off_factor,
            max_back_off: self.max_back_off,
            max_retries: self.max_retries,
            batch_size: self.batch_size,
            success: resolved_entries(&self.success),
            error: resolved_entries(&self.error),
            pending: self
                .pending
                .iter()
                .map(|(id, rec)| PendingEntry {
                    id: id.clone(),
                    init: rec.init,
                    due: rec.due,
                    requested: rec.requested,
                })
                .collect(),
            maxed: self
                .maxed
                .iter()
                .map(|(id, rec)| MaxedEntry {
                    id: id.clone(),
                    init: rec.init,
                    requested: rec.requested,
                })
                .collect(),
        }
    }

    /// Rebuild a state from its document, with empty buffers.
    ///
    /// Applies the same tunable checks as [`RequestState::new`], and rejects
    /// documents placing one identifier in more than one map or holding a
    /// pending entry due before it was added.
    pub fn from_document(doc: RequestStateDocument) -> StateResult<Self> {
        validate_tunables(doc.back_off_factor, doc.max_back_off, doc.max_retries, doc.batch_size)?;

        let mut state = Self {
            id: doc.id,
            start: doc.start,
            timeout: doc.timeout,
            back_off_factor: doc.back_off_factor,
            max_back_off: doc.max_back_off,
            max_retries: doc.max_retries,
            batch_size: doc.batch_size,
            pending: BTreeMap::new(),
            success: BTreeMap::new(),
            error: BTreeMap::new(),
            maxed: BTreeMap::new(),
            success_buffer: Vec::new(),
            error_buffer: Vec::new(),
        };

        for e in doc.pending {
            state.ensure_unplaced(&e.id)?;
            if e.due < e.init {
                return Err(StateError::validation(format!(
                    "identifier {} is due before it was added",
                    e.id
                )));
            }
            state.pending.insert(
                e.id,
                PendingRecord {
                    init: e.init,
                    due: e.due,
                    requested: e.requested,
                },
            );
        }
        for e in doc.success {
            state.ensure_unplaced(&e.id)?;
            let rec = resolved_record(&e);
            state.success.insert(e.id, rec);
        }
        for e in doc.error {
            state.ensure_unplaced(&e.id)?;
            let rec = resolved_record(&e);
            state.error.insert(e.id, rec);
        }
        for e in doc.maxed {
            state.ensure_unplaced(&e.id)?;
            state.maxed.insert(
                e.id,
                MaxedRecord {
                    init: e.init,
                    requested: e.requested,
                },
            );
        }

        Ok(state)
    }

    pub fn to_json(&self) -> StateResult<Value> {
        Ok(serde_json::to_value(self.to_document())?)
    }

    /// Parse a persisted document; unknown extra fields are ignored.
    pub fn from_json(value: &Value) -> StateResult<Self> {
        let doc: RequestStateDocument = serde_json::from_value(value.clone())?;
        Self::from_document(doc)
    }

    fn ensure_unplaced(&self, id: &Identifier) -> StateResult<()> {
        match self.status_of(id) {
            Some(status) => Err(StateError::serialization(format!(
                "identifier {id} appears more than once (already {status:?})"
            ))),
            None => Ok(()),
        }
    }
}

fn validate_tunables(
    back_off_factor: f64,
    max_back_off: f64,
    max_retries: Option<u32>,
    batch_size: usize,
) -> StateResult<()> {
    if !(back_off_factor.is_finite() && back_off_factor > 0.0) {
        return Err(StateError::validation(format!(
            "back_off_factor must be a positive number, got {back_off_factor}"
        )));
    }
    if !(max_back_off.is_finite() && max_back_off > 0.0) {
        return Err(StateError::validation(format!(
            "max_back_off must be a positive number, got {max_back_off}"
        )));
    }
    if max_retries == Some(0) {
        return Err(StateError::validation("max_retries must be at least 1"));
    }
    if batch_size == 0 {
        return Err(StateError::validation("batch_size must be at least 1"));
    }
    Ok(())
}

fn resolved_entries(map: &BTreeMap<Identifier, ResolvedRecord>) -> Vec<ResolvedEntry> {
    map.iter()
        .map(|(id, rec)| ResolvedEntry {
            id: id.clone(),
            init: rec.init,
            requested: rec.requested,
            found: rec.found,
        })
        .collect()
}

fn resolved_record(entry: &ResolvedEntry) -> ResolvedRecord {
    ResolvedRecord {
        init: entry.init,
        requested: entry.requested,
        found: entry.found,
    }
}
