//! Persisted job records and store queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use oagr_core::timestamp::{serde_format, serde_format_opt};
use oagr_core::{JobId, RequestState, RequestStateDocument, StateResult};

/// Derived lifecycle flag stored next to the state document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Finished,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Finished => "finished",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "finished" => Ok(Self::Finished),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One job as stored: the full state document plus derived fields used for
/// querying and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(flatten)]
    pub document: RequestStateDocument,
    pub status: JobStatus,
    #[serde(default)]
    pub success_count: usize,
    #[serde(default)]
    pub error_count: usize,
    #[serde(default)]
    pub pending_count: usize,
    #[serde(default)]
    pub maxed_count: usize,
    /// Earliest pending due time, absent when nothing is pending.
    #[serde(default, with = "serde_format_opt", skip_serializing_if = "Option::is_none")]
    pub next_due: Option<DateTime<Utc>>,
    #[serde(with = "serde_format")]
    pub last_updated: DateTime<Utc>,
}

impl JobRecord {
    /// Snapshot a state, deriving `status` from whether it is finished at `now`.
    pub fn from_state(state: &RequestState, now: DateTime<Utc>) -> Self {
        let report = state.status_report();
        Self {
            document: state.to_document(),
            status: if state.finished_at(now) {
                JobStatus::Finished
            } else {
                JobStatus::Active
            },
            success_count: report.success,
            error_count: report.error,
            pending_count: report.pending,
            maxed_count: report.maxed,
            next_due: state.next_due(),
            last_updated: now,
        }
    }

    pub fn id(&self) -> JobId {
        self.document.id
    }

    pub fn into_state(self) -> StateResult<RequestState> {
        RequestState::from_document(self.document)
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// True when the record has pending work due at `now`.
    pub fn has_due(&self, now: DateTime<Utc>) -> bool {
        self.document.start <= now && self.document.pending.iter().any(|p| p.due <= now)
    }
}

/// Record selection for `JobStore::count` / `JobStore::iterate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobQuery {
    /// Active jobs that have started and have at least one identifier due.
    Due { now: DateTime<Utc> },
    All,
}

impl JobQuery {
    pub fn due_now() -> Self {
        Self::Due {
            now: oagr_core::timestamp::now(),
        }
    }

    pub fn matches(&self, record: &JobRecord) -> bool {
        match self {
            Self::Due { now } => record.status == JobStatus::Active && record.has_due(*now),
            Self::All => true,
        }
    }
}

/// `{id, status}` projection used for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusEntry {
    pub id: JobId,
    pub status: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use oagr_core::{Identifier, StateDefaults, StateParams};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn state() -> RequestState {
        let ids = ["a", "b"].iter().map(|s| Identifier::parse(s).unwrap());
        let params = StateParams::default().starting_at(t0());
        RequestState::new(ids, params, &StateDefaults::default()).unwrap()
    }

    #[test]
    fn record_carries_counts_and_status() {
        let mut st = state();
        st.record_result_at(
            oagr_core::LookupResult {
                results: vec![json!({"identifier": [{"id": "a"}]})],
                ..Default::default()
            },
            t0(),
        );

        let rec = JobRecord::from_state(&st, t0());
        assert_eq!(rec.status, JobStatus::Active);
        assert_eq!((rec.success_count, rec.pending_count), (1, 1));
        assert_eq!(rec.next_due, Some(t0()));

        let json = rec.to_json().unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["start"], "2024-05-01T12:00:00Z");
        assert_eq!(json["success_count"], 1);
        assert!(json["pending"].is_array());
    }

    #[test]
    fn record_survives_json_and_rebuilds_state() {
        let st = state();
        let rec = JobRecord::from_state(&st, t0());
        let back = JobRecord::from_json(rec.to_json().unwrap()).unwrap();
        assert_eq!(back, rec);
        assert_eq!(back.into_state().unwrap(), st);
    }

    #[test]
    fn due_query_requires_started_active_and_due() {
        let st = state();
        let rec = JobRecord::from_state(&st, t0());
        let before = t0() - chrono::Duration::seconds(1);

        assert!(JobQuery::Due { now: t0() }.matches(&rec));
        assert!(!JobQuery::Due { now: before }.matches(&rec));

        let mut finished = rec.clone();
        finished.status = JobStatus::Finished;
        assert!(!JobQuery::Due { now: t0() }.matches(&finished));
        assert!(JobQuery::All.matches(&finished));
    }

    #[test]
    fn status_parses_from_its_wire_name() {
        assert_eq!("finished".parse::<JobStatus>().unwrap(), JobStatus::Finished);
        assert!("done".parse::<JobStatus>().is_err());
    }
}
